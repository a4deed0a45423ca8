use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::render::TweakSet;

/// Persistence of tweak sets keyed by image content hash
pub trait TweakStore: Send {
    fn load(&self, hash: &str) -> Option<TweakSet>;

    /// Replace the value for `hash`. A neutral set removes the key.
    fn save(&mut self, hash: &str, tweaks: &TweakSet) -> anyhow::Result<()>;

    /// Make pending saves durable
    fn flush(&mut self) -> anyhow::Result<()>;
}

/// JSON file holding `hash -> encoded tweaks`. Writes are batched until `flush`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct JsonTweakStore {
    tweaks: BTreeMap<String, String>,
    #[serde(skip)]
    file_path: Option<PathBuf>,
    #[serde(skip)]
    dirty: bool,
}

impl JsonTweakStore {
    pub fn ephemeral() -> Self {
        Self::default()
    }

    pub fn with_file(file_path: &Path) -> Self {
        Self {
            file_path: Some(file_path.to_path_buf()),
            ..Self::default()
        }
    }

    pub fn load_or_ephemeral(file_path: Option<&Path>) -> Self {
        match file_path {
            Some(path) => Self::load_from_file(path).unwrap_or_else(|e| {
                log::error!("Failed to load tweaks from {}: {e:#}", path.display());
                let backup = backup_path(path);
                match fs::rename(path, &backup) {
                    Ok(()) => {
                        log::warn!("Moved unreadable tweaks to {}", backup.display());
                        Self::with_file(path)
                    }
                    Err(e) => {
                        // Never write over a file we could not read
                        log::error!("Cannot move {} aside: {e}", path.display());
                        Self::ephemeral()
                    }
                }
            }),
            None => Self::ephemeral(),
        }
    }

    pub fn load_from_file(file_path: &Path) -> anyhow::Result<Self> {
        if file_path.exists() {
            let content = fs::read_to_string(file_path)
                .with_context(|| format!("reading {}", file_path.display()))?;
            let mut store: Self = serde_json::from_str(&content)
                .with_context(|| format!("parsing {}", file_path.display()))?;
            store.file_path = Some(file_path.to_path_buf());
            Ok(store)
        } else {
            Ok(Self::with_file(file_path))
        }
    }

    pub fn len(&self) -> usize {
        self.tweaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tweaks.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

impl TweakStore for JsonTweakStore {
    fn load(&self, hash: &str) -> Option<TweakSet> {
        let encoded = self.tweaks.get(hash)?;
        match TweakSet::decode(encoded) {
            Ok(tweaks) => Some(tweaks),
            Err(e) => {
                log::warn!("Ignoring stored tweaks for {hash}: {e}");
                None
            }
        }
    }

    fn save(&mut self, hash: &str, tweaks: &TweakSet) -> anyhow::Result<()> {
        if tweaks.is_neutral() {
            self.dirty |= self.tweaks.remove(hash).is_some();
            return Ok(());
        }
        let encoded = tweaks.encode();
        if self.tweaks.get(hash) != Some(&encoded) {
            self.tweaks.insert(hash.to_string(), encoded);
            self.dirty = true;
        }
        Ok(())
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        if !self.dirty {
            return Ok(());
        }
        match &self.file_path {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("creating {}", parent.display()))?;
                }
                let content = serde_json::to_string_pretty(self)?;
                fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
                self.dirty = false;
                Ok(())
            }
            None => {
                // Ephemeral stores never touch the disk
                self.dirty = false;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::Rotation;
    use tempfile::TempDir;

    fn tweaked() -> TweakSet {
        let mut tweaks = TweakSet::neutral();
        tweaks.black_level = 12;
        tweaks.rotation = Rotation::Half;
        tweaks
    }

    #[test]
    fn save_is_replace_by_key() {
        let mut store = JsonTweakStore::ephemeral();
        store.save("abc", &tweaked()).unwrap();
        store.save("abc", &tweaked()).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.load("abc"), Some(tweaked()));

        store.save("abc", &TweakSet::neutral()).unwrap();
        assert!(store.is_empty());
        assert_eq!(store.load("abc"), None);
    }

    #[test]
    fn flush_writes_only_when_dirty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("tweaks.json");
        let mut store = JsonTweakStore::with_file(&path);

        store.flush().unwrap();
        assert!(!path.exists());

        store.save("hash-1", &tweaked()).unwrap();
        assert!(store.is_dirty());
        assert!(!path.exists());
        store.flush().unwrap();
        assert!(!store.is_dirty());

        let reloaded = JsonTweakStore::load_from_file(&path).unwrap();
        assert_eq!(reloaded.load("hash-1"), Some(tweaked()));
    }

    #[test]
    fn unparseable_values_are_absent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tweaks.json");
        fs::write(&path, r#"{"tweaks":{"good":"bk:4;","bad":"bk:x;"}}"#).unwrap();

        let store = JsonTweakStore::load_or_ephemeral(Some(&path));
        assert_eq!(store.load("good").map(|t| t.black_level), Some(4));
        assert_eq!(store.load("bad"), None);
    }

    #[test]
    fn corrupt_file_is_kept_as_backup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tweaks.json");
        fs::write(&path, "not json").unwrap();

        let mut store = JsonTweakStore::load_or_ephemeral(Some(&path));
        assert!(store.is_empty());
        let backup = dir.path().join("tweaks.json.bak");
        assert_eq!(fs::read_to_string(&backup).unwrap(), "not json");

        store.save("k", &tweaked()).unwrap();
        store.flush().unwrap();
        assert!(JsonTweakStore::load_from_file(&path).unwrap().load("k").is_some());
        assert_eq!(fs::read_to_string(&backup).unwrap(), "not json");
    }
}
