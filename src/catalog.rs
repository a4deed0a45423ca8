use log::{debug, info};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::render::Entry;

/// Name of the entry that leads to the parent directory
pub const PARENT_ENTRY: &str = "..";

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("no such file or directory: {}", .0.display())]
    NotFound(PathBuf),

    #[error("cannot list {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Entries of one directory, in display order
#[derive(Debug)]
pub struct Listing {
    pub dir: PathBuf,
    pub entries: Vec<Entry>,
    /// Index of the first non-directory entry
    pub first_file: usize,
    /// Entry to show first when a single file was opened
    pub selected: Option<usize>,
}

impl Listing {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// List `path`. A file yields its directory with only that file in it; a
/// directory yields `..` (when it has a parent), its subdirectories, then its
/// files, each group sorted by name.
pub fn scan(path: &Path) -> Result<Listing, ScanError> {
    let meta = fs::metadata(path).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => ScanError::NotFound(path.to_path_buf()),
        _ => ScanError::Io {
            path: path.to_path_buf(),
            source,
        },
    })?;

    if meta.is_dir() {
        return scan_dir(path);
    }

    let file = absolute(path)?;
    let dir = file
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"));
    let name = display_name(&file);
    info!("Opening single file {}", file.display());
    Ok(Listing {
        dir,
        entries: vec![Entry::new(name, file, false)],
        first_file: 0,
        selected: Some(0),
    })
}

/// List a directory
pub fn scan_dir(dir: &Path) -> Result<Listing, ScanError> {
    let dir = absolute(dir)?;
    let io_err = |source| ScanError::Io {
        path: dir.clone(),
        source,
    };

    let mut dirs = Vec::new();
    let mut files = Vec::new();
    for item in fs::read_dir(&dir).map_err(io_err)? {
        let item = match item {
            Ok(item) => item,
            Err(e) => {
                debug!("Skipping unreadable entry in {}: {e}", dir.display());
                continue;
            }
        };
        let name = item.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let path = item.path();
        // Follows symlinks, unlike DirEntry::file_type
        let is_dir = path.is_dir();
        if is_dir {
            dirs.push(Entry::new(name, path, true));
        } else {
            files.push(Entry::new(name, path, false));
        }
    }

    let by_name = |a: &Entry, b: &Entry| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.name.cmp(&b.name))
    };
    dirs.sort_by(by_name);
    files.sort_by(by_name);

    let mut entries = Vec::with_capacity(dirs.len() + files.len() + 1);
    if let Some(parent) = dir.parent() {
        entries.push(Entry::new(PARENT_ENTRY, parent.to_path_buf(), true));
    }
    entries.extend(dirs);
    let first_file = entries.len();
    entries.extend(files);

    info!(
        "Scanned {}: {} entries, first file at {first_file}",
        dir.display(),
        entries.len()
    );
    Ok(Listing {
        dir,
        entries,
        first_file,
        selected: None,
    })
}

fn absolute(path: &Path) -> Result<PathBuf, ScanError> {
    path.canonicalize().map_err(|source| ScanError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"x").unwrap();
    }

    #[test]
    fn directories_come_before_files() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "b.png");
        touch(temp.path(), "A.png");
        touch(temp.path(), ".hidden.png");
        fs::create_dir(temp.path().join("zeta")).unwrap();
        fs::create_dir(temp.path().join("alpha")).unwrap();

        let listing = scan(temp.path()).unwrap();
        let names: Vec<&str> = listing.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["..", "alpha", "zeta", "A.png", "b.png"]);
        assert_eq!(listing.first_file, 3);
        assert!(listing.entries[..3].iter().all(|e| e.is_dir));
        assert!(listing.selected.is_none());
    }

    #[test]
    fn single_file_lists_only_itself() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "one.png");
        touch(temp.path(), "two.png");

        let listing = scan(&temp.path().join("two.png")).unwrap();
        assert_eq!(listing.entries.len(), 1);
        assert_eq!(listing.entries[0].name, "two.png");
        assert_eq!(listing.first_file, 0);
        assert_eq!(listing.selected, Some(0));
        assert_eq!(listing.dir, temp.path().canonicalize().unwrap());
    }

    #[test]
    fn missing_path_is_reported() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            scan(&temp.path().join("nope")),
            Err(ScanError::NotFound(_))
        ));
    }
}
