use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, RwLock};

use crate::render::{BackgroundStyle, DEFAULT_KEEP_DECODED, Size, ViewerConfig};

pub const CURRENT_VERSION: u32 = 1;
pub const APP_NAME: &str = "tweakview";
const SETTINGS_FILENAME: &str = "config.yaml";
const TWEAKS_FILENAME: &str = "tweaks.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default = "default_keep_decoded")]
    pub keep_decoded: usize,

    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,

    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,

    #[serde(default = "default_true")]
    pub scale_to_fit: bool,

    #[serde(default = "default_true")]
    pub tweaks_enabled: bool,

    #[serde(default)]
    pub background: BackgroundStyle,

    /// Where tweaks are stored; defaults to the data directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tweak_store: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_keep_decoded() -> usize {
    DEFAULT_KEEP_DECODED
}

fn default_viewport_width() -> u32 {
    1280
}

fn default_viewport_height() -> u32 {
    800
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            keep_decoded: default_keep_decoded(),
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            scale_to_fit: true,
            tweaks_enabled: true,
            background: BackgroundStyle::default(),
            tweak_store: None,
        }
    }
}

impl Settings {
    #[must_use]
    pub fn viewer_config(&self) -> ViewerConfig {
        ViewerConfig {
            keep_decoded: self.keep_decoded,
            viewport: Size::new(self.viewport_width, self.viewport_height),
            scale_to_fit: self.scale_to_fit,
            tweaks_enabled: self.tweaks_enabled,
            background: self.background,
        }
    }
}

static SETTINGS: LazyLock<RwLock<Settings>> = LazyLock::new(|| RwLock::new(Settings::default()));

fn preferred_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

/// Directory for the log file and the default tweak store
pub fn data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|data| data.join(APP_NAME))
}

pub fn load_settings() {
    let Some(path) = preferred_config_path() else {
        warn!("Could not determine config directory, using default settings");
        return;
    };
    if path.exists() {
        load_settings_from_path(&path);
    } else {
        info!("Settings file not found, creating with defaults at {path:?}");
        if let Ok(settings) = SETTINGS.read() {
            save_settings_to_file(&settings, &path);
        }
    }
}

fn load_settings_from_path(path: &Path) {
    match fs::read_to_string(path) {
        Ok(content) => match parse_settings(&content) {
            Ok((settings, migrated)) => {
                debug!("Loaded settings from {path:?}");
                if migrated {
                    save_settings_to_file(&settings, path);
                }
                if let Ok(mut global) = SETTINGS.write() {
                    *global = settings;
                }
            }
            Err(e) => {
                error!("Failed to parse settings file {path:?}: {e}");
            }
        },
        Err(e) => {
            error!("Failed to read settings file {path:?}: {e}");
        }
    }
}

/// Parse a settings document, migrating old versions.
/// The flag tells whether a migration happened.
pub fn parse_settings(content: &str) -> Result<(Settings, bool), serde_yaml::Error> {
    let mut settings: Settings = serde_yaml::from_str(content)?;
    let migrated = settings.version < CURRENT_VERSION;
    if migrated {
        migrate_settings(&mut settings);
    }
    Ok((settings, migrated))
}

fn migrate_settings(settings: &mut Settings) {
    info!(
        "Migrating settings from v{} to v{}",
        settings.version, CURRENT_VERSION
    );
    settings.version = CURRENT_VERSION;
}

fn save_settings_to_file(settings: &Settings, path: &Path) {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            if let Err(e) = fs::create_dir_all(parent) {
                error!("Failed to create config directory {parent:?}: {e}");
                return;
            }
        }
    }

    let content = generate_settings_yaml(settings);

    match fs::write(path, content) {
        Ok(()) => debug!("Saved settings to {path:?}"),
        Err(e) => error!("Failed to save settings to {path:?}: {e}"),
    }
}

fn generate_settings_yaml(settings: &Settings) -> String {
    let mut content = String::new();

    content.push_str(&format!("version: {}\n", settings.version));
    content.push('\n');
    content.push_str(SETTINGS_TEMPLATE);
    content.push_str(&format!("keep_decoded: {}\n", settings.keep_decoded));
    content.push_str(&format!("viewport_width: {}\n", settings.viewport_width));
    content.push_str(&format!("viewport_height: {}\n", settings.viewport_height));
    content.push_str(&format!("scale_to_fit: {}\n", settings.scale_to_fit));
    content.push_str(&format!("tweaks_enabled: {}\n", settings.tweaks_enabled));
    content.push_str(&format!("background: {}\n", settings.background.name()));
    match &settings.tweak_store {
        Some(path) => content.push_str(&format!("tweak_store: {:?}\n", path.display().to_string())),
        None => content.push_str("# tweak_store: \"/path/to/tweaks.json\"\n"),
    }

    content
}

const SETTINGS_TEMPLATE: &str = r#"# keep_decoded: decoded images kept in memory besides the one shown
# background: black, dark, mid, light, white or auto (matches the image border)
# tweak_store: JSON file with per-image adjustments, keyed by content hash

"#;

// Public API for accessing settings

pub fn get_settings() -> Settings {
    SETTINGS.read().map(|s| s.clone()).unwrap_or_default()
}

pub fn viewer_config() -> ViewerConfig {
    get_settings().viewer_config()
}

/// Configured tweak store, else `tweaks.json` in the data directory
pub fn tweak_store_path() -> Option<PathBuf> {
    SETTINGS
        .read()
        .ok()
        .and_then(|s| s.tweak_store.clone())
        .or_else(|| data_dir().map(|dir| dir.join(TWEAKS_FILENAME)))
}
