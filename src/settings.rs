use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::engine::LayoutConfigs;
use crate::viewer::overlay::MarkerOptions;

pub const CURRENT_VERSION: u32 = 1;
const SETTINGS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "pagebridge";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to read settings file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse settings file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("Failed to write settings file {path:?}: {reason}")]
    Write { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewerConfig {
    #[serde(default = "default_version")]
    pub version: u32,

    /// Layout analysis switches forwarded to the engine
    #[serde(default)]
    pub layout: LayoutConfigs,

    #[serde(default)]
    pub markers: MarkerOptions,

    #[serde(default = "default_vertical_margin")]
    pub vertical_page_margin: f32,

    #[serde(default = "default_horizontal_margin")]
    pub horizontal_page_margin: f32,

    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    #[serde(default = "default_scroll_debounce_ms")]
    pub scroll_debounce_ms: u64,

    #[serde(default = "default_pinch_min_samples")]
    pub pinch_min_samples: usize,

    /// Largest bitmap edge requested from the engine, in pixels
    #[serde(default = "default_max_texture_size")]
    pub max_texture_size: u32,

    #[serde(default = "default_sweep_steps_per_tick")]
    pub sweep_steps_per_tick: usize,
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_vertical_margin() -> f32 {
    10.0
}

fn default_horizontal_margin() -> f32 {
    20.0
}

fn default_call_timeout_ms() -> u64 {
    60_000
}

fn default_scroll_debounce_ms() -> u64 {
    100
}

fn default_pinch_min_samples() -> usize {
    4
}

fn default_max_texture_size() -> u32 {
    2048
}

fn default_sweep_steps_per_tick() -> usize {
    8
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            layout: LayoutConfigs::default(),
            markers: MarkerOptions::default(),
            vertical_page_margin: default_vertical_margin(),
            horizontal_page_margin: default_horizontal_margin(),
            call_timeout_ms: default_call_timeout_ms(),
            scroll_debounce_ms: default_scroll_debounce_ms(),
            pinch_min_samples: default_pinch_min_samples(),
            max_texture_size: default_max_texture_size(),
            sweep_steps_per_tick: default_sweep_steps_per_tick(),
        }
    }
}

impl ViewerConfig {
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    #[must_use]
    pub fn scroll_debounce(&self) -> Duration {
        Duration::from_millis(self.scroll_debounce_ms)
    }

    /// Read a settings file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self =
            serde_yaml::from_str(&content).map_err(|source| SettingsError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        debug!("Loaded settings from {path:?}");

        if config.version < CURRENT_VERSION {
            migrate_settings(&mut config);
        }
        Ok(config)
    }

    /// Like [`ViewerConfig::load`], but a missing file yields the defaults
    pub fn load_or_default(path: &Path) -> Result<Self, SettingsError> {
        if path.exists() {
            Self::load(path)
        } else {
            info!("Settings file {path:?} not found, using defaults");
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let write_error = |reason: String| SettingsError::Write {
            path: path.to_path_buf(),
            reason,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| write_error(e.to_string()))?;
        }
        let yaml = serde_yaml::to_string(self).map_err(|e| write_error(e.to_string()))?;
        fs::write(path, yaml).map_err(|e| write_error(e.to_string()))?;
        debug!("Saved settings to {path:?}");
        Ok(())
    }
}

fn migrate_settings(config: &mut ViewerConfig) {
    info!(
        "Migrating settings from v{} to v{}",
        config.version, CURRENT_VERSION
    );
    config.version = CURRENT_VERSION;
}

/// `<config dir>/pagebridge/config.yaml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = ViewerConfig::load_or_default(&dir.path().join("config.yaml")).unwrap();
        assert_eq!(config, ViewerConfig::default());
        assert_eq!(config.call_timeout(), Duration::from_secs(60));
        assert_eq!(config.scroll_debounce(), Duration::from_millis(100));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            concat!(
                "max_texture_size: 4096\n",
                "layout:\n  DiscardHeaders: false\n",
                "markers:\n  markAllPragarpahs: false\n",
            ),
        )
        .unwrap();

        let config = ViewerConfig::load(&path).unwrap();
        assert_eq!(config.max_texture_size, 4096);
        assert!(!config.layout.discard_headers);
        assert!(config.layout.discard_footers);
        assert!(!config.markers.mark_all_paragraphs);
        assert_eq!(config.pinch_min_samples, 4);
    }

    #[test]
    fn unparsable_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "max_texture_size: [not, a, number]\n").unwrap();
        assert!(matches!(
            ViewerConfig::load_or_default(&path),
            Err(SettingsError::Parse { .. })
        ));
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.yaml");
        let config = ViewerConfig {
            sweep_steps_per_tick: 3,
            ..ViewerConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(ViewerConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn old_version_is_migrated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "version: 0\n").unwrap();
        assert_eq!(ViewerConfig::load(&path).unwrap().version, CURRENT_VERSION);
    }
}
