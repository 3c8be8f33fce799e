//! Configuration management (config.toml)
//!
//! Handles loading, saving, and providing defaults for sink settings.
//! Settings are stored in TOML format in the platform-specific config directory.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::sink::{DEFAULT_MAX_QUEUE_SIZE, SinkId};

/// Sink configuration file.
///
/// Serialized to/from TOML format for persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    /// Audio sink settings
    #[serde(default)]
    pub audio: AudioConfig,
}

/// Audio sink configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Sink backend (default: auto)
    #[serde(default)]
    pub sink: SinkId,
    /// Output device name (default: host default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_device: Option<String>,
    /// Input device name (default: host default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_device: Option<String>,
    /// User volume (default: 1.0, above 1.0 boosts)
    #[serde(default = "default_volume")]
    pub volume: f32,
    /// Submissions queued before producers are throttled (default: 4)
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
}

fn default_volume() -> f32 {
    1.0
}
fn default_max_queue_size() -> usize {
    DEFAULT_MAX_QUEUE_SIZE
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sink: SinkId::default(),
            output_device: None,
            input_device: None,
            volume: default_volume(),
            max_queue_size: default_max_queue_size(),
        }
    }
}

/// Returns the platform-specific configuration directory.
///
/// On Windows: `%APPDATA%\Nethercore\NetherSink\config`
/// On macOS: `~/Library/Application Support/io.nethercore.NetherSink`
/// On Linux: `~/.config/nethersink`
///
/// Returns `None` if the home directory cannot be determined.
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("io", "nethercore", "NetherSink")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Loads the configuration from disk.
///
/// Reads `config.toml` from the platform's configuration directory.
/// Returns default values if the file doesn't exist or cannot be parsed.
pub fn load() -> Config {
    config_dir()
        .map(|dir| load_from(&dir.join("config.toml")))
        .unwrap_or_default()
}

/// Loads the configuration from an explicit path, defaulting on any error.
pub fn load_from(path: &Path) -> Config {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Config::default();
    };
    match toml::from_str(&content) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("Ignoring malformed {}: {}", path.display(), e);
            Config::default()
        }
    }
}

/// Saves the configuration to disk.
///
/// Writes `config.toml` to the platform's configuration directory.
/// Creates the directory if it doesn't exist.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or the file
/// cannot be written.
pub fn save(config: &Config) -> std::io::Result<()> {
    match config_dir() {
        Some(dir) => save_to(config, &dir.join("config.toml")),
        None => Ok(()),
    }
}

/// Saves the configuration to an explicit path, creating parent directories.
pub fn save_to(config: &Config, path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    std::fs::write(path, content)
}

#[cfg(test)]
mod tests {
    use super::*;

    // =============================================================
    // Default value tests
    // =============================================================

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.audio.sink, SinkId::Auto);
        assert!(config.audio.output_device.is_none());
        assert!((config.audio.volume - 1.0).abs() < f32::EPSILON);
        assert_eq!(config.audio.max_queue_size, DEFAULT_MAX_QUEUE_SIZE);
    }

    #[test]
    fn test_config_deserialize_empty() {
        // Empty TOML should produce defaults
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_config_deserialize_partial_audio() {
        let toml_str = r#"
[audio]
sink = "null"
volume = 0.3
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.audio.sink, SinkId::Null);
        assert!((config.audio.volume - 0.3).abs() < f32::EPSILON);
        assert_eq!(config.audio.max_queue_size, DEFAULT_MAX_QUEUE_SIZE); // default
    }

    #[test]
    fn test_config_rejects_unknown_sink() {
        let toml_str = r#"
[audio]
sink = "cubeb"
"#;
        assert!(toml::from_str::<Config>(toml_str).is_err());
    }

    // =============================================================
    // Filesystem tests
    // =============================================================

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config {
            audio: AudioConfig {
                sink: SinkId::Cpal,
                output_device: Some("Speakers".to_string()),
                input_device: None,
                volume: 1.5,
                max_queue_size: 8,
            },
        };

        save_to(&config, &path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("sink = \"cpal\""));
        assert!(!content.contains("input_device"));

        assert_eq!(load_from(&path), config);
    }

    #[test]
    fn test_load_missing_or_malformed_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert_eq!(load_from(&missing), Config::default());

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "[audio\nvolume = ").unwrap();
        assert_eq!(load_from(&broken), Config::default());
    }
}
