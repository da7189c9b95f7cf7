//! Configuration file support for bbconsole.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (BBCONSOLE_*)
//! 3. Local config file (./bbconsole.toml)
//! 4. Global config file (~/.config/bbconsole/config.toml)

use directories::ProjectDirs;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred peripheral, by platform identifier or advertised name.
    pub device: Option<String>,
}

/// Scan configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Liveness window in seconds before a silent peripheral is dropped.
    pub window_secs: Option<u64>,
    /// List every advertiser instead of the known console device families.
    #[serde(default)]
    pub show_all: bool,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Scan settings.
    #[serde(default)]
    pub scan: ScanConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                if let Some(global_config) = Self::load_from_file(&global_path) {
                    debug!("Loaded global config from {}", global_path.display());
                    config.merge(global_config);
                }
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new("bbconsole.toml")) {
            debug!("Loaded local config from bbconsole.toml");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "bbconsole").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.connection.device.is_some() {
            self.connection.device = other.connection.device;
        }
        if other.scan.window_secs.is_some() {
            self.scan.window_secs = other.scan.window_secs;
        }
        if other.scan.show_all {
            self.scan.show_all = true;
        }
    }

    /// Remember a peripheral as the default connect target.
    pub fn remember_device(&mut self, device: &str) -> anyhow::Result<()> {
        self.connection.device = Some(device.to_string());

        // Prefer the local file when one is already in use, else global.
        let path = if Path::new("bbconsole.toml").exists() {
            PathBuf::from("bbconsole.toml")
        } else if let Some(global_dir) = Self::global_config_dir() {
            fs::create_dir_all(&global_dir)?;
            global_dir.join("config.toml")
        } else {
            PathBuf::from("bbconsole.toml")
        };

        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        info!("Saved device to {}", path.display());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---- Default values ----

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.connection.device.is_none());
        assert!(config.scan.window_secs.is_none());
        assert!(!config.scan.show_all);
    }

    // ---- Config merge ----

    #[test]
    fn test_config_merge_device() {
        let mut base = Config::default();
        let mut other = Config::default();
        other.connection.device = Some("BASIC#00:11".to_string());

        base.merge(other);
        assert_eq!(base.connection.device.as_deref(), Some("BASIC#00:11"));
    }

    #[test]
    fn test_config_merge_overrides_existing() {
        let mut base = Config::default();
        base.connection.device = Some("old".to_string());

        let mut other = Config::default();
        other.connection.device = Some("new".to_string());

        base.merge(other);
        assert_eq!(base.connection.device.as_deref(), Some("new"));
    }

    #[test]
    fn test_config_merge_does_not_overwrite_with_none() {
        let mut base = Config::default();
        base.connection.device = Some("BASIC#00:11".to_string());
        base.scan.window_secs = Some(30);

        let other = Config::default(); // all None
        base.merge(other);

        assert_eq!(base.connection.device.as_deref(), Some("BASIC#00:11"));
        assert_eq!(base.scan.window_secs, Some(30));
    }

    #[test]
    fn test_config_merge_show_all_is_sticky() {
        let mut base = Config::default();
        let mut other = Config::default();
        other.scan.show_all = true;
        base.merge(other);
        assert!(base.scan.show_all);

        base.merge(Config::default());
        assert!(base.scan.show_all);
    }

    // ---- TOML serialization/deserialization ----

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[connection]
device = "BASIC#AA:BB"

[scan]
window_secs = 20
show_all = true
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.connection.device.as_deref(), Some("BASIC#AA:BB"));
        assert_eq!(config.scan.window_secs, Some(20));
        assert!(config.scan.show_all);
    }

    #[test]
    fn test_config_from_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.connection.device.is_none());
        assert!(config.scan.window_secs.is_none());
    }

    #[test]
    fn test_config_from_partial_toml() {
        let toml_str = r#"
[scan]
window_secs = 10
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(config.connection.device.is_none());
        assert_eq!(config.scan.window_secs, Some(10));
        assert!(!config.scan.show_all);
    }

    #[test]
    fn test_config_roundtrip_toml() {
        let mut config = Config::default();
        config.connection.device = Some("hci0/dev_AA_BB".to_string());
        config.scan.window_secs = Some(25);
        config.scan.show_all = true;

        let serialized = toml::to_string_pretty(&config).unwrap();
        let deserialized: Config = toml::from_str(&serialized).unwrap();

        assert_eq!(
            deserialized.connection.device.as_deref(),
            Some("hci0/dev_AA_BB")
        );
        assert_eq!(deserialized.scan.window_secs, Some(25));
        assert!(deserialized.scan.show_all);
    }

    // ---- load_from_path ----

    #[test]
    fn test_load_from_path_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test_config.toml");
        fs::write(
            &path,
            r#"
[connection]
device = "BlueBattery 12V"
"#,
        )
        .unwrap();

        let config = Config::load_from_path(&path);
        assert_eq!(config.connection.device.as_deref(), Some("BlueBattery 12V"));
    }

    #[test]
    fn test_load_from_path_nonexistent() {
        let config = Config::load_from_path(Path::new("/nonexistent/path/config.toml"));
        // Should return default
        assert!(config.connection.device.is_none());
    }

    #[test]
    fn test_load_from_path_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "this is not { toml").unwrap();

        let config = Config::load_from_path(&path);
        assert!(config.connection.device.is_none());
    }

    // ---- global_config_path ----

    #[test]
    fn test_global_config_path_is_some() {
        // On most systems this should return Some
        if let Some(p) = Config::global_config_path() {
            assert!(p.to_str().unwrap().contains("bbconsole"));
            assert!(p.to_str().unwrap().ends_with("config.toml"));
        }
    }
}
