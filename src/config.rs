use crate::excludes::Excludes;
use anyhow::{bail, Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Name of the device used when none is given
pub const DEFAULT_DEVICE: &str = "default";

/// Port used when neither the command line nor the config names one
pub const DEFAULT_PORT: u16 = 80;

/// Password of a factory-fresh RepRapFirmware board
pub const DEFAULT_PASSWORD: &str = "reprap";

/// Stored connection settings, keyed by device name
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceConfig>,
}

/// Connection and exclude settings of one device
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DeviceConfig {
    /// Host name or IP address of the board
    #[serde(default)]
    pub domain: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_password")]
    pub password: String,

    /// Exclude lists remembered per command
    #[serde(default)]
    pub excludes: ExcludeLists,
}

/// Exclude patterns remembered for `backup` and `upload`
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct ExcludeLists {
    #[serde(default)]
    pub backup: Excludes,

    #[serde(default)]
    pub upload: Excludes,
}

/// Which stored exclude list a command uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExcludeKind {
    Backup,
    Upload,
}

/// Connection settings given on the command line
///
/// `None` means the flag was absent and the stored value applies.
#[derive(Debug, Clone, Default)]
pub struct ConnectionOverrides {
    pub device: String,
    pub domain: Option<String>,
    pub port: Option<u16>,
    pub password: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_password() -> String {
    DEFAULT_PASSWORD.to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            domain: String::new(),
            port: DEFAULT_PORT,
            password: default_password(),
            excludes: ExcludeLists::default(),
        }
    }
}

impl Config {
    /// Load the config at `path`, or an empty one if the file does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!("No configuration at {:?}, starting empty", path);
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        // An empty file is a valid, empty config
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(config)
    }

    /// Save configuration, replacing the file atomically
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let tmp_path = path.with_extension("yml.tmp");
        std::fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", tmp_path))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("Failed to replace config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("rfm").join("config.yml"))
    }

    pub fn device(&self, name: &str) -> Option<&DeviceConfig> {
        self.devices.get(name)
    }

    /// Merge command line settings into the named device and return the result
    ///
    /// Flags that were given overwrite the stored values; a device that does
    /// not exist yet is created from the flags and defaults.
    pub fn resolve_device(&mut self, overrides: &ConnectionOverrides) -> Result<&mut DeviceConfig> {
        let device = self.devices.entry(overrides.device.clone()).or_default();

        if let Some(domain) = &overrides.domain {
            device.domain = domain.clone();
        }
        if let Some(port) = overrides.port {
            device.port = port;
        }
        if let Some(password) = &overrides.password {
            device.password = password.clone();
        }

        if device.domain.trim().is_empty() {
            bail!(
                "No domain configured for device '{}', pass --domain",
                overrides.device
            );
        }

        Ok(device)
    }
}

impl DeviceConfig {
    /// Exclude patterns for a command
    ///
    /// Patterns given on the command line replace the stored list for that
    /// command; without any the stored list is used.
    pub fn resolve_excludes(&mut self, kind: ExcludeKind, given: Vec<String>) -> Excludes {
        let stored = match kind {
            ExcludeKind::Backup => &mut self.excludes.backup,
            ExcludeKind::Upload => &mut self.excludes.upload,
        };
        if !given.is_empty() {
            *stored = Excludes::from(given);
        }
        stored.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn overrides(device: &str) -> ConnectionOverrides {
        ConnectionOverrides {
            device: device.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_device_default_values() {
        let device = DeviceConfig::default();

        assert!(device.domain.is_empty());
        assert_eq!(device.port, 80);
        assert_eq!(device.password, "reprap");
        assert!(device.excludes.backup.is_empty());
        assert!(device.excludes.upload.is_empty());
    }

    #[test]
    fn test_config_load_nonexistent_file() {
        let nonexistent_path = Path::new("/nonexistent/path/config.yml");
        assert!(Config::load(nonexistent_path).is_err());

        let config = Config::load_or_default(nonexistent_path).expect("missing file is empty config");
        assert!(config.devices.is_empty());
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("rfm").join("config.yml");

        let mut config = Config::default();
        let device = config
            .resolve_device(&ConnectionOverrides {
                device: "printer".to_string(),
                domain: Some("192.168.1.20".to_string()),
                port: Some(8080),
                password: None,
            })
            .unwrap();
        device.resolve_excludes(ExcludeKind::Backup, vec!["0:/sys/old".to_string()]);

        config.save(&config_path).expect("Failed to save config");
        assert!(!config_path.with_extension("yml.tmp").exists());

        let loaded = Config::load(&config_path).expect("Failed to load config");
        assert_eq!(loaded, config);

        let device = loaded.device("printer").unwrap();
        assert_eq!(device.domain, "192.168.1.20");
        assert_eq!(device.port, 8080);
        assert_eq!(device.password, "reprap");
        assert_eq!(device.excludes.backup.patterns(), ["0:/sys/old".to_string()]);
    }

    #[test]
    fn test_resolve_device_prefers_flags_and_writes_back() {
        let mut config = Config::default();
        config.devices.insert(
            "default".to_string(),
            DeviceConfig {
                domain: "old.local".to_string(),
                port: 81,
                password: "secret".to_string(),
                excludes: ExcludeLists::default(),
            },
        );

        let mut flags = overrides("default");
        flags.domain = Some("new.local".to_string());
        let resolved = config.resolve_device(&flags).unwrap().clone();

        assert_eq!(resolved.domain, "new.local");
        assert_eq!(resolved.port, 81);
        assert_eq!(resolved.password, "secret");
        assert_eq!(config.device("default").unwrap().domain, "new.local");
    }

    #[test]
    fn test_resolve_device_requires_domain() {
        let mut config = Config::default();
        let err = config.resolve_device(&overrides("default")).unwrap_err();
        assert!(err.to_string().contains("--domain"));
    }

    #[test]
    fn test_resolve_excludes_replaces_only_when_given() {
        let mut device = DeviceConfig::default();
        device.excludes.upload = Excludes::from(vec!["/home/user/old".to_string()]);

        let stored = device.resolve_excludes(ExcludeKind::Upload, Vec::new());
        assert_eq!(stored.patterns(), ["/home/user/old".to_string()]);

        let given = device.resolve_excludes(ExcludeKind::Upload, vec!["/tmp".to_string()]);
        assert_eq!(given.patterns(), ["/tmp".to_string()]);
        assert_eq!(device.excludes.upload.patterns(), ["/tmp".to_string()]);
        assert!(device.excludes.backup.is_empty());
    }

    #[test]
    #[serial]
    fn test_config_default_path_xdg() {
        std::env::set_var("XDG_CONFIG_HOME", "/test/xdg");
        let default_path = Config::default_config_path().expect("Failed to get default path");
        std::env::remove_var("XDG_CONFIG_HOME");

        assert!(default_path.to_string_lossy().contains("rfm"));
        assert!(default_path.to_string_lossy().ends_with("config.yml"));
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml_content = r#"
devices:
  default:
    domain: printer.local
    excludes:
      backup:
        - "0:/sys/old"
        - "0:/sys/tmp"
  spare:
    domain: 10.0.0.5
    port: 8080
    password: hunter2
"#;

        let config: Config = serde_yaml::from_str(yaml_content).expect("Failed to parse YAML");

        let default = config.device("default").unwrap();
        assert_eq!(default.domain, "printer.local");
        assert_eq!(default.port, 80);
        assert_eq!(default.password, "reprap");
        assert_eq!(default.excludes.backup.patterns().len(), 2);
        assert!(default.excludes.upload.is_empty());

        let spare = config.device("spare").unwrap();
        assert_eq!(spare.port, 8080);
        assert_eq!(spare.password, "hunter2");
    }

    #[test]
    fn test_empty_file_is_empty_config() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.yml");
        std::fs::write(&path, "").unwrap();

        assert_eq!(Config::load(&path).unwrap(), Config::default());
    }
}
