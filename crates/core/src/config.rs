//! Daemon configuration (TOML file plus environment overrides)

use std::path::{Path, PathBuf};
use std::time::Duration;

use color_eyre::eyre::{bail, Result, WrapErr};
use serde::{Deserialize, Serialize};

/// Environment variables that override the config file
const ENV_SERVER_URL: &str = "YSYNC_SERVER_URL";
const ENV_API_KEY: &str = "YSYNC_API_KEY";
const ENV_USER_ID: &str = "YSYNC_USER_ID";
const ENV_LOCAL_FOLDER: &str = "YSYNC_LOCAL_FOLDER";

/// Full daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub sync: SyncConfig,
    pub watch: WatchConfig,
    /// Shell-style globs matched against path components
    pub ignore: Vec<String>,
    pub logging: LoggingConfig,
}

/// Workspace server connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub url: String,
    pub api_key: String,
    pub user_id: String,
}

/// Synchronization settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub local_folder: PathBuf,
    /// Periodic full-sync interval in seconds; 0 disables periodic sync
    pub interval_secs: u64,
    pub bidirectional: bool,
}

/// File-watching settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub enabled: bool,
    /// Quiet period per path before an event is delivered
    pub debounce_ms: u64,
}

/// Logging settings, consumed by the CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8200".to_string(),
            api_key: String::new(),
            user_id: String::new(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            local_folder: PathBuf::new(),
            interval_secs: 30,
            bidirectional: true,
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: 500,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            sync: SyncConfig::default(),
            watch: WatchConfig::default(),
            ignore: default_ignore_patterns(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Patterns excluded from sync out of the box: VCS metadata, editor swap
/// files, OS droppings, and ecosystem caches.
#[must_use]
pub fn default_ignore_patterns() -> Vec<String> {
    [
        ".git",
        ".DS_Store",
        "*.tmp",
        "*.temp",
        "*.swp",
        "*.swo",
        "node_modules",
        "__pycache__",
        ".pytest_cache",
        "*.log",
        "Thumbs.db",
        "desktop.ini",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

/// Default config file location: `~/.ysync/config.toml`
#[must_use]
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ysync")
        .join("config.toml")
}

impl SyncConfig {
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl WatchConfig {
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Config {
    /// Load configuration: defaults, merged with the file when present,
    /// then environment overrides.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .wrap_err_with(|| format!("failed to read config file {}", path.display()))?;
            toml::from_str(&content)
                .wrap_err_with(|| format!("failed to parse config file {}", path.display()))?
        } else {
            Self::default()
        };

        if let Ok(url) = std::env::var(ENV_SERVER_URL) {
            if !url.is_empty() {
                config.server.url = url;
            }
        }
        if let Ok(api_key) = std::env::var(ENV_API_KEY) {
            if !api_key.is_empty() {
                config.server.api_key = api_key;
            }
        }
        if let Ok(user_id) = std::env::var(ENV_USER_ID) {
            if !user_id.is_empty() {
                config.server.user_id = user_id;
            }
        }
        if let Ok(folder) = std::env::var(ENV_LOCAL_FOLDER) {
            if !folder.is_empty() {
                config.sync.local_folder = PathBuf::from(folder);
            }
        }

        Ok(config)
    }

    /// Check the fields the daemon cannot start without.
    ///
    /// # Errors
    /// Returns an error naming the first missing or invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.server.url.is_empty() {
            bail!("server URL is required");
        }
        if self.server.user_id.is_empty() {
            bail!("user ID is required");
        }
        if self.sync.local_folder.as_os_str().is_empty() {
            bail!("local folder is required");
        }
        if !self.sync.local_folder.exists() {
            bail!(
                "local folder does not exist: {}",
                self.sync.local_folder.display()
            );
        }
        Ok(())
    }

    /// Write the configuration as TOML, creating parent directories.
    ///
    /// # Errors
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)
            .wrap_err_with(|| format!("failed to write config file {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.url, "http://localhost:8200");
        assert_eq!(config.sync.interval(), Duration::from_secs(30));
        assert!(config.sync.bidirectional);
        assert!(config.watch.enabled);
        assert_eq!(config.watch.debounce(), Duration::from_millis(500));
        assert!(config.ignore.contains(&".git".to_string()));
        assert!(config.ignore.contains(&"node_modules".to_string()));
    }

    #[test]
    fn test_parse_partial_file() {
        let toml = r#"
[server]
url = "https://sync.example.com"
user_id = "u-42"

[watch]
debounce_ms = 100
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.url, "https://sync.example.com");
        assert_eq!(config.server.user_id, "u-42");
        assert_eq!(config.watch.debounce(), Duration::from_millis(100));
        // untouched sections keep defaults
        assert_eq!(config.sync.interval_secs, 30);
        assert!(!config.ignore.is_empty());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.server.user_id = "u-7".to_string();
        config.sync.local_folder = dir.path().to_path_buf();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.server.user_id, "u-7");
        assert_eq!(loaded.sync.local_folder, dir.path());
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.server.url, "http://localhost:8200");
    }

    #[test]
    fn test_validate_rejects_missing_fields() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.server.user_id = "u-1".to_string();
        config.sync.local_folder = dir.path().to_path_buf();
        assert!(config.validate().is_ok());

        config.server.user_id.clear();
        assert!(config.validate().is_err());

        config.server.user_id = "u-1".to_string();
        config.sync.local_folder = dir.path().join("does-not-exist");
        assert!(config.validate().is_err());

        config.sync.local_folder = dir.path().to_path_buf();
        config.server.url.clear();
        assert!(config.validate().is_err());
    }
}
