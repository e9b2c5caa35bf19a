//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/vitalsync/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/vitalsync/` (~/.config/vitalsync/)
//! - Data: `$XDG_DATA_HOME/vitalsync/` (~/.local/share/vitalsync/)
//! - State/Logs: `$XDG_STATE_HOME/vitalsync/` (~/.local/state/vitalsync/)

use crate::error::{Error, Result};
use crate::scoring::VitalityPolicy;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Who the samples belong to
    #[serde(default)]
    pub user: UserConfig,

    /// Daily goals stamped onto health samples
    #[serde(default)]
    pub goals: GoalsConfig,

    /// Remote dashboard sink
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Sync scheduling
    #[serde(default)]
    pub sync: SyncConfig,

    /// App category allow-lists
    #[serde(default)]
    pub categories: CategoryConfig,

    /// File-backed capability locations (desktop host)
    #[serde(default)]
    pub capabilities: CapabilityConfig,

    /// Vitality policy table overrides
    #[serde(default)]
    pub vitality: VitalityPolicy,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// User identity and profile
#[derive(Debug, Deserialize, Clone)]
pub struct UserConfig {
    #[serde(default = "default_user_id")]
    pub user_id: String,

    /// Needed for the vitality score
    pub birth_year: Option<i32>,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            user_id: default_user_id(),
            birth_year: None,
        }
    }
}

fn default_user_id() -> String {
    "user-1".to_string()
}

/// Daily goals
#[derive(Debug, Deserialize, Clone)]
pub struct GoalsConfig {
    #[serde(default = "default_steps_goal")]
    pub steps: u32,

    #[serde(default = "default_sleep_goal")]
    pub sleep_hours: f64,
}

impl Default for GoalsConfig {
    fn default() -> Self {
        Self {
            steps: default_steps_goal(),
            sleep_hours: default_sleep_goal(),
        }
    }
}

fn default_steps_goal() -> u32 {
    10_000
}

fn default_sleep_goal() -> f64 {
    8.0
}

/// Dashboard sink configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    /// Dashboard base URL (e.g., `https://dashboard.example.com/api`)
    pub server_url: Option<String>,

    /// Optional bearer token
    pub api_key: Option<String>,

    /// HTTP request timeout in seconds
    #[serde(default = "default_remote_timeout")]
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            api_key: None,
            timeout_secs: default_remote_timeout(),
        }
    }
}

fn default_remote_timeout() -> u64 {
    30
}

impl RemoteConfig {
    /// Check if a sink can be built from this configuration
    pub fn is_ready(&self) -> bool {
        self.validate().is_ok()
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        let url = self
            .server_url
            .as_deref()
            .ok_or_else(|| Error::Config("remote.server_url is required".to_string()))?;

        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "remote.server_url must be an http(s) URL, got {:?}",
                url
            )));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config(
                "remote.timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Sync scheduling configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Minimum seconds between background/app-open syncs
    #[serde(default = "default_min_interval")]
    pub min_interval_secs: u64,

    /// Days of health samples blended into the vitality score
    #[serde(default = "default_vitality_window")]
    pub vitality_window_days: u32,

    /// Upper bound in seconds for reading one day from a capability
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: default_min_interval(),
            vitality_window_days: default_vitality_window(),
            fetch_timeout_secs: default_fetch_timeout(),
        }
    }
}

fn default_min_interval() -> u64 {
    5 * 60
}

fn default_vitality_window() -> u32 {
    7
}

fn default_fetch_timeout() -> u64 {
    30
}

impl SyncConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }
}

/// App category allow-lists, matched as substrings of the app id
#[derive(Debug, Deserialize, Clone)]
pub struct CategoryConfig {
    #[serde(default = "default_productive_apps")]
    pub productive: Vec<String>,

    #[serde(default = "default_entertainment_apps")]
    pub entertainment: Vec<String>,
}

impl Default for CategoryConfig {
    fn default() -> Self {
        Self {
            productive: default_productive_apps(),
            entertainment: default_entertainment_apps(),
        }
    }
}

fn default_productive_apps() -> Vec<String> {
    [
        "com.microsoft.Word",
        "com.microsoft.Excel",
        "com.microsoft.PowerPoint",
        "com.apple.iWork.Pages",
        "com.apple.iWork.Numbers",
        "com.apple.iWork.Keynote",
        "com.notion.iOS",
        "com.slack",
        "com.tinyspeck.chatlyio",
        "com.figma.FigmaMirror",
        "com.culturedcode.ThingsiPhone",
        "com.omnigroup.OmniFocus3",
        "com.flexibits.fantastical2.iphone",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_entertainment_apps() -> Vec<String> {
    [
        "com.apple.TV",
        "com.netflix.Netflix",
        "com.youtube.youtube",
        "com.twitch.twitch",
        "com.tiktok.tiktok",
        "com.instagram.Instagram",
        "com.facebook.Facebook",
        "com.twitter.twitter",
        "com.reddit.Reddit",
        "com.zillow.zillowmap",
        "com.duolingo.DuolingoMobile",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Where file-backed capabilities read their daily exports from
#[derive(Debug, Deserialize, Clone, Default)]
pub struct CapabilityConfig {
    /// Directory with `health/<date>.json` exports
    pub health_dir: Option<PathBuf>,
    /// Directory with `usage/<date>.json` exports
    pub usage_dir: Option<PathBuf>,
}

impl CapabilityConfig {
    /// Health export root, defaulting to the data directory
    pub fn health_root(&self) -> PathBuf {
        self.health_dir
            .clone()
            .unwrap_or_else(|| Config::data_dir().join("exports"))
    }

    /// Usage export root, defaulting to the data directory
    pub fn usage_root(&self) -> PathBuf {
        self.usage_dir
            .clone()
            .unwrap_or_else(|| Config::data_dir().join("exports"))
    }
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/vitalsync/config.toml` (~/.config/vitalsync/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("vitalsync").join("config.toml")
    }

    /// Returns the data directory path (for the state database)
    ///
    /// `$XDG_DATA_HOME/vitalsync/` (~/.local/share/vitalsync/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("vitalsync")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/vitalsync/` (~/.local/state/vitalsync/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("vitalsync")
    }

    /// Returns the state database file path
    ///
    /// `$XDG_DATA_HOME/vitalsync/state.db`
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("state.db")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/vitalsync/vitalsync.log`
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("vitalsync.log")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.user.user_id, "user-1");
        assert!(config.user.birth_year.is_none());
        assert_eq!(config.goals.steps, 10_000);
        assert_eq!(config.goals.sleep_hours, 8.0);
        assert_eq!(config.sync.min_interval_secs, 300);
        assert_eq!(config.sync.vitality_window_days, 7);
        assert_eq!(config.sync.fetch_timeout(), Duration::from_secs(30));
        assert_eq!(config.remote.timeout_secs, 30);
        assert!(!config.remote.is_ready());
        assert!(config
            .categories
            .productive
            .iter()
            .any(|app| app == "com.notion.iOS"));
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[user]
user_id = "will"
birth_year = 1995

[goals]
steps = 12000

[remote]
server_url = "https://dashboard.example.com/api"
timeout_secs = 10

[sync]
min_interval_secs = 900
fetch_timeout_secs = 0

[categories]
productive = ["org.vim"]

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.user.user_id, "will");
        assert_eq!(config.user.birth_year, Some(1995));
        assert_eq!(config.goals.steps, 12000);
        assert_eq!(config.goals.sleep_hours, 8.0);
        assert!(config.remote.is_ready());
        assert_eq!(config.remote.timeout(), Duration::from_secs(10));
        assert_eq!(config.sync.min_interval(), Duration::from_secs(900));
        // Zero would fail every fetch; it is raised to one second.
        assert_eq!(config.sync.fetch_timeout(), Duration::from_secs(1));
        assert_eq!(config.categories.productive, vec!["org.vim".to_string()]);
        assert!(!config.categories.entertainment.is_empty());
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_remote_config_validation() {
        let config = RemoteConfig::default();
        assert!(config.validate().is_err());

        let config = RemoteConfig {
            server_url: Some("ftp://dashboard".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = RemoteConfig {
            server_url: Some("http://localhost:3000/api".to_string()),
            timeout_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = RemoteConfig {
            server_url: Some("http://localhost:3000/api".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
