//! Configuration loading and management for flowcap.
//!
//! Loads settings from `flowcap.toml` with environment variable overrides for
//! endpoints and credentials.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_API_BASE_URL: &str = "http://localhost:3001/api/v1";
const DEFAULT_DASHBOARD_URL: &str = "http://localhost:3000";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("missing auth setting: {0}")]
    MissingAuth(&'static str),
}

/// Backend endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the workflow REST API, including the version prefix
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
    /// Dashboard opened after a successful save
    #[serde(default = "default_dashboard_url")]
    pub dashboard_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Supabase credentials (usually loaded from the environment)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub supabase_url: Option<String>,
    #[serde(default)]
    pub supabase_anon_key: Option<String>,
}

/// Storage paths configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base path for data storage
    pub path: PathBuf,
}

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration from the default location (flowcap.toml in cwd or home).
    /// Falls back to defaults when no file exists.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::find_config_file() {
            Some(path) => Self::read(&path)?,
            None => Config::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::read(path)?;
        config.apply_env();
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("FLOWCAP_API_URL") {
            self.api.base_url = url;
        }
        if let Ok(url) = std::env::var("FLOWCAP_DASHBOARD_URL") {
            self.api.dashboard_url = url;
        }
        if let Ok(url) = std::env::var("SUPABASE_URL") {
            self.auth.supabase_url = Some(url);
        }
        if let Ok(key) = std::env::var("SUPABASE_ANON_KEY") {
            self.auth.supabase_anon_key = Some(key);
        }
    }

    /// Find the config file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        // Check current directory first
        let local_config = PathBuf::from("flowcap.toml");
        if local_config.exists() {
            return Some(local_config);
        }

        // Check home directory
        let home_config = dirs::home_dir()?
            .join(".config")
            .join("flowcap")
            .join("flowcap.toml");
        home_config.exists().then_some(home_config)
    }

    /// Supabase project URL and anon key, both required for login
    pub fn supabase(&self) -> Result<(&str, &str), ConfigError> {
        let url = self
            .auth
            .supabase_url
            .as_deref()
            .ok_or(ConfigError::MissingAuth("supabase_url"))?;
        let key = self
            .auth
            .supabase_anon_key
            .as_deref()
            .ok_or(ConfigError::MissingAuth("supabase_anon_key"))?;
        Ok((url, key))
    }

    /// Where the dashboard lists saved workflows
    pub fn workflows_url(&self) -> String {
        format!("{}/workflows", self.api.dashboard_url.trim_end_matches('/'))
    }
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_dashboard_url() -> String {
    DEFAULT_DASHBOARD_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            dashboard_url: default_dashboard_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[api]\ndashboard_url = \"https://dash.example.com/\"\n\n[storage]\npath = \"/tmp/flowcap\""
        )
        .unwrap();

        let config = Config::read(file.path()).unwrap();
        assert_eq!(config.api.base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(config.storage.path, PathBuf::from("/tmp/flowcap"));
        assert_eq!(config.workflows_url(), "https://dash.example.com/workflows");
    }

    #[test]
    fn invalid_toml_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[api\nbase_url = 1").unwrap();
        assert!(matches!(
            Config::read(file.path()),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn supabase_requires_both_settings() {
        let mut config = Config::default();
        config.auth.supabase_url = Some("https://proj.supabase.co".into());
        assert!(matches!(
            config.supabase(),
            Err(ConfigError::MissingAuth("supabase_anon_key"))
        ));

        config.auth.supabase_anon_key = Some("anon".into());
        assert_eq!(
            config.supabase().unwrap(),
            ("https://proj.supabase.co", "anon")
        );
    }
}
