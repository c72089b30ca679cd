//! Application settings.
//!
//! Settings come from `scbadash.toml` in the data directory, overridden by
//! `SCBADASH_*` environment variables (a `.env` file is loaded by `main`).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default scrape interval in minutes when nothing is configured yet.
pub const DEFAULT_SCRAPE_INTERVAL_MINUTES: u32 = 15;

/// Default portal base URL.
pub const DEFAULT_BASE_URL: &str = "https://pstrax.com";

/// Application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Data directory holding the database and settings file.
    pub data_dir: PathBuf,
    /// Database file name inside the data directory.
    pub database_file: String,
    /// General application secret. The vault key is stretched from this
    /// when no dedicated encryption key is configured.
    pub secret_key: String,
    /// Dedicated encryption key; wins over `secret_key` when set.
    pub encryption_key: Option<String>,
    /// Base URL used when no portal credentials have been configured yet.
    pub default_base_url: String,
    /// Scrape interval used when no interval has been configured yet.
    pub default_interval_minutes: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database_file: "scbadash.db".to_string(),
            secret_key: String::new(),
            encryption_key: None,
            default_base_url: DEFAULT_BASE_URL.to_string(),
            default_interval_minutes: DEFAULT_SCRAPE_INTERVAL_MINUTES,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("scbadash"))
        .unwrap_or_else(|| PathBuf::from(".scbadash"))
}

impl Settings {
    /// Load settings: defaults, then the TOML file, then environment overrides.
    pub fn load(data_dir_override: Option<&Path>) -> anyhow::Result<Self> {
        let data_dir = data_dir_override
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("SCBADASH_DATA_DIR").map(PathBuf::from))
            .unwrap_or_else(default_data_dir);

        let mut settings = Self {
            data_dir: data_dir.clone(),
            ..Self::default()
        };

        let path = data_dir.join("scbadash.toml");
        if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            settings = toml::from_str(&raw)?;
            // The directory we found the file in always wins over the value
            // stored inside it.
            settings.data_dir = data_dir;
        }

        if let Ok(secret) = std::env::var("SCBADASH_SECRET_KEY") {
            settings.secret_key = secret;
        }
        if let Ok(key) = std::env::var("SCBADASH_ENCRYPTION_KEY") {
            if !key.is_empty() {
                settings.encryption_key = Some(key);
            }
        }

        Ok(settings)
    }

    /// Path of the SQLite database.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    /// Secret the vault key is derived from. A dedicated encryption key
    /// takes precedence over the general application secret.
    pub fn vault_secret(&self) -> &str {
        match &self.encryption_key {
            Some(key) if !key.is_empty() => key,
            _ => &self.secret_key,
        }
    }
}
