//! Portal credential and scheduling configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_BASE_URL, DEFAULT_SCRAPE_INTERVAL_MINUTES};

/// Singleton configuration row for the portal scrape.
///
/// The password is held only in encrypted form; it is decrypted on demand
/// for each scrape attempt and never persisted or logged in plaintext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeConfig {
    /// Portal base URL.
    pub base_url: String,
    /// Portal login username.
    pub username: Option<String>,
    /// base64(nonce || ciphertext) of the portal password.
    #[serde(skip_serializing, default)]
    pub password_encrypted: Option<String>,
    /// When the last scrape run finished (success or error).
    pub last_scrape: Option<DateTime<Utc>>,
    /// Desired poll interval in minutes.
    pub scrape_interval_minutes: u32,
    /// When this row was last modified.
    pub updated_at: DateTime<Utc>,
}

impl ScrapeConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            username: None,
            password_encrypted: None,
            last_scrape: None,
            scrape_interval_minutes: DEFAULT_SCRAPE_INTERVAL_MINUTES,
            updated_at: Utc::now(),
        }
    }

    /// Base URL with a fallback when the stored value is empty.
    pub fn effective_base_url(&self) -> &str {
        if self.base_url.is_empty() {
            DEFAULT_BASE_URL
        } else {
            &self.base_url
        }
    }

    /// Whether enough is configured for a scrape run to be attempted.
    pub fn has_credentials(&self) -> bool {
        self.username.as_deref().is_some_and(|u| !u.is_empty())
            && self.password_encrypted.as_deref().is_some_and(|p| !p.is_empty())
    }
}
