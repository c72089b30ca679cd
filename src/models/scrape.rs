//! Scrape outcome envelope and persisted record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one scrape run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeStatus {
    Success,
    Error,
}

impl ScrapeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Success/error wrapper produced by each data-fetch attempt.
///
/// `data` is present if and only if `status` is `Success`; the payload is an
/// opaque structured value that is not interpreted further here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeEnvelope {
    pub status: ScrapeStatus,
    pub scraped_at: DateTime<Utc>,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_preview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<serde_json::Value>,
}

impl ScrapeEnvelope {
    pub fn success(url: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            status: ScrapeStatus::Success,
            scraped_at: Utc::now(),
            url: url.into(),
            data: Some(data),
            error: None,
            status_code: None,
            response_preview: None,
            error_details: None,
        }
    }

    pub fn error(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            status: ScrapeStatus::Error,
            scraped_at: Utc::now(),
            url: url.into(),
            data: None,
            error: Some(reason.into()),
            status_code: None,
            response_preview: None,
            error_details: None,
        }
    }

    pub fn with_status_code(mut self, code: u16) -> Self {
        self.status_code = Some(code);
        self
    }

    pub fn with_preview(mut self, preview: impl Into<String>) -> Self {
        self.response_preview = Some(preview.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.error_details = Some(details);
        self
    }
}

/// Immutable, append-only persisted scrape outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeRecord {
    pub id: i64,
    pub envelope: ScrapeEnvelope,
    pub scraped_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_present_iff_success() {
        let ok = ScrapeEnvelope::success("https://example.com", serde_json::json!([1, 2]));
        assert_eq!(ok.status, ScrapeStatus::Success);
        assert!(ok.data.is_some());
        assert!(ok.error.is_none());

        let err = ScrapeEnvelope::error("https://example.com", "boom");
        assert_eq!(err.status, ScrapeStatus::Error);
        assert!(err.data.is_none());
        assert_eq!(err.error.as_deref(), Some("boom"));
    }

    #[test]
    fn envelope_serializes_without_empty_fields() {
        let value =
            serde_json::to_value(ScrapeEnvelope::error("https://example.com", "boom")).unwrap();
        assert_eq!(value["status"], "error");
        assert!(value.get("data").is_none());
        assert!(value.get("status_code").is_none());
    }
}
