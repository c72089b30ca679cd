//! Portal scraper: login-form extraction, session login, and data fetch.

pub mod fetch;
pub mod form;
pub mod session;

pub use fetch::DataFetcher;
pub use form::{extract_login_form, FieldMatch, FieldRole, LoginForm};
pub use session::SessionClient;

use async_trait::async_trait;
use serde::Serialize;

use crate::models::ScrapeEnvelope;

/// Maximum length of a response-body preview carried for diagnosis.
pub const PREVIEW_LEN: usize = 500;

/// Substring of a URL that marks it as part of the login flow.
pub const LOGIN_PATH_MARKER: &str = "login";

/// Truncate a response body to a bounded diagnostic preview.
pub fn preview(body: &str) -> String {
    let mut end = PREVIEW_LEN.min(body.len());
    // Back off to a char boundary so we never split a multi-byte sequence.
    while end < body.len() && !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

/// The step at which a login attempt stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginStep {
    AccessingLoginPage,
    FindingForm,
    FindingUsernameField,
    FindingPasswordField,
    FindingCsrfToken,
    SubmittingLogin,
}

impl LoginStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccessingLoginPage => "accessing_login_page",
            Self::FindingForm => "finding_form",
            Self::FindingUsernameField => "finding_username_field",
            Self::FindingPasswordField => "finding_password_field",
            Self::FindingCsrfToken => "finding_csrf_token",
            Self::SubmittingLogin => "submitting_login",
        }
    }
}

/// Structured failure detail for one login attempt.
#[derive(Debug, Clone, Serialize)]
pub struct LoginFailure {
    pub step: LoginStep,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_preview: Option<String>,
}

impl LoginFailure {
    pub fn new(step: LoginStep, message: impl Into<String>) -> Self {
        Self {
            step,
            message: message.into(),
            status_code: None,
            url: None,
            response_preview: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_preview(mut self, body: &str) -> Self {
        self.response_preview = Some(preview(body));
        self
    }
}

/// Transient result of one login attempt. Never persisted directly; a
/// failure is reflected into a scrape record by the orchestrator.
#[derive(Debug, Clone)]
pub enum LoginOutcome {
    Success {
        redirect_url: String,
        /// Direct link to the alerts page, when the landing page exposes one.
        alerts_link: Option<String>,
        /// False for a tentative success: no failure signal, but no
        /// confident success signal either.
        confident: bool,
    },
    Failure(LoginFailure),
}

impl LoginOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Seam for the login flow, stubbable in tests.
#[async_trait]
pub trait LoginFlow: Send + Sync {
    async fn login(&self, username: &str, password: &str, base_url: &str) -> LoginOutcome;
}

/// Seam for the authenticated data fetch, stubbable in tests.
#[async_trait]
pub trait AlertsFetch: Send + Sync {
    async fn fetch_alerts(&self, base_url: &str, target_url: Option<&str>) -> ScrapeEnvelope;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_is_bounded_and_char_safe() {
        let short = "tiny body";
        assert_eq!(preview(short), short);

        let long = "x".repeat(2000);
        assert_eq!(preview(&long).len(), PREVIEW_LEN);

        // Multi-byte character straddling the boundary must not panic.
        let mut tricky = "a".repeat(PREVIEW_LEN - 1);
        tricky.push('é');
        tricky.push_str(&"b".repeat(100));
        let p = preview(&tricky);
        assert!(p.len() <= PREVIEW_LEN);
    }

    #[test]
    fn failure_serializes_step_name() {
        let failure = LoginFailure::new(LoginStep::SubmittingLogin, "still on login page")
            .with_status(200)
            .with_url("https://pstrax.com/login");
        let value = serde_json::to_value(&failure).unwrap();
        assert_eq!(value["step"], "submitting_login");
        assert_eq!(value["status_code"], 200);
        assert!(value.get("response_preview").is_none());
    }
}
