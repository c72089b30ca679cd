//! Authenticated data fetch against the portal's AJAX endpoints.
//!
//! The portal lies about content types: alert data arrives as JSON in a
//! `text/html` response. Classification therefore trusts the body, never
//! the declared type.

use async_trait::async_trait;
use reqwest::header::{HeaderValue, ACCEPT, CONTENT_TYPE, REFERER};
use reqwest::Client;
use tracing::{debug, info};

use super::session::login_form_present;
use super::{preview, AlertsFetch, LOGIN_PATH_MARKER};
use crate::models::ScrapeEnvelope;

const ALERTS_DATA_PATH: &str = "/scba/scba-open-alerts-data.php";
const ALERTS_PAGE_PATH: &str = "/scba/scba-open-alerts.php";
const GEAR_DATA_PATH: &str = "/scba/gear-list-data.php";
const GEAR_PAGE_PATH: &str = "/scba/gear-list.php";

/// Fetches alert and gear data over an already-authenticated client.
///
/// Built from the session's HTTP client so the login cookies ride along.
pub struct DataFetcher {
    http: Client,
}

impl DataFetcher {
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    /// Fetch the open-alerts dataset.
    ///
    /// `target_url` overrides the default endpoint when the landing page
    /// advertised a direct alerts link.
    pub async fn fetch_alerts(&self, base_url: &str, target_url: Option<&str>) -> ScrapeEnvelope {
        let base = base_url.trim_end_matches('/');
        let url = alerts_url(base, target_url);

        let body = [
            ("type", "all"),
            ("assignment", "all"),
            ("postedby", "all"),
        ];
        let referer = format!("{base}{ALERTS_PAGE_PATH}");
        self.post_for_json(&url, &referer, &body).await
    }

    /// Fetch the full gear list (limitSearch=0 disables pagination).
    pub async fn fetch_gear_list(&self, base_url: &str) -> ScrapeEnvelope {
        let base = base_url.trim_end_matches('/');
        let url = format!("{base}{GEAR_DATA_PATH}");
        let body = [
            ("limitSearch", "0"),
            ("btnSubmit", "Find"),
            ("typeid", ""),
            ("statusid", ""),
            ("sid", ""),
        ];
        let referer = format!("{base}{GEAR_PAGE_PATH}");
        self.post_for_json(&url, &referer, &body).await
    }

    async fn post_for_json(
        &self,
        url: &str,
        referer: &str,
        body: &[(&str, &str)],
    ) -> ScrapeEnvelope {
        debug!(%url, "fetching portal data");

        let response = match self
            .http
            .post(url)
            .header(REFERER, referer)
            .header(
                ACCEPT,
                HeaderValue::from_static("application/json, text/javascript, */*; q=0.01"),
            )
            .header("X-Requested-With", "XMLHttpRequest")
            .form(body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return ScrapeEnvelope::error(url, format!("network error: {e}"));
            }
        };

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                return ScrapeEnvelope::error(url, format!("failed to read response: {e}"))
                    .with_status_code(status);
            }
        };

        let envelope = classify_data_response(&final_url, status, &content_type, &text);
        info!(
            %url,
            status = envelope.status.as_str(),
            "portal data fetch finished"
        );
        envelope
    }
}

/// Full alerts-data URL with the `p=home` parameter the portal expects,
/// joined with `&` when the target already carries a query string.
fn alerts_url(base: &str, target: Option<&str>) -> String {
    let mut url = match target {
        Some(target) => data_endpoint_for(base, target),
        None => format!("{base}{ALERTS_DATA_PATH}"),
    };
    if !url.contains("p=home") {
        url.push(if url.contains('?') { '&' } else { '?' });
        url.push_str("p=home");
    }
    url
}

/// Rewrite an alerts page link to its data endpoint. A link that already
/// points at a `-data.php` endpoint passes through untouched.
fn data_endpoint_for(base: &str, target: &str) -> String {
    if target.contains("-data.php") {
        target.to_string()
    } else if target.contains(ALERTS_PAGE_PATH) {
        target.replace(ALERTS_PAGE_PATH, ALERTS_DATA_PATH)
    } else {
        format!("{base}{ALERTS_DATA_PATH}")
    }
}

/// Classify a data response body. Pure, so every branch is testable
/// without a server.
pub fn classify_data_response(
    final_url: &str,
    status: u16,
    content_type: &str,
    body: &str,
) -> ScrapeEnvelope {
    let body_lower = body.to_lowercase();
    let expired = body_lower.contains("authentication expired")
        || body_lower.contains("session expired");

    if status != 200 {
        let reason = if expired {
            format!("request failed with status {status} (session expired)")
        } else {
            format!("request failed with status {status}")
        };
        return ScrapeEnvelope::error(final_url, reason)
            .with_status_code(status)
            .with_preview(preview(body));
    }

    if expired {
        return ScrapeEnvelope::error(final_url, "session expired before data fetch")
            .with_status_code(status)
            .with_preview(preview(body));
    }

    if final_url.to_lowercase().contains(LOGIN_PATH_MARKER) {
        return ScrapeEnvelope::error(final_url, "redirected to login page during data fetch")
            .with_status_code(status)
            .with_preview(preview(body));
    }

    // Trust the body over the declared content type. Retry after stripping
    // a BOM and padding, which the portal sometimes prepends.
    let parsed = serde_json::from_str::<serde_json::Value>(body)
        .or_else(|_| serde_json::from_str(body.trim_start_matches('\u{feff}').trim()));

    match parsed {
        Ok(data) => ScrapeEnvelope::success(final_url, data).with_status_code(status),
        Err(_) if login_form_present(body) => {
            ScrapeEnvelope::error(final_url, "received login page instead of data")
                .with_status_code(status)
                .with_preview(preview(body))
        }
        Err(e) => ScrapeEnvelope::error(
            final_url,
            format!("failed to parse response as JSON (content-type: {content_type}): {e}"),
        )
        .with_status_code(status)
        .with_preview(preview(body)),
    }
}

#[async_trait]
impl AlertsFetch for DataFetcher {
    async fn fetch_alerts(&self, base_url: &str, target_url: Option<&str>) -> ScrapeEnvelope {
        DataFetcher::fetch_alerts(self, base_url, target_url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScrapeStatus;

    const DATA_URL: &str = "https://pstrax.com/scba/scba-open-alerts-data.php?p=home";

    #[test]
    fn json_under_html_content_type_is_accepted() {
        let body = r#"[{"id": 1, "unit": "SCBA-7", "status": "open"}]"#;
        let envelope = classify_data_response(DATA_URL, 200, "text/html; charset=utf-8", body);
        assert_eq!(envelope.status, ScrapeStatus::Success);
        assert_eq!(envelope.data.as_ref().unwrap()[0]["unit"], "SCBA-7");
    }

    #[test]
    fn bom_and_padding_are_stripped_before_parsing() {
        let body = "\u{feff}  {\"rows\": []}  ";
        let envelope = classify_data_response(DATA_URL, 200, "text/html", body);
        assert_eq!(envelope.status, ScrapeStatus::Success);
    }

    #[test]
    fn non_200_is_an_error_with_status() {
        let envelope = classify_data_response(DATA_URL, 503, "text/html", "unavailable");
        assert_eq!(envelope.status, ScrapeStatus::Error);
        assert_eq!(envelope.status_code, Some(503));
        assert!(envelope.error.as_ref().unwrap().contains("503"));
    }

    #[test]
    fn session_expired_marker_wins_over_parsing() {
        let envelope = classify_data_response(
            DATA_URL,
            200,
            "text/html",
            "<html>Your session expired. Please log in again.</html>",
        );
        assert_eq!(envelope.status, ScrapeStatus::Error);
        assert!(envelope.error.as_ref().unwrap().contains("session expired"));
    }

    #[test]
    fn redirect_to_login_is_an_error() {
        let envelope = classify_data_response(
            "https://pstrax.com/login.php",
            200,
            "text/html",
            "<html>welcome back</html>",
        );
        assert_eq!(envelope.status, ScrapeStatus::Error);
        assert!(envelope
            .error
            .as_ref()
            .unwrap()
            .contains("redirected to login"));
    }

    #[test]
    fn html_login_form_is_reported_as_login_page() {
        let body = r#"<html><form id="loginForm" action="/login"><input type="password" name="txtpassword"></form></html>"#;
        let envelope = classify_data_response(DATA_URL, 200, "text/html", body);
        assert_eq!(envelope.status, ScrapeStatus::Error);
        assert!(envelope
            .error
            .as_ref()
            .unwrap()
            .contains("login page instead of data"));
    }

    #[test]
    fn unparseable_body_carries_content_type_and_preview() {
        let envelope = classify_data_response(DATA_URL, 200, "text/plain", "not json at all");
        assert_eq!(envelope.status, ScrapeStatus::Error);
        let error = envelope.error.as_ref().unwrap();
        assert!(error.contains("text/plain"));
        assert_eq!(envelope.response_preview.as_deref(), Some("not json at all"));
    }

    #[test]
    fn expired_session_is_named_even_on_error_status() {
        let envelope = classify_data_response(
            DATA_URL,
            500,
            "text/html",
            "<html>Your session expired.</html>",
        );
        assert_eq!(envelope.status, ScrapeStatus::Error);
        assert_eq!(envelope.status_code, Some(500));
        let error = envelope.error.as_ref().unwrap();
        assert!(error.contains("500"), "got: {error}");
        assert!(error.contains("session expired"), "got: {error}");
    }

    #[test]
    fn alerts_url_always_carries_p_home() {
        let base = "https://pstrax.com";
        assert_eq!(
            alerts_url(base, None),
            "https://pstrax.com/scba/scba-open-alerts-data.php?p=home"
        );
        // A target with an existing query joins with '&'.
        assert_eq!(
            alerts_url(base, Some("https://pstrax.com/scba/scba-open-alerts-data.php?sid=3")),
            "https://pstrax.com/scba/scba-open-alerts-data.php?sid=3&p=home"
        );
        // Never doubled.
        assert_eq!(
            alerts_url(base, Some("https://pstrax.com/scba/scba-open-alerts-data.php?p=home")),
            "https://pstrax.com/scba/scba-open-alerts-data.php?p=home"
        );
    }

    #[test]
    fn page_links_are_rewritten_to_data_endpoints() {
        let base = "https://pstrax.com";
        assert_eq!(
            data_endpoint_for(base, "https://pstrax.com/scba/scba-open-alerts.php"),
            "https://pstrax.com/scba/scba-open-alerts-data.php"
        );
        assert_eq!(
            data_endpoint_for(base, "https://pstrax.com/scba/scba-open-alerts-data.php?p=home"),
            "https://pstrax.com/scba/scba-open-alerts-data.php?p=home"
        );
        assert_eq!(
            data_endpoint_for(base, "https://pstrax.com/scba/alerts"),
            "https://pstrax.com/scba/scba-open-alerts-data.php"
        );
    }
}
