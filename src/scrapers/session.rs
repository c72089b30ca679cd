//! Authenticated portal session client.
//!
//! One cookie-bearing HTTP client is built per login attempt so a failed
//! attempt can never contaminate a later retry. The login flow is replayed
//! from whatever the extractor finds on the page: all three fields present
//! means a single POST; a username-only page means the two-step variant
//! (submit username, re-parse for the password field, submit again).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::{info, warn};
use url::Url;

use super::form::{self, FieldMatch, FieldRole, LoginForm};
use super::{LoginFailure, LoginFlow, LoginOutcome, LoginStep, LOGIN_PATH_MARKER};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Per-request timeout; a hung portal stalls only the scrape job's task.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Cookie-bearing HTTP client for one login attempt.
pub struct SessionClient {
    http: Client,
}

impl Default for SessionClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionClient {
    pub fn new() -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

        let http = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .cookie_store(true)
            .timeout(REQUEST_TIMEOUT)
            .gzip(true)
            .brotli(true)
            .build()
            .expect("Failed to create HTTP client");

        Self { http }
    }

    /// The underlying client, for issuing authenticated follow-up requests
    /// that share this session's cookies.
    pub fn http(&self) -> &Client {
        &self.http
    }

    /// Log into the portal. Never returns an error for ordinary network or
    /// parse problems; those become a structured `Failure`.
    pub async fn login(&self, username: &str, password: &str, base_url: &str) -> LoginOutcome {
        match self.try_login(username, password, base_url).await {
            Ok(outcome) => outcome,
            Err(failure) => {
                info!(
                    step = failure.step.as_str(),
                    message = %failure.message,
                    "login attempt failed"
                );
                LoginOutcome::Failure(failure)
            }
        }
    }

    async fn try_login(
        &self,
        username: &str,
        password: &str,
        base_url: &str,
    ) -> Result<LoginOutcome, LoginFailure> {
        let base = base_url.trim_end_matches('/');

        let (page_url, page_html) = self.fetch_login_page(base, username).await?;

        let login_form = form::extract_login_form(&page_html).ok_or_else(|| {
            LoginFailure::new(LoginStep::FindingForm, "login form not found in page")
                .with_url(&page_url)
                .with_preview(&page_html)
        })?;

        let username_field = login_form.username.clone().ok_or_else(|| {
            LoginFailure::new(
                LoginStep::FindingUsernameField,
                "username field not found in login form",
            )
            .with_url(&page_url)
            .with_preview(&page_html)
        })?;

        // A token that exists but is empty means the form is broken; a form
        // with no token at all is simply a variant that does not use one.
        check_csrf_not_empty(&login_form)?;

        if let Some(password_field) = login_form.password.clone() {
            // Single-step: everything on the first page.
            let body = build_form_body(
                &login_form,
                &username_field,
                username,
                Some((&password_field.name, password)),
            );
            let post_url = resolve_action(base, &page_url, login_form.action.as_deref());
            let (final_url, status, response) = self.submit(&post_url, &body).await?;
            self.finish(base, username, &final_url, status, &response)
        } else {
            // Two-step: username first, then re-parse for the password field.
            let body = build_form_body(&login_form, &username_field, username, None);
            let post_url = resolve_action(base, &page_url, login_form.action.as_deref());
            let (step_url, _status, step_html) = self.submit(&post_url, &body).await?;

            // Some variants log in on the username submit alone.
            if !step_url.to_lowercase().contains(LOGIN_PATH_MARKER)
                && has_success_marker(&step_html, username)
            {
                return Ok(LoginOutcome::Success {
                    alerts_link: find_alerts_link(&step_html, base, &step_url),
                    redirect_url: step_url,
                    confident: true,
                });
            }

            let password_field =
                form::extract_field(&step_html, FieldRole::Password).ok_or_else(|| {
                    LoginFailure::new(
                        LoginStep::FindingPasswordField,
                        "password field not found after username submission",
                    )
                    .with_url(&step_url)
                    .with_preview(&step_html)
                })?;

            // The second page may carry a fresh token and different action.
            let second_form = form::extract_login_form(&step_html).unwrap_or_default();
            check_csrf_not_empty(&second_form)?;
            let username_field = second_form.username.clone().unwrap_or(username_field);

            let body = build_form_body(
                &second_form,
                &username_field,
                username,
                Some((&password_field.name, password)),
            );
            let post_url = resolve_action(base, &step_url, second_form.action.as_deref());
            let (final_url, status, response) = self.submit(&post_url, &body).await?;
            self.finish(base, username, &final_url, status, &response)
        }
    }

    /// Fetch the login page, trying the known candidates in order. The
    /// portal's login page takes the username as a query parameter.
    async fn fetch_login_page(
        &self,
        base: &str,
        username: &str,
    ) -> Result<(String, String), LoginFailure> {
        let candidates = [
            format!(
                "{base}/login.php?username={}",
                urlencoding::encode(username)
            ),
            format!("{base}/login"),
            base.to_string(),
        ];

        let mut last_status = None;
        let mut last_error = None;

        for url in &candidates {
            let response = match self.http.get(url).send().await {
                Ok(response) => response,
                Err(e) => {
                    last_error = Some(format!("network error: {e}"));
                    continue;
                }
            };

            let status = response.status().as_u16();
            last_status = Some(status);
            if status != 200 {
                continue;
            }
            let final_url = response.url().to_string();
            match response.text().await {
                Ok(text) if looks_like_html(&text) => return Ok((final_url, text)),
                Ok(_) => continue,
                Err(e) => last_error = Some(format!("failed to read response: {e}")),
            }
        }

        let mut failure = LoginFailure::new(
            LoginStep::AccessingLoginPage,
            last_error.unwrap_or_else(|| "no candidate login URL returned an HTML page".into()),
        )
        .with_url(&candidates[0]);
        if let Some(status) = last_status {
            failure = failure.with_status(status);
        }
        Err(failure)
    }

    async fn submit(
        &self,
        url: &str,
        body: &[(String, String)],
    ) -> Result<(String, u16, String), LoginFailure> {
        let response = self.http.post(url).form(body).send().await.map_err(|e| {
            LoginFailure::new(LoginStep::SubmittingLogin, format!("network error: {e}"))
                .with_url(url)
        })?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let text = response.text().await.map_err(|e| {
            LoginFailure::new(
                LoginStep::SubmittingLogin,
                format!("failed to read response: {e}"),
            )
            .with_status(status)
            .with_url(&final_url)
        })?;

        Ok((final_url, status, text))
    }

    fn finish(
        &self,
        base: &str,
        username: &str,
        final_url: &str,
        status: u16,
        body: &str,
    ) -> Result<LoginOutcome, LoginFailure> {
        match classify_login_response(final_url, status, body, username) {
            LoginClassification::Success { confident } => {
                if confident {
                    info!(url = %final_url, "login successful");
                } else {
                    warn!(
                        url = %final_url,
                        "uncertain login status, proceeding on HTTP 200"
                    );
                }
                Ok(LoginOutcome::Success {
                    alerts_link: find_alerts_link(body, base, final_url),
                    redirect_url: final_url.to_string(),
                    confident,
                })
            }
            LoginClassification::StillLoginPage => Err(LoginFailure::new(
                LoginStep::SubmittingLogin,
                format!("login failed - still on login page (status {status})"),
            )
            .with_status(status)
            .with_url(final_url)
            .with_preview(body)),
            LoginClassification::Failed => Err(LoginFailure::new(
                LoginStep::SubmittingLogin,
                format!("login failed (status {status})"),
            )
            .with_status(status)
            .with_url(final_url)
            .with_preview(body)),
        }
    }
}

#[async_trait]
impl LoginFlow for SessionClient {
    async fn login(&self, username: &str, password: &str, base_url: &str) -> LoginOutcome {
        SessionClient::login(self, username, password, base_url).await
    }
}

/// How one login response reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginClassification {
    Success { confident: bool },
    /// Unambiguously back on the login form at a login URL.
    StillLoginPage,
    Failed,
}

/// Classify a login response from a disjunction of weak signals.
///
/// No single check is authoritative: the portal does not return a clean
/// status for a bad password, it just re-renders the form.
pub fn classify_login_response(
    final_url: &str,
    status: u16,
    body: &str,
    username: &str,
) -> LoginClassification {
    let url_lower = final_url.to_lowercase();
    let body_lower = body.to_lowercase();

    let left_login_url = !url_lower.contains(LOGIN_PATH_MARKER);
    let has_logout = body_lower.contains("logout") || body_lower.contains("sign out");
    let has_dashboard = body_lower.contains("dashboard") || body_lower.contains("welcome");

    if left_login_url || has_logout || has_dashboard {
        return LoginClassification::Success { confident: true };
    }

    // Here the URL still says login; a re-rendered login form is the one
    // unambiguous failure shape. This outranks the username signal since a
    // redisplayed form echoes the username back.
    if login_form_present(body) {
        return LoginClassification::StillLoginPage;
    }

    if !username.is_empty() && body_lower.contains(&username.to_lowercase()) {
        return LoginClassification::Success { confident: true };
    }

    if status == 200 {
        // Tentative: no failure signal, but nothing confident either.
        return LoginClassification::Success { confident: false };
    }

    LoginClassification::Failed
}

/// Whether the body contains a login-styled form.
pub fn login_form_present(body: &str) -> bool {
    let doc = Html::parse_document(body);
    let sel = Selector::parse("form").expect("static selector is valid");
    doc.select(&sel).any(|f| {
        let id = f.value().attr("id").unwrap_or_default().to_lowercase();
        let action = f.value().attr("action").unwrap_or_default().to_lowercase();
        id == "loginform" || action.contains(LOGIN_PATH_MARKER)
    })
}

fn has_success_marker(body: &str, username: &str) -> bool {
    let body_lower = body.to_lowercase();
    body_lower.contains("logout")
        || body_lower.contains("dashboard")
        || (!username.is_empty() && body_lower.contains(&username.to_lowercase()))
}

fn looks_like_html(text: &str) -> bool {
    if text.len() < 20 {
        return false;
    }
    let head: String = text.chars().take(500).collect::<String>().to_lowercase();
    head.contains('<') || head.contains("html") || head.contains("form")
}

/// scheme://host[:port] of a URL, used to resolve rooted form actions.
fn origin(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    match parsed.port() {
        Some(port) => Some(format!("{}://{}:{}", parsed.scheme(), host, port)),
        None => Some(format!("{}://{}", parsed.scheme(), host)),
    }
}

/// Resolve a form action against the page it came from.
pub fn resolve_action(base: &str, page_url: &str, action: Option<&str>) -> String {
    match action {
        Some(action) if action.starts_with("http://") || action.starts_with("https://") => {
            action.to_string()
        }
        Some(action) if action.starts_with('/') => match origin(base) {
            Some(origin) => format!("{origin}{action}"),
            None => format!("{base}{action}"),
        },
        Some(action) if !action.is_empty() => Url::parse(page_url)
            .and_then(|page| page.join(action))
            .map(|u| u.to_string())
            .unwrap_or_else(|_| format!("{base}/{action}")),
        // No declared action: the portal posts back to /login.
        _ => match origin(base) {
            Some(origin) => format!("{origin}/login"),
            None => format!("{base}/login"),
        },
    }
}

/// Build the POST body: all hidden fields replayed blindly, then the
/// username, CSRF token, and password layered on top.
fn build_form_body(
    login_form: &LoginForm,
    username_field: &FieldMatch,
    username: &str,
    password: Option<(&str, &str)>,
) -> Vec<(String, String)> {
    let mut body: Vec<(String, String)> = login_form.hidden.clone();

    let mut set = |name: &str, value: String| {
        body.retain(|(existing, _)| existing != name);
        body.push((name.to_string(), value));
    };

    // Prefer the pre-filled value when the page supplied one.
    let username_value = match username_field.value.as_deref() {
        Some(value) if !value.is_empty() => value.to_string(),
        _ => username.to_string(),
    };
    set(&username_field.name, username_value);

    if let Some(csrf) = &login_form.csrf {
        if let Some(value) = csrf.value.as_deref() {
            if !value.is_empty() {
                set(&csrf.name, value.to_string());
            }
        }
    }

    if let Some((name, password)) = password {
        set(name, password.to_string());
    }

    body
}

fn check_csrf_not_empty(login_form: &LoginForm) -> Result<(), LoginFailure> {
    if let Some(csrf) = &login_form.csrf {
        if csrf.value.as_deref() == Some("") {
            return Err(LoginFailure::new(
                LoginStep::FindingCsrfToken,
                format!("CSRF token field '{}' has an empty value", csrf.name),
            ));
        }
    }
    Ok(())
}

/// Scan a landing page for a direct link to the alerts page so the caller
/// can skip a navigation.
pub fn find_alerts_link(body: &str, base: &str, current_url: &str) -> Option<String> {
    let doc = Html::parse_document(body);
    let sel = Selector::parse("a[href]").expect("static selector is valid");

    for link in doc.select(&sel) {
        let href = link.value().attr("href")?;
        let href_lower = href.to_lowercase();
        if !(href_lower.contains("scba-open-alerts") || href_lower.contains("scba/alerts")) {
            continue;
        }
        if href.starts_with("http://") || href.starts_with("https://") {
            return Some(href.to_string());
        }
        if let Some(stripped) = href.strip_prefix('/') {
            if let Some(origin) = origin(base) {
                return Some(format!("{origin}/{stripped}"));
            }
        }
        return Url::parse(current_url)
            .and_then(|u| u.join(href))
            .map(|u| u.to_string())
            .ok();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logout_marker_means_confident_success() {
        let c = classify_login_response(
            "https://pstrax.com/login",
            200,
            "<html><a href='/logout'>Logout</a></html>",
            "alice",
        );
        assert_eq!(c, LoginClassification::Success { confident: true });
    }

    #[test]
    fn leaving_login_url_means_success() {
        let c = classify_login_response("https://pstrax.com/home", 200, "<html></html>", "alice");
        assert_eq!(c, LoginClassification::Success { confident: true });
    }

    #[test]
    fn redisplayed_login_form_is_a_failure_even_with_username_echoed() {
        let body = r#"
            <form id="loginForm" method="post" action="/login">
                <input type="text" name="txtuser_name" value="alice">
                <input type="password" name="txtpassword">
            </form>
        "#;
        let c = classify_login_response("https://pstrax.com/login", 200, body, "alice");
        assert_eq!(c, LoginClassification::StillLoginPage);
    }

    #[test]
    fn no_signal_on_200_is_tentative_success() {
        let c = classify_login_response(
            "https://pstrax.com/login",
            200,
            "<html><p>please wait...</p></html>",
            "alice",
        );
        assert_eq!(c, LoginClassification::Success { confident: false });
    }

    #[test]
    fn no_signal_on_error_status_is_failure() {
        let c = classify_login_response(
            "https://pstrax.com/login",
            500,
            "<html><p>oops</p></html>",
            "alice",
        );
        assert_eq!(c, LoginClassification::Failed);
    }

    #[test]
    fn username_in_body_counts_when_no_form_is_present() {
        let c = classify_login_response(
            "https://pstrax.com/login-complete",
            200,
            "<html><p>signed in as alice</p></html>",
            "alice",
        );
        assert_eq!(c, LoginClassification::Success { confident: true });
    }

    #[test]
    fn resolve_action_variants() {
        let base = "https://pstrax.com";
        let page = "https://pstrax.com/login.php?username=alice";

        assert_eq!(
            resolve_action(base, page, Some("https://auth.pstrax.com/go")),
            "https://auth.pstrax.com/go"
        );
        assert_eq!(
            resolve_action(base, page, Some("/session")),
            "https://pstrax.com/session"
        );
        assert_eq!(
            resolve_action(base, page, Some("do-login.php")),
            "https://pstrax.com/do-login.php"
        );
        assert_eq!(resolve_action(base, page, Some("")), "https://pstrax.com/login");
        assert_eq!(resolve_action(base, page, None), "https://pstrax.com/login");
    }

    #[test]
    fn alerts_link_is_resolved_against_base() {
        let body = r#"<a href="/scba/scba-open-alerts.php">Open Alerts</a>"#;
        let link = find_alerts_link(body, "https://app1.pstrax.com", "https://app1.pstrax.com/home");
        assert_eq!(
            link.as_deref(),
            Some("https://app1.pstrax.com/scba/scba-open-alerts.php")
        );

        assert!(find_alerts_link(
            r#"<a href="/tasks">Tasks</a>"#,
            "https://app1.pstrax.com",
            "https://app1.pstrax.com/home"
        )
        .is_none());
    }

    #[test]
    fn form_body_replays_hidden_fields_without_duplicates() {
        let login_form = LoginForm {
            action: Some("/login".to_string()),
            username: Some(FieldMatch {
                name: "txtuser_name".to_string(),
                value: Some("alice".to_string()),
            }),
            password: Some(FieldMatch {
                name: "txtpassword".to_string(),
                value: None,
            }),
            csrf: Some(FieldMatch {
                name: "_token".to_string(),
                value: Some("abc123".to_string()),
            }),
            hidden: vec![
                ("_token".to_string(), "abc123".to_string()),
                ("bot_check".to_string(), String::new()),
            ],
        };
        let username_field = login_form.username.clone().unwrap();

        let body = build_form_body(
            &login_form,
            &username_field,
            "alice",
            Some(("txtpassword", "secret")),
        );

        let tokens: Vec<_> = body.iter().filter(|(n, _)| n == "_token").collect();
        assert_eq!(tokens.len(), 1);
        assert!(body.contains(&("txtuser_name".to_string(), "alice".to_string())));
        assert!(body.contains(&("txtpassword".to_string(), "secret".to_string())));
        assert!(body.contains(&("bot_check".to_string(), String::new())));
    }

    #[test]
    fn empty_csrf_value_is_rejected_before_submit() {
        let login_form = LoginForm {
            csrf: Some(FieldMatch {
                name: "_token".to_string(),
                value: Some(String::new()),
            }),
            ..LoginForm::default()
        };
        let err = check_csrf_not_empty(&login_form).unwrap_err();
        assert_eq!(err.step, LoginStep::FindingCsrfToken);

        // Absent token is a live variant, not an error.
        assert!(check_csrf_not_empty(&LoginForm::default()).is_ok());
    }
}
