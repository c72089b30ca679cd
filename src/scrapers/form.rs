//! Login-form token extraction.
//!
//! The portal's markup is not contractually stable, so nothing here relies
//! on a single fixed selector. Each field role is located by an ordered
//! cascade of independent strategies, first match wins; the last resort
//! scans HTML comments and inline scripts for fields that are declared but
//! only rendered client-side.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::OnceLock;

/// Field role the extractor is asked to locate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRole {
    Username,
    Password,
    CsrfToken,
}

/// A located form field.
///
/// `value` is `Some("")` when the value attribute is present but empty and
/// `None` when it is absent; callers that distinguish "found but empty"
/// from "not found" rely on the `Option` at the call site being the
/// not-found signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMatch {
    pub name: String,
    pub value: Option<String>,
}

/// Everything needed to replay the login form.
#[derive(Debug, Clone, Default)]
pub struct LoginForm {
    /// Declared form action, if any.
    pub action: Option<String>,
    pub username: Option<FieldMatch>,
    pub password: Option<FieldMatch>,
    pub csrf: Option<FieldMatch>,
    /// All hidden name/value pairs of the form, replayed blindly.
    pub hidden: Vec<(String, String)>,
}

/// Field identifiers observed on the portal and common login pages.
const KNOWN_USERNAME_NAMES: &[&str] = &[
    "txtuser_name",
    "username",
    "user",
    "email",
    "login",
    "user_name",
    "user_login",
    "login_name",
    "account",
    "account_name",
    "uname",
    "userid",
    "user_id",
];

const KNOWN_PASSWORD_NAMES: &[&str] = &[
    "txtpassword",
    "password",
    "passwd",
    "user_password",
    "txt_password",
];

const KNOWN_CSRF_NAMES: &[&str] = &[
    "_token",
    "csrf_token",
    "authenticity_token",
    "csrfmiddlewaretoken",
    "__requestverificationtoken",
];

const USERNAME_HINTS: &[&str] = &["user", "login", "email", "account"];

fn selector(src: &'static str) -> Selector {
    Selector::parse(src).expect("static selector is valid")
}

fn input_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| selector("input"))
}

fn form_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| selector("form"))
}

fn attr_lower(el: ElementRef, attr: &str) -> String {
    el.value().attr(attr).unwrap_or_default().to_lowercase()
}

/// Field name to submit under: the name attribute, falling back to the id.
fn submit_name(el: ElementRef) -> Option<String> {
    el.value()
        .attr("name")
        .or_else(|| el.value().attr("id"))
        .map(str::to_string)
}

fn to_match(el: ElementRef) -> Option<FieldMatch> {
    Some(FieldMatch {
        name: submit_name(el)?,
        value: el.value().attr("value").map(str::to_string),
    })
}

fn inputs(scope: ElementRef<'_>) -> impl Iterator<Item = ElementRef<'_>> {
    scope.select(input_selector())
}

// ---------------------------------------------------------------------------
// Strategy 1: exact match on historically observed identifiers.
// ---------------------------------------------------------------------------

/// Input types a role may be carried by. Keeps a submit button named
/// `login` from being claimed as the username field.
fn role_allows_type(role: FieldRole, ty: &str) -> bool {
    match role {
        FieldRole::Username => ty.is_empty() || ty == "text" || ty == "email",
        FieldRole::Password => ty.is_empty() || ty == "password" || ty == "text",
        FieldRole::CsrfToken => ty.is_empty() || ty == "hidden" || ty == "text",
    }
}

fn by_known_name<'a>(scope: ElementRef<'a>, known: &[&str], role: FieldRole) -> Option<FieldMatch> {
    inputs(scope)
        .find(|el| {
            if !role_allows_type(role, &attr_lower(*el, "type")) {
                return false;
            }
            let name = attr_lower(*el, "name");
            let id = attr_lower(*el, "id");
            known.iter().any(|k| *k == name || *k == id)
        })
        .and_then(to_match)
}

// ---------------------------------------------------------------------------
// Strategy 2: attribute heuristics on type + role-indicative substrings.
// ---------------------------------------------------------------------------

fn username_by_attributes(scope: ElementRef) -> Option<FieldMatch> {
    inputs(scope)
        .find(|el| {
            let ty = attr_lower(*el, "type");
            if !(ty.is_empty() || ty == "text" || ty == "email") {
                return false;
            }
            let haystack = format!(
                "{} {} {}",
                attr_lower(*el, "name"),
                attr_lower(*el, "id"),
                attr_lower(*el, "placeholder")
            );
            USERNAME_HINTS.iter().any(|hint| haystack.contains(hint))
        })
        .and_then(to_match)
}

fn password_by_attributes(scope: ElementRef) -> Option<FieldMatch> {
    // A real password input wins; otherwise accept a text input whose
    // name/id says "pass" (seen on sites that toggle visibility).
    inputs(scope)
        .find(|el| attr_lower(*el, "type") == "password")
        .or_else(|| {
            inputs(scope).find(|el| {
                let ty = attr_lower(*el, "type");
                (ty.is_empty() || ty == "text")
                    && (attr_lower(*el, "name").contains("pass")
                        || attr_lower(*el, "id").contains("pass"))
            })
        })
        .and_then(to_match)
}

fn csrf_by_attributes(scope: ElementRef) -> Option<FieldMatch> {
    inputs(scope)
        .find(|el| {
            let name = attr_lower(*el, "name");
            let id = attr_lower(*el, "id");
            name.contains("csrf") || id.contains("csrf") || name.contains("token")
        })
        .and_then(to_match)
}

// ---------------------------------------------------------------------------
// Strategy 3: structural fallback relative to an anchor field.
// ---------------------------------------------------------------------------

/// The text/email input closest to (before) the password field in the form.
fn username_near_password(scope: ElementRef, password_name: &str) -> Option<FieldMatch> {
    let mut best: Option<FieldMatch> = None;
    for el in inputs(scope) {
        let ty = attr_lower(el, "type");
        if ty == "password" {
            if attr_lower(el, "name") == password_name.to_lowercase()
                || attr_lower(el, "id") == password_name.to_lowercase()
            {
                // Document order: the last text input seen before the
                // password field is the nearest one.
                return best;
            }
            continue;
        }
        if ty.is_empty() || ty == "text" || ty == "email" {
            if let Some(m) = to_match(el) {
                best = Some(m);
            }
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Strategy 4: comment / inline-script scan for fields declared but not
// rendered (activated client-side).
// ---------------------------------------------------------------------------

fn hidden_markup_regex(hint: &str) -> Regex {
    // Matches an <input> whose name or id contains the hint, inside either
    // an HTML comment or a <script> block.
    let pattern = format!(
        r#"(?is)(?:<!--.*?<input[^>]*?(?:name|id)\s*=\s*["']([^"']*{hint}[^"']*)["'].*?-->|<script[^>]*>.*?<input[^>]*?(?:name|id)\s*=\s*["']([^"']*{hint}[^"']*)["'].*?</script>)"#
    );
    Regex::new(&pattern).expect("static pattern is valid")
}

fn field_in_hidden_markup(html: &str, hint: &str) -> Option<FieldMatch> {
    let captures = hidden_markup_regex(hint).captures(html)?;
    let name = captures
        .get(1)
        .or_else(|| captures.get(2))?
        .as_str()
        .to_string();
    Some(FieldMatch { name, value: None })
}

fn csrf_in_meta(doc: &Html) -> Option<FieldMatch> {
    static SEL: OnceLock<Selector> = OnceLock::new();
    let sel = SEL.get_or_init(|| selector("meta[name][content]"));
    doc.select(sel)
        .find(|el| attr_lower(*el, "name").contains("csrf"))
        .map(|el| FieldMatch {
            name: "_token".to_string(),
            value: el.value().attr("content").map(str::to_string),
        })
}

fn csrf_in_scripts(html: &str) -> Option<FieldMatch> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(
            r#"(?i)["']?(_token|csrf_token|authenticity_token)["']?\s*[:=]\s*["']([^"']+)["']"#,
        )
        .expect("static pattern is valid")
    });
    let captures = re.captures(html)?;
    Some(FieldMatch {
        name: captures[1].to_string(),
        value: Some(captures[2].to_string()),
    })
}

// ---------------------------------------------------------------------------
// Public entry points.
// ---------------------------------------------------------------------------

/// Locate one field role in a document, searching the whole page.
///
/// Returns `None` when no cascade step matches; a `Some` with an empty
/// `value` means the field exists but carries no pre-filled value.
pub fn extract_field(html: &str, role: FieldRole) -> Option<FieldMatch> {
    let doc = Html::parse_document(html);
    let root = doc.root_element();
    extract_field_in(root, &doc, html, role)
}

fn extract_field_in(
    scope: ElementRef,
    doc: &Html,
    raw_html: &str,
    role: FieldRole,
) -> Option<FieldMatch> {
    match role {
        FieldRole::Username => by_known_name(scope, KNOWN_USERNAME_NAMES, role)
            .or_else(|| username_by_attributes(scope))
            .or_else(|| {
                let password = extract_field_in(scope, doc, raw_html, FieldRole::Password)?;
                username_near_password(scope, &password.name)
            })
            .or_else(|| field_in_hidden_markup(raw_html, "user")),
        FieldRole::Password => by_known_name(scope, KNOWN_PASSWORD_NAMES, role)
            .or_else(|| password_by_attributes(scope))
            .or_else(|| field_in_hidden_markup(raw_html, "pass")),
        FieldRole::CsrfToken => by_known_name(scope, KNOWN_CSRF_NAMES, role)
            .or_else(|| csrf_by_attributes(scope))
            .or_else(|| csrf_in_meta(doc))
            .or_else(|| csrf_in_scripts(raw_html)),
    }
}

/// Pick the most plausible login form on the page.
fn locate_form<'a>(doc: &'a Html) -> Option<ElementRef<'a>> {
    let forms: Vec<ElementRef> = doc.select(form_selector()).collect();
    if forms.is_empty() {
        return None;
    }

    static PASSWORD_SEL: OnceLock<Selector> = OnceLock::new();
    let password_sel = PASSWORD_SEL.get_or_init(|| selector(r#"input[type="password"]"#));

    // Known id, then a form holding a password field, then a POST form,
    // then a login-flavored action/id, then the first form on the page.
    forms
        .iter()
        .find(|f| attr_lower(**f, "id") == "loginform")
        .or_else(|| forms.iter().find(|f| f.select(password_sel).next().is_some()))
        .or_else(|| forms.iter().find(|f| attr_lower(**f, "method") == "post"))
        .or_else(|| {
            forms.iter().find(|f| {
                attr_lower(**f, "action").contains("login") || attr_lower(**f, "id").contains("login")
            })
        })
        .or_else(|| forms.first())
        .copied()
}

/// Collect all hidden name/value pairs of the form.
fn hidden_fields(form: ElementRef) -> Vec<(String, String)> {
    inputs(form)
        .filter(|el| attr_lower(*el, "type") == "hidden")
        .filter_map(|el| {
            let name = el.value().attr("name")?.to_string();
            let value = el.value().attr("value").unwrap_or_default().to_string();
            Some((name, value))
        })
        .collect()
}

/// Extract everything needed to replay the page's login form.
///
/// Returns `None` only when the page has no form at all; individual roles
/// inside the result may still be unresolved.
pub fn extract_login_form(html: &str) -> Option<LoginForm> {
    let doc = Html::parse_document(html);
    let form = locate_form(&doc)?;

    Some(LoginForm {
        action: form.value().attr("action").map(str::to_string),
        username: extract_field_in(form, &doc, html, FieldRole::Username),
        password: extract_field_in(form, &doc, html, FieldRole::Password),
        csrf: extract_field_in(form, &doc, html, FieldRole::CsrfToken),
        hidden: hidden_fields(form),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PSTRAX_LOGIN: &str = r#"
        <html><body>
        <form id="loginForm" method="post" action="/login">
            <input type="text" id="txtuser_name" name="txtuser_name" value="alice">
            <input type="password" id="txtpassword" name="txtpassword">
            <input type="hidden" name="_token" value="abc123">
            <input type="hidden" name="bot_check" value="">
            <input type="submit" value="Sign in">
        </form>
        </body></html>
    "#;

    #[test]
    fn extracts_known_portal_fields() {
        let form = extract_login_form(PSTRAX_LOGIN).unwrap();
        assert_eq!(form.action.as_deref(), Some("/login"));

        let username = form.username.unwrap();
        assert_eq!(username.name, "txtuser_name");
        assert_eq!(username.value.as_deref(), Some("alice"));

        let password = form.password.unwrap();
        assert_eq!(password.name, "txtpassword");

        let csrf = form.csrf.unwrap();
        assert_eq!(csrf.name, "_token");
        assert_eq!(csrf.value.as_deref(), Some("abc123"));
    }

    #[test]
    fn harvests_all_hidden_fields() {
        let form = extract_login_form(PSTRAX_LOGIN).unwrap();
        assert_eq!(form.hidden.len(), 2);
        assert!(form
            .hidden
            .contains(&("_token".to_string(), "abc123".to_string())));
        assert!(form
            .hidden
            .contains(&("bot_check".to_string(), String::new())));
    }

    #[test]
    fn attribute_heuristic_finds_unknown_names() {
        let html = r#"
            <form method="post">
                <input type="email" name="corp_account_xyz" placeholder="Your email">
                <input type="password" name="pw_field_xyz">
            </form>
        "#;
        let form = extract_login_form(html).unwrap();
        // "email" type is not in the curated list but the hint matches.
        assert_eq!(form.username.unwrap().name, "corp_account_xyz");
        assert_eq!(form.password.unwrap().name, "pw_field_xyz");
    }

    #[test]
    fn structural_fallback_picks_input_nearest_password() {
        let html = r#"
            <form method="post">
                <input type="text" name="zzz_first">
                <input type="text" name="zzz_second">
                <input type="password" name="zzz_secret_entry">
            </form>
        "#;
        let form = extract_login_form(html).unwrap();
        assert_eq!(form.username.unwrap().name, "zzz_second");
    }

    #[test]
    fn finds_password_declared_in_html_comment() {
        let html = r#"
            <form method="post" action="/login">
                <input type="text" name="txtuser_name">
            </form>
            <!-- activated by script after username check:
                 <input type="password" id="txtpassword" name="txtpassword"> -->
        "#;
        let m = extract_field(html, FieldRole::Password).unwrap();
        assert_eq!(m.name, "txtpassword");
        assert!(m.value.is_none());
    }

    #[test]
    fn finds_csrf_in_meta_tag() {
        let html = r#"
            <head><meta name="csrf-token" content="meta-token-9"></head>
            <body><form method="post"><input type="text" name="q"></form></body>
        "#;
        let m = extract_field(html, FieldRole::CsrfToken).unwrap();
        assert_eq!(m.value.as_deref(), Some("meta-token-9"));
    }

    #[test]
    fn finds_csrf_in_inline_script() {
        let html = r#"
            <form method="post"><input type="text" name="q"></form>
            <script>window.config = { "_token": "script-token-3" };</script>
        "#;
        let m = extract_field(html, FieldRole::CsrfToken).unwrap();
        assert_eq!(m.name, "_token");
        assert_eq!(m.value.as_deref(), Some("script-token-3"));
    }

    #[test]
    fn submit_button_named_login_is_not_the_username() {
        // "login" is a known username identifier, but here it names the
        // submit button; the real field must win via the attribute hint.
        let html = r#"
            <form method="post" action="/login">
                <input type="text" name="account_field">
                <input type="password" name="pw_entry">
                <input type="submit" name="login" value="Sign in">
            </form>
        "#;
        let form = extract_login_form(html).unwrap();
        assert_eq!(form.username.unwrap().name, "account_field");
        assert_eq!(form.password.unwrap().name, "pw_entry");
    }

    #[test]
    fn not_found_is_distinct_from_found_but_empty() {
        // No password anywhere: not found.
        assert!(extract_field("<form><input type='text' name='q'></form>", FieldRole::Password)
            .is_none());

        // Token present with an empty value: found, value empty.
        let html = r#"<form><input type="hidden" name="_token" value=""></form>"#;
        let m = extract_field(html, FieldRole::CsrfToken).unwrap();
        assert_eq!(m.value.as_deref(), Some(""));
    }

    #[test]
    fn no_form_means_no_login_form() {
        assert!(extract_login_form("<html><body><p>maintenance</p></body></html>").is_none());
    }

    #[test]
    fn prefers_password_form_over_unrelated_first_form() {
        let html = r#"
            <form method="get" action="/search"><input type="text" name="q"></form>
            <form method="post" action="/auth">
                <input type="text" name="txtuser_name">
                <input type="password" name="txtpassword">
            </form>
        "#;
        let form = extract_login_form(html).unwrap();
        assert_eq!(form.action.as_deref(), Some("/auth"));
    }
}
