//! Content predicates for DOM manipulation payloads.
//!
//! The host attaches these verdicts to outgoing DOM requests; the client
//! refuses to apply anything flagged as unsafe. Whole documents shown in a
//! webview go through [`sanitize_html`] instead.

use std::sync::LazyLock;

use regex::Regex;

/// Properties a plugin may never assign directly.
const BLOCKED_PROPERTIES: &[&str] = &["innerHTML", "outerHTML"];

/// Attributes that carry URLs.
const URL_ATTRIBUTES: &[&str] = &["src", "href", "action", "formaction", "xlink:href"];

fn squash(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Whether `url` uses a scheme that executes code.
#[must_use]
pub fn is_dangerous_url(url: &str) -> bool {
    let v = squash(url);
    v.starts_with("javascript:") || v.starts_with("vbscript:") || v.starts_with("data:text/html")
}

/// Whether an HTML fragment contains script or inline handlers.
#[must_use]
pub fn is_unsafe_html(html: &str) -> bool {
    let lower = html.to_ascii_lowercase();
    if lower.contains("<script") || lower.contains("javascript:") {
        return true;
    }
    // Inline handlers such as `<img onerror=...>`.
    let bytes = lower.as_bytes();
    let mut i = 0usize;
    while let Some(pos) = lower.get(i..).and_then(|s| s.find("on")) {
        let start = i.saturating_add(pos);
        let preceded_by_space = start
            .checked_sub(1)
            .and_then(|p| bytes.get(p))
            .is_some_and(|b| b.is_ascii_whitespace() || *b == b'/');
        let name_end = lower
            .get(start..)
            .and_then(|s| s.find(|c: char| !c.is_ascii_alphanumeric()))
            .map_or(lower.len(), |n| start.saturating_add(n));
        let after = lower.get(name_end..).map(str::trim_start);
        if preceded_by_space
            && name_end > start.saturating_add(2)
            && after.is_some_and(|a| a.starts_with('='))
        {
            return true;
        }
        i = start.saturating_add(2);
    }
    false
}

/// Whether CSS text can execute code or load bindings.
#[must_use]
pub fn is_unsafe_css(css: &str) -> bool {
    let v = squash(css);
    v.contains("javascript:") || v.contains("expression(") || v.contains("-moz-binding")
}

/// Whether setting attribute `name` to `value` is safe.
#[must_use]
pub fn is_safe_attribute(name: &str, value: &str) -> bool {
    let name = name.trim().to_ascii_lowercase();
    if name.starts_with("on") {
        return false;
    }
    if URL_ATTRIBUTES.contains(&name.as_str()) && is_dangerous_url(value) {
        return false;
    }
    if name == "style" && is_unsafe_css(value) {
        return false;
    }
    if name == "srcdoc" {
        return !is_unsafe_html(value);
    }
    true
}

/// Whether assigning the DOM property `name` is safe.
#[must_use]
pub fn is_safe_property(name: &str) -> bool {
    let trimmed = name.trim();
    !trimmed.to_ascii_lowercase().starts_with("on") && !BLOCKED_PROPERTIES.contains(&trimmed)
}

/// Rewrites applied by [`sanitize_html`], in order.
static SANITIZERS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?is)<script\b[^>]*>.*?</script\s*>", ""),
        (r"(?is)<script\b[^>]*>", ""),
        (r#"(?i)[\s/]+on[a-z]+\s*=\s*("[^"]*"|'[^']*'|[^\s>]+)"#, " "),
        (
            r#"(?i)\b(href|src|action|formaction)\s*=\s*("\s*(?:javascript|vbscript|data:text/html)[^"]*"|'\s*(?:javascript|vbscript|data:text/html)[^']*'|(?:javascript|vbscript|data:text/html)[^\s>]*)"#,
            "$1=\"#\"",
        ),
        (r"(?i)expression\s*\(", "("),
        (r"(?i)-moz-binding", ""),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
    .collect()
});

/// Strip scripts, inline handlers and code-carrying URLs from a document.
#[must_use]
pub fn sanitize_html(html: &str) -> String {
    let mut out = html.to_string();
    for (re, replacement) in SANITIZERS.iter() {
        out = re.replace_all(&out, *replacement).into_owned();
    }
    out
}

/// [`sanitize_html`], or `None` when the cleaned document still looks
/// unsafe to [`is_unsafe_html`].
#[must_use]
pub fn sanitize_html_checked(html: &str) -> Option<String> {
    let clean = sanitize_html(html);
    (!is_unsafe_html(&clean)).then_some(clean)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_and_urls() {
        assert!(is_unsafe_html("<div><SCRIPT>alert(1)</script></div>"));
        assert!(is_unsafe_html("<a href=\"javascript:void(0)\">x</a>"));
        assert!(!is_unsafe_html("<p class=\"one\">content about onions</p>"));
        assert!(is_dangerous_url("  JavaScript:alert(1)"));
        assert!(is_dangerous_url("data:text/html;base64,AAAA"));
        assert!(!is_dangerous_url("data:image/png;base64,AAAA"));
    }

    #[test]
    fn test_inline_handlers() {
        assert!(is_unsafe_html("<img src=x onerror=alert(1)>"));
        assert!(is_unsafe_html("<body onload = \"f()\">"));
        assert!(!is_safe_attribute("onclick", "f()"));
        assert!(!is_safe_attribute("href", "javascript:f()"));
        assert!(is_safe_attribute("href", "https://example.com"));
    }

    #[test]
    fn test_properties_and_css() {
        assert!(!is_safe_property("innerHTML"));
        assert!(!is_safe_property("onclick"));
        assert!(is_safe_property("textContent"));
        assert!(is_unsafe_css("width: expression(alert(1))"));
        assert!(is_unsafe_css("-moz-binding: url(x)"));
        assert!(!is_unsafe_css("color: red"));
        assert!(!is_safe_attribute("style", "background: url(javascript:x)"));
    }

    #[test]
    fn test_sanitize_html() {
        let dirty = r#"<div onclick="steal()"><script>alert(1)</script><a href="javascript:x()">l</a><img src='data:text/html,x'>ok</div>"#;
        let clean = sanitize_html(dirty);
        assert!(!is_unsafe_html(&clean), "{clean}");
        assert!(clean.contains("ok"));
        assert!(clean.contains(r##"href="#""##));
        assert_eq!(sanitize_html("<p>plain</p>"), "<p>plain</p>");
    }

    #[test]
    fn test_sanitize_unquoted_and_slash_forms() {
        for dirty in [
            "<a href=javascript:alert(1)>x</a>",
            "<img/onerror=alert(1) src=x>",
            "<iframe src=javascript:alert(1)></iframe>",
        ] {
            assert!(is_unsafe_html(dirty), "{dirty}");
            let clean = sanitize_html(dirty);
            assert!(!is_unsafe_html(&clean), "{dirty} -> {clean}");
            assert_eq!(sanitize_html_checked(dirty), Some(clean));
        }
        assert!(sanitize_html("<img/onerror=alert(1) src=x>").contains("src=x"));
    }

    #[test]
    fn test_checked_refuses_leftovers() {
        // Text mentioning the scheme survives the rewrites and is refused.
        assert_eq!(sanitize_html_checked("<p>javascript:alert(1)</p>"), None);
        assert_eq!(sanitize_html_checked("<p>fine</p>").as_deref(), Some("<p>fine</p>"));
    }
}
