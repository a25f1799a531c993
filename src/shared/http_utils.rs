//! Redaction helpers shared by the HTTP logging middleware and the realtime channel.

use http::header::HeaderName;
use http::HeaderMap;
use std::collections::HashSet;
use url::Url;

/// Placeholder written in place of secret values.
pub const REDACTED: &str = "[REDACTED]";

/// Headers that carry credentials and are redacted by default.
pub fn default_redacted_headers() -> HashSet<HeaderName> {
    [
        "authorization",
        "cookie",
        "set-cookie",
        "x-api-key",
        "proxy-authorization",
        "x-auth-token",
    ]
    .into_iter()
    .map(HeaderName::from_static)
    .collect()
}

/// Redact sensitive header values.
///
/// Returns either the redacted value or the original value if the header
/// is not in the redaction list.
///
/// # Arguments
///
/// * `name` - Header name to check
/// * `value` - Original header value
/// * `redact_headers` - Set of headers to redact
/// * `show_auth_scheme` - Whether to keep auth scheme (e.g., "Bearer")
/// * `max_len` - Optional maximum length for non-redacted values
pub fn redact_header_value(
    name: &HeaderName,
    value: &str,
    redact_headers: &HashSet<HeaderName>,
    show_auth_scheme: bool,
    max_len: Option<usize>,
) -> String {
    if !redact_headers.contains(name) {
        return truncate_value(value, max_len);
    }

    if name == "authorization" && show_auth_scheme {
        if let Some((scheme, _)) = value.split_once(' ') {
            return format!("{scheme} {REDACTED}");
        }
    }
    REDACTED.to_string()
}

/// Render a header map as `name: value` pairs with redaction applied.
pub fn format_headers(
    headers: &HeaderMap,
    redact_headers: &HashSet<HeaderName>,
    show_auth_scheme: bool,
    max_len: Option<usize>,
) -> String {
    let parts: Vec<String> = headers
        .iter()
        .map(|(name, value)| {
            let value = value.to_str().unwrap_or("<invalid-utf8>");
            format!(
                "{}: {}",
                name.as_str(),
                redact_header_value(name, value, redact_headers, show_auth_scheme, max_len)
            )
        })
        .collect();

    if parts.is_empty() {
        "(no headers)".to_string()
    } else {
        parts.join(", ")
    }
}

/// Copy of `url` with the `token` query credential masked, for log output.
pub fn redact_url_token(url: &Url) -> String {
    if !url.query_pairs().any(|(key, _)| key == "token") {
        return url.to_string();
    }

    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(key, value)| {
            let value = if key == "token" {
                REDACTED.to_string()
            } else {
                value.into_owned()
            };
            (key.into_owned(), value)
        })
        .collect();

    let mut masked = url.clone();
    masked.query_pairs_mut().clear().extend_pairs(pairs);
    masked.to_string()
}

/// Truncate a value to a maximum length.
fn truncate_value(value: &str, max_len: Option<usize>) -> String {
    match max_len {
        Some(max) if value.len() > max => {
            let cut = (0..=max)
                .rev()
                .find(|idx| value.is_char_boundary(*idx))
                .unwrap_or(0);
            format!("{}...", &value[..cut])
        },
        _ => value.to_string(),
    }
}
