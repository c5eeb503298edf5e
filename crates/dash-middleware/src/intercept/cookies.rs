//! Removal of auth-proxy session cookies from the forwarded request.

use axum::http::header::COOKIE;
use axum::http::{HeaderMap, HeaderValue};
use once_cell::sync::Lazy;
use regex::bytes::Regex;

/// Cookies set by the auth proxy. They carry its session and must not reach
/// the Dash app.
pub const AUTH_COOKIE_PREFIX: &[u8] = b"_oauth2_proxy";

/// One `name=value` pair; group 1 is the name with surrounding spaces trimmed.
/// Matches raw bytes, so values that are not ASCII survive untouched.
static COOKIE_PAIR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?-u) *([^=;]+?) *=[^;]+").expect("cookie pattern is valid")
});

/// Rewrite every `Cookie` line in place, dropping auth-proxy pairs.
///
/// Lines left with no pairs are removed, so a request that only carried
/// auth-proxy cookies is forwarded without a `Cookie` header at all.
pub fn sanitize(headers: &mut HeaderMap) {
    let lines: Vec<HeaderValue> = headers.get_all(COOKIE).iter().cloned().collect();
    if lines.is_empty() {
        return;
    }
    headers.remove(COOKIE);

    for line in lines {
        let Some(kept) = filter_line(line.as_bytes()) else {
            continue;
        };
        match HeaderValue::from_bytes(&kept) {
            Ok(value) => {
                headers.append(COOKIE, value);
            }
            Err(e) => tracing::debug!(error = %e, "Dropping unrepresentable cookie line"),
        }
    }
}

/// Filter one cookie line; `None` when no pair survives.
fn filter_line(line: &[u8]) -> Option<Vec<u8>> {
    let keep: Vec<&[u8]> = COOKIE_PAIR
        .captures_iter(line)
        .filter(|pair| !pair[1].starts_with(AUTH_COOKIE_PREFIX))
        .filter_map(|pair| pair.get(0).map(|m| m.as_bytes()))
        .collect();

    if keep.is_empty() {
        return None;
    }
    Some(keep.join(&b';').trim_ascii().to_vec())
}
