//! Context tags carried in the `Referer` of Dash callback requests.
//!
//! The Dash page is loaded as `https://host/<app>/?frame=..&layout=..&state=..`,
//! and every callback it issues refers back to that URL.

use axum::http::header::REFERER;
use axum::http::HeaderMap;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::MiddlewareError;

static FRAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:.*[?&]frame=)([^&]+)").expect("frame pattern is valid"));
static LAYOUT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:.*[?&]layout=)([^&]+)").expect("layout pattern is valid"));
static STATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:.*[?&]state=)([^&]+)").expect("state pattern is valid"));
static BASE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https://[^/]+(.+?)/\?").expect("base pattern is valid"));

/// Fields extracted from the referer. Each is empty when absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefererMetadata {
    pub frame: String,
    pub layout: String,
    pub state: String,
    /// Path of the app page, e.g. `/app` for `https://host/app/?frame=1`.
    pub base: String,
}

impl RefererMetadata {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let referer = match headers.get(REFERER).map(|v| std::str::from_utf8(v.as_bytes())) {
            Some(Ok(referer)) => referer,
            Some(Err(_)) => {
                let err = MiddlewareError::MalformedHeader { header: REFERER };
                tracing::debug!(error = %err, "Ignoring referer");
                ""
            }
            None => "",
        };
        Self::parse(referer)
    }

    /// Each field is matched independently; a miss is not an error.
    pub fn parse(referer: &str) -> Self {
        Self {
            frame: capture(&FRAME, referer),
            layout: capture(&LAYOUT, referer),
            state: capture(&STATE, referer),
            base: capture(&BASE, referer),
        }
    }
}

fn capture(pattern: &Regex, haystack: &str) -> String {
    pattern
        .captures(haystack)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn test_all_fields() {
        let meta = RefererMetadata::parse("https://h/app/?frame=F1&layout=L2&state=S3");
        assert_eq!(meta.frame, "F1");
        assert_eq!(meta.layout, "L2");
        assert_eq!(meta.state, "S3");
        assert_eq!(meta.base, "/app");
    }

    #[test]
    fn test_empty_referer() {
        assert_eq!(RefererMetadata::parse(""), RefererMetadata::default());
    }

    #[test]
    fn test_fields_are_independent() {
        let meta = RefererMetadata::parse("https://h/apps/sales/?frame=7");
        assert_eq!(meta.frame, "7");
        assert_eq!(meta.layout, "");
        assert_eq!(meta.state, "");
        assert_eq!(meta.base, "/apps/sales");

        let meta = RefererMetadata::parse("https://h/x/?layout=abc&other=1");
        assert_eq!(meta.frame, "");
        assert_eq!(meta.layout, "abc");
    }

    #[test]
    fn test_parameter_order_does_not_matter() {
        let meta = RefererMetadata::parse("https://h/app/?state=s&layout=l&frame=f");
        assert_eq!(meta.frame, "f");
        assert_eq!(meta.layout, "l");
        assert_eq!(meta.state, "s");
    }

    #[test]
    fn test_plain_http_has_no_base() {
        let meta = RefererMetadata::parse("http://h/app/?frame=1");
        assert_eq!(meta.frame, "1");
        assert_eq!(meta.base, "");
    }

    #[test]
    fn test_from_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(
            RefererMetadata::from_headers(&headers),
            RefererMetadata::default()
        );

        headers.insert(
            REFERER,
            HeaderValue::from_static("https://h/app/?frame=F&layout=L"),
        );
        let meta = RefererMetadata::from_headers(&headers);
        assert_eq!(meta.frame, "F");
        assert_eq!(meta.layout, "L");

        headers.insert(REFERER, HeaderValue::from_bytes(b"\xfe?frame=1").unwrap());
        assert_eq!(
            RefererMetadata::from_headers(&headers),
            RefererMetadata::default()
        );
    }
}
