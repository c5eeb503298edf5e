//! Identity headers injected by the auth proxy, and the long-callback flag.

use axum::http::{HeaderMap, HeaderName};

use crate::error::MiddlewareError;

pub const EMAIL_HEADER: HeaderName = HeaderName::from_static("x-auth-request-email");
pub const GROUPS_HEADER: HeaderName = HeaderName::from_static("x-auth-request-groups");
pub const LONG_CALLBACK_HEADER: HeaderName = HeaderName::from_static("x-longcallback");

/// Who made the request, and whether they asked for long-callback handling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub email: Vec<String>,
    pub groups: Vec<String>,
    pub long_callback: bool,
}

impl Identity {
    /// Read the identity and strip what the Dash app does not need.
    ///
    /// Email stays on the request. Groups can be arbitrarily large and are
    /// removed. The long-callback header is removed; its presence alone sets
    /// the flag, whatever its value.
    pub fn extract(headers: &mut HeaderMap) -> Self {
        let email = header_values(headers, &EMAIL_HEADER);
        let groups = header_values(headers, &GROUPS_HEADER);
        headers.remove(&GROUPS_HEADER);
        let long_callback = headers.remove(&LONG_CALLBACK_HEADER).is_some();

        Self {
            email,
            groups,
            long_callback,
        }
    }
}

/// All values of a repeated header, in order. Values that are not UTF-8 are
/// skipped.
pub(crate) fn header_values(headers: &HeaderMap, name: &HeaderName) -> Vec<String> {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| match std::str::from_utf8(value.as_bytes()) {
            Ok(text) => Some(text.to_string()),
            Err(_) => {
                let err = MiddlewareError::MalformedHeader {
                    header: name.clone(),
                };
                tracing::debug!(error = %err, "Skipping header value");
                None
            }
        })
        .collect()
}
