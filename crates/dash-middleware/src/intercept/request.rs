//! Per-request snapshot shared by the cache probe, layout fetch, and tracker.

use axum::http::Method;
use bytes::Bytes;

use super::identity::Identity;
use super::referer::RefererMetadata;

/// Everything the pipeline knows about one inbound request, taken once after
/// the headers have been sanitized and the body buffered.
#[derive(Debug, Clone)]
pub struct InterceptedRequest {
    pub correlation_id: String,
    pub method: Method,
    /// Request target as received: path plus query.
    pub url: String,
    pub body: Bytes,
    pub identity: Identity,
    pub referer: RefererMetadata,
}

impl InterceptedRequest {
    /// Body as text for the JSON payloads. Invalid UTF-8 is replaced.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}
