//! Error types for the interception pipeline.
//!
//! Most failures are isolated to the side call that produced them and only
//! logged. Two reach the client: an unreadable inbound body, and a failed
//! layout fetch (which has no other response to fall back on).

use std::fmt;

use axum::http::{HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};

/// A backend service the pipeline talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collaborator {
    ResultCache,
    LayoutService,
    TrackService,
}

impl fmt::Display for Collaborator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Collaborator::ResultCache => "result cache",
            Collaborator::LayoutService => "layout service",
            Collaborator::TrackService => "track service",
        })
    }
}

/// Coarse classification of a [`MiddlewareError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UpstreamUnavailable,
    Malformed,
    SerializationFailure,
    ReadFailure,
}

#[derive(Debug, thiserror::Error)]
pub enum MiddlewareError {
    #[error("{service} request failed: {source}")]
    Upstream {
        service: Collaborator,
        #[source]
        source: reqwest::Error,
    },

    #[error("{service} responded with status {status}")]
    UpstreamStatus {
        service: Collaborator,
        status: StatusCode,
    },

    #[error("header {header} is not valid text")]
    MalformedHeader { header: HeaderName },

    #[error("failed to serialize {service} payload: {source}")]
    Serialization {
        service: Collaborator,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to read request body: {0}")]
    ReadBody(#[source] axum::Error),
}

impl MiddlewareError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MiddlewareError::Upstream { .. } | MiddlewareError::UpstreamStatus { .. } => {
                ErrorKind::UpstreamUnavailable
            }
            MiddlewareError::MalformedHeader { .. } => ErrorKind::Malformed,
            MiddlewareError::Serialization { .. } => ErrorKind::SerializationFailure,
            MiddlewareError::ReadBody(_) => ErrorKind::ReadFailure,
        }
    }

    pub(crate) fn upstream(service: Collaborator) -> impl FnOnce(reqwest::Error) -> Self {
        move |source| MiddlewareError::Upstream { service, source }
    }

    pub(crate) fn serialization(service: Collaborator) -> impl FnOnce(serde_json::Error) -> Self {
        move |source| MiddlewareError::Serialization { service, source }
    }
}

/// Only used on the paths that abort the client response. Everything except a
/// read failure fails closed with an empty 502.
impl IntoResponse for MiddlewareError {
    fn into_response(self) -> Response {
        match self.kind() {
            ErrorKind::ReadFailure => {
                (StatusCode::BAD_REQUEST, "failed to read request body").into_response()
            }
            _ => StatusCode::BAD_GATEWAY.into_response(),
        }
    }
}
