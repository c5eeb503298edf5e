//! Result-cache client.
//!
//! Before a recorded callback reaches the Dash app, the result cache is asked
//! whether it already holds the response for the same URL and body. A 200 is
//! a hit and its response is replayed to the client; anything else, including
//! an unreachable cache, is a miss.

use std::time::Instant;

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::Instrument;

use crate::error::{Collaborator, MiddlewareError};
use crate::intercept::request::InterceptedRequest;
use crate::proxy::upstream::copy_end_to_end;

#[derive(Debug, Serialize)]
struct ProbeRequest<'a> {
    #[serde(rename = "Request")]
    request: String,
    #[serde(rename = "URL")]
    url: &'a str,
    longcallback: bool,
}

/// A cache hit: the cache service's response, not yet read.
#[derive(Debug)]
pub struct CachedResponse {
    response: reqwest::Response,
}

/// Replays the cache response: status 200, its end-to-end headers, its body.
impl IntoResponse for CachedResponse {
    fn into_response(self) -> Response {
        let mut builder = Response::builder().status(StatusCode::OK);
        if let Some(headers) = builder.headers_mut() {
            copy_end_to_end(self.response.headers(), headers);
        }
        builder
            .body(Body::from_stream(self.response.bytes_stream()))
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "Failed to build cached response");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
            })
    }
}

#[derive(Debug)]
pub enum CacheProbe {
    Hit(CachedResponse),
    Miss,
}

#[derive(Clone)]
pub struct CacheConsultant {
    client: reqwest::Client,
    url: String,
}

impl CacheConsultant {
    pub fn new(client: reqwest::Client, url: String) -> Self {
        Self { client, url }
    }

    /// Ask the result cache for `request`. Failures count as a miss.
    pub async fn probe(&self, request: &InterceptedRequest) -> CacheProbe {
        match self.lookup(request).await {
            Ok(probe) => probe,
            Err(e) => {
                tracing::warn!(error = %e, kind = ?e.kind(), "Result cache probe failed, treating as miss");
                CacheProbe::Miss
            }
        }
    }

    async fn lookup(&self, request: &InterceptedRequest) -> Result<CacheProbe, MiddlewareError> {
        let payload = serde_json::to_vec(&ProbeRequest {
            request: request.body_text(),
            url: &request.url,
            longcallback: request.identity.long_callback,
        })
        .map_err(MiddlewareError::serialization(Collaborator::ResultCache))?;

        let span = dash_tracing::collaborator_span!("cache_probe", request.correlation_id, self.url);
        self.post(payload).instrument(span).await
    }

    async fn post(&self, payload: Vec<u8>) -> Result<CacheProbe, MiddlewareError> {
        let start = Instant::now();
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await
            .map_err(MiddlewareError::upstream(Collaborator::ResultCache))?;

        let status = response.status();
        tracing::Span::current().record("status", status.as_u16());
        tracing::Span::current().record("latency_ms", start.elapsed().as_millis() as u64);

        if status == StatusCode::OK {
            Ok(CacheProbe::Hit(CachedResponse { response }))
        } else {
            tracing::debug!(status = status.as_u16(), "Result cache miss");
            Ok(CacheProbe::Miss)
        }
    }
}
