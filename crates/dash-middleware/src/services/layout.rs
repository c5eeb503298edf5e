//! Layout service client.
//!
//! A Dash page opened with `?layout=<name>` gets its initial layout from the
//! layout service instead of the Dash app.

use std::time::Instant;

use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::Instrument;

use crate::error::{Collaborator, MiddlewareError};
use crate::intercept::request::InterceptedRequest;

#[derive(Debug, Serialize)]
struct LayoutRequest<'a> {
    email: &'a [String],
    layout: &'a str,
    frame: &'a str,
}

#[derive(Clone)]
pub struct LayoutProxy {
    client: reqwest::Client,
    url: String,
}

impl LayoutProxy {
    pub fn new(client: reqwest::Client, url: String) -> Self {
        Self { client, url }
    }

    /// Fetch the layout named in the referer and build the client response.
    pub async fn fetch(&self, request: &InterceptedRequest) -> Result<Response, MiddlewareError> {
        let payload = serde_json::to_vec(&LayoutRequest {
            email: &request.identity.email,
            layout: &request.referer.layout,
            frame: &request.referer.frame,
        })
        .map_err(MiddlewareError::serialization(Collaborator::LayoutService))?;

        let span =
            dash_tracing::collaborator_span!("layout_fetch", request.correlation_id, self.url);
        self.post(payload).instrument(span).await
    }

    async fn post(&self, payload: Vec<u8>) -> Result<Response, MiddlewareError> {
        let start = Instant::now();
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await
            .map_err(MiddlewareError::upstream(Collaborator::LayoutService))?;

        let status = response.status();
        tracing::Span::current().record("status", status.as_u16());
        if status != StatusCode::OK {
            return Err(MiddlewareError::UpstreamStatus {
                service: Collaborator::LayoutService,
                status,
            });
        }

        let layout = response
            .bytes()
            .await
            .map_err(MiddlewareError::upstream(Collaborator::LayoutService))?;
        tracing::Span::current().record("latency_ms", start.elapsed().as_millis() as u64);

        Ok(([(CONTENT_TYPE, "application/json")], layout).into_response())
    }
}
