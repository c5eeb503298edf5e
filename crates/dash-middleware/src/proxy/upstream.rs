//! Transparent forwarding to the Dash application.
//!
//! This is the downstream handler behind the interception pipeline. Method,
//! path, query, headers, and body go out as received (after the pipeline has
//! sanitized them). Both bodies are streamed, so requests the pipeline does
//! not record are not subject to its buffering limit.

use std::time::Instant;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::Instrument;

/// Headers that should NOT be forwarded (hop-by-hop headers).
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "host",
    "connection",
    "transfer-encoding",
    "keep-alive",
    "upgrade",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|hop| hop.eq_ignore_ascii_case(name))
}

/// Client and base URL for the Dash app.
#[derive(Clone)]
pub struct Upstream {
    pub client: reqwest::Client,
    pub base_url: String,
}

/// Router fallback: forward any request to the Dash app.
pub async fn forward(State(upstream): State<Upstream>, request: Request) -> Response {
    let method = request.method().clone();
    let target = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let url = format!("{}{target}", upstream.base_url.trim_end_matches('/'));

    let span = dash_tracing::upstream_forward_span!(&method, &url);
    let start = Instant::now();

    let headers = request.headers().clone();
    let body = reqwest::Body::wrap_stream(request.into_body().into_data_stream());

    async {
        let mut req_builder = upstream.client.request(method, &url).body(body);
        for (name, value) in headers.iter() {
            if is_hop_by_hop(name.as_str()) {
                continue;
            }
            req_builder = req_builder.header(name, value);
        }

        build_response(req_builder.send().await, start)
    }
    .instrument(span)
    .await
}

/// Build an axum Response from the upstream reqwest result, streaming the body back.
fn build_response(
    upstream_result: Result<reqwest::Response, reqwest::Error>,
    start: Instant,
) -> Response {
    let upstream_resp = match upstream_result {
        Ok(resp) => resp,
        Err(e) => {
            let latency = start.elapsed().as_millis() as u64;
            tracing::Span::current().record("latency_ms", latency);
            tracing::Span::current().record("status", 502_u16);

            if e.is_timeout() {
                tracing::error!(error = %e, "Dash app timeout");
                return (StatusCode::GATEWAY_TIMEOUT, "upstream timeout").into_response();
            }
            tracing::error!(error = %e, "Dash app connection error");
            return (StatusCode::BAD_GATEWAY, "upstream connection error").into_response();
        }
    };

    let status = upstream_resp.status();
    let latency = start.elapsed().as_millis() as u64;
    tracing::Span::current().record("latency_ms", latency);
    tracing::Span::current().record("status", status.as_u16());
    tracing::debug!(status = status.as_u16(), latency_ms = latency, "Forward complete");

    let mut response = Response::builder().status(status);
    if let Some(headers) = response.headers_mut() {
        copy_end_to_end(upstream_resp.headers(), headers);
    }

    response
        .body(Body::from_stream(upstream_resp.bytes_stream()))
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to build response");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
        })
}

/// Append every end-to-end header of `from` onto `to`.
pub fn copy_end_to_end(from: &HeaderMap, to: &mut HeaderMap) {
    for (name, value) in from.iter() {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }
        to.append(name.clone(), value.clone());
    }
}
