//! Track service client.
//!
//! Every recorded callback that produced a response (from the Dash app or the
//! result cache) is reported to the track service. Reports are fire-and-forget:
//! the client already has its response, so a slow or failing tracker is only
//! logged.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::header::{CONTENT_ENCODING, CONTENT_TYPE, EXPIRES};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::Instrument;

use crate::error::{Collaborator, MiddlewareError};
use crate::stats::ProxyStats;

/// One completed interaction, as posted to the track service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TrackedEvent {
    pub request: String,
    pub result: String,
    #[serde(rename = "URL")]
    pub url: String,
    pub email: Vec<String>,
    pub groups: Vec<String>,
    pub frame: String,
    pub cached: bool,
    /// Seconds from request entry until the response body was complete.
    pub duration: f64,
    pub referer_base: String,
}

/// Response headers the collector needs to interpret `Result`.
#[derive(Debug, Clone, Default)]
pub struct TrackHeaders {
    expires: Option<HeaderValue>,
    content_type: Option<HeaderValue>,
    content_encoding: Option<HeaderValue>,
}

impl TrackHeaders {
    /// Pick the headers off the response sent to the client.
    pub fn from_response(headers: &HeaderMap) -> Self {
        Self {
            expires: headers.get(EXPIRES).cloned(),
            content_type: headers.get(CONTENT_TYPE).cloned(),
            content_encoding: headers.get(CONTENT_ENCODING).cloned(),
        }
    }
}

#[derive(Clone)]
pub struct TelemetryReporter {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
    semaphore: Arc<Semaphore>,
    stats: ProxyStats,
}

impl TelemetryReporter {
    pub fn new(
        client: reqwest::Client,
        url: String,
        timeout_secs: u64,
        max_in_flight: usize,
        stats: ProxyStats,
    ) -> Self {
        Self {
            client,
            url,
            timeout: Duration::from_secs(timeout_secs),
            semaphore: Arc::new(Semaphore::new(max_in_flight)),
            stats,
        }
    }

    /// Fire-and-forget: spawns a tokio task to post the event and returns
    /// immediately. The task is detached from the client connection.
    pub fn dispatch(&self, event: TrackedEvent, headers: TrackHeaders, correlation_id: String) {
        // Non-blocking acquire: drop the report if at capacity
        let permit = match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::warn!(
                    correlation_id = %correlation_id,
                    url = %event.url,
                    "Track semaphore full, dropping report"
                );
                self.stats.inc_track_failures();
                return;
            }
        };

        let reporter = self.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let span = dash_tracing::collaborator_span!("track_event", correlation_id, reporter.url);
            match reporter.send(&event, &headers).instrument(span).await {
                Ok(()) => reporter.stats.inc_tracked(),
                Err(e) => {
                    reporter.stats.inc_track_failures();
                    tracing::warn!(
                        error = %e,
                        kind = ?e.kind(),
                        correlation_id = %correlation_id,
                        "Failed to track request"
                    );
                }
            }
        });
    }

    async fn send(&self, event: &TrackedEvent, headers: &TrackHeaders) -> Result<(), MiddlewareError> {
        let payload = serde_json::to_vec(event)
            .map_err(MiddlewareError::serialization(Collaborator::TrackService))?;

        // The body is JSON, but Content-Type describes `Result` for the collector
        let content_type = headers
            .content_type
            .clone()
            .unwrap_or_else(|| HeaderValue::from_static("application/json"));
        let mut builder = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .header(CONTENT_TYPE, content_type)
            .body(payload);
        if let Some(expires) = &headers.expires {
            builder = builder.header(EXPIRES, expires);
        }
        if let Some(encoding) = &headers.content_encoding {
            builder = builder.header(CONTENT_ENCODING, encoding);
        }

        let start = Instant::now();
        let response = builder
            .send()
            .await
            .map_err(MiddlewareError::upstream(Collaborator::TrackService))?;
        let status = response.status();
        tracing::Span::current().record("status", status.as_u16());
        tracing::Span::current().record("latency_ms", start.elapsed().as_millis() as u64);

        if status != StatusCode::OK {
            return Err(MiddlewareError::UpstreamStatus {
                service: Collaborator::TrackService,
                status,
            });
        }
        tracing::debug!(url = %event.url, cached = event.cached, "Request tracked");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn event() -> TrackedEvent {
        TrackedEvent {
            request: "{\"inputs\":[]}".to_string(),
            result: "{\"response\":{}}".to_string(),
            url: "/_dash-update-component".to_string(),
            email: vec!["ada@example.com".to_string()],
            groups: vec!["analysts".to_string()],
            frame: "F1".to_string(),
            cached: false,
            duration: 0.25,
            referer_base: "/app".to_string(),
        }
    }

    fn reporter(url: String, stats: ProxyStats) -> TelemetryReporter {
        TelemetryReporter::new(reqwest::Client::new(), url, 5, 4, stats)
    }

    #[test]
    fn test_event_field_names() {
        let value = serde_json::to_value(event()).unwrap();
        let mut keys: Vec<&str> = value.as_object().unwrap().keys().map(|k| k.as_str()).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec![
                "Cached",
                "Duration",
                "Email",
                "Frame",
                "Groups",
                "RefererBase",
                "Request",
                "Result",
                "URL",
            ]
        );
    }

    #[tokio::test]
    async fn test_send_forwards_response_headers() {
        let tracker = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/track"))
            .and(header("content-type", "application/json; charset=utf-8"))
            .and(header("content-encoding", "gzip"))
            .and(header("expires", "0"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&tracker)
            .await;

        let mut response_headers = HeaderMap::new();
        response_headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        response_headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        response_headers.insert(EXPIRES, HeaderValue::from_static("0"));

        let reporter = reporter(format!("{}/track", tracker.uri()), ProxyStats::new());
        reporter
            .send(&event(), &TrackHeaders::from_response(&response_headers))
            .await
            .unwrap();

        let received = tracker.received_requests().await.unwrap();
        let posted: TrackedEvent = serde_json::from_slice(&received[0].body).unwrap();
        assert_eq!(posted, event());
    }

    #[tokio::test]
    async fn test_send_without_response_headers() {
        let tracker = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&tracker)
            .await;

        let reporter = reporter(tracker.uri(), ProxyStats::new());
        reporter
            .send(&event(), &TrackHeaders::default())
            .await
            .unwrap();

        let received = tracker.received_requests().await.unwrap();
        assert_eq!(received[0].headers["content-type"], "application/json");
        assert!(received[0].headers.get("content-encoding").is_none());
        assert!(received[0].headers.get("expires").is_none());
    }

    #[tokio::test]
    async fn test_dispatch_failure_only_counted() {
        let tracker = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&tracker)
            .await;

        let stats = ProxyStats::new();
        let reporter = reporter(tracker.uri(), stats.clone());
        reporter.dispatch(event(), TrackHeaders::default(), "test".to_string());

        for _ in 0..100 {
            if stats.snapshot().track_failures == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(stats.snapshot().track_failures, 1);
        assert_eq!(stats.snapshot().tracked, 0);
    }

    #[tokio::test]
    async fn test_dispatch_drops_when_saturated() {
        let stats = ProxyStats::new();
        let reporter = TelemetryReporter::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9".to_string(),
            5,
            0,
            stats.clone(),
        );

        reporter.dispatch(event(), TrackHeaders::default(), "test".to_string());

        assert_eq!(stats.snapshot().track_failures, 1);
    }
}
