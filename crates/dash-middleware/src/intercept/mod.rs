//! The interception pipeline.
//!
//! Per request:
//! 1. Strip auth-proxy cookies, read identity headers, parse the referer
//! 2. Classify the route
//! 3. Not recorded: hand the request to the Dash app, body unbuffered
//! 4. Buffer the body
//! 5. Layout fetch: answer from the layout service and stop
//! 6. Recorded: probe the result cache, then exactly one of
//!    - replay the cached response
//!    - answer 202 for a long callback that is not cached yet
//!    - run the Dash app
//! 7. Report the interaction once the response body has fully streamed
//!    (not on the 202 path)

pub mod cookies;
pub mod identity;
pub mod referer;
pub mod request;
pub mod route;

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::Instrument;

use crate::config::MiddlewareConfig;
use crate::error::MiddlewareError;
use crate::proxy::capture::capture_response;
use crate::proxy::correlation;
use crate::services::cache::{CacheConsultant, CacheProbe};
use crate::services::layout::LayoutProxy;
use crate::services::track::{TelemetryReporter, TrackHeaders, TrackedEvent};
use crate::stats::ProxyStats;
use identity::Identity;
use referer::RefererMetadata;
use request::InterceptedRequest;
use route::{RouteClassifier, RouteDecision};

/// Immutable pipeline state shared by all requests.
pub struct Interceptor {
    routes: RouteClassifier,
    cache: CacheConsultant,
    layouts: LayoutProxy,
    tracker: TelemetryReporter,
    stats: ProxyStats,
    max_body_bytes: usize,
}

impl Interceptor {
    /// `services_client` serves the cache probe and layout fetch and carries
    /// their timeout; the tracker sets its own per-request timeout.
    pub fn new(
        config: &MiddlewareConfig,
        services_client: reqwest::Client,
        track_client: reqwest::Client,
        stats: ProxyStats,
    ) -> Self {
        let services = &config.services;
        Self {
            routes: RouteClassifier::new(config.recorded_urls.clone()),
            cache: CacheConsultant::new(services_client.clone(), services.result_url.clone()),
            layouts: LayoutProxy::new(services_client, services.layout_url.clone()),
            tracker: TelemetryReporter::new(
                track_client,
                services.track_url.clone(),
                services.track_timeout_secs,
                services.track_max_in_flight,
                stats.clone(),
            ),
            stats,
            max_body_bytes: config.server.max_body_bytes,
        }
    }

    async fn handle(
        &self,
        request: Request,
        next: Next,
        started: Instant,
        correlation_id: String,
    ) -> Response {
        let (mut parts, body) = request.into_parts();
        cookies::sanitize(&mut parts.headers);
        let identity = Identity::extract(&mut parts.headers);
        let referer = RefererMetadata::from_headers(&parts.headers);
        let url = parts.uri.to_string();

        let route = self.routes.classify(&url, &referer);
        let span = tracing::Span::current();
        span.record("route", route.as_str());
        span.record("frame", referer.frame.as_str());
        tracing::debug!(
            method = %parts.method,
            route = route.as_str(),
            state = %referer.state,
            "Request classified"
        );

        // Not recorded: the body is never inspected, so it streams through unbuffered
        if route == RouteDecision::NotRecorded {
            return next.run(Request::from_parts(parts, body)).await;
        }

        let body = match axum::body::to_bytes(body, self.max_body_bytes).await {
            Ok(body) => body,
            Err(e) => {
                let err = MiddlewareError::ReadBody(e);
                tracing::error!(error = %err, "Aborting request");
                return err.into_response();
            }
        };

        let snapshot = InterceptedRequest {
            correlation_id,
            method: parts.method.clone(),
            url,
            body: body.clone(),
            identity,
            referer,
        };
        let request = Request::from_parts(parts, Body::from(body));

        if route == RouteDecision::LayoutFetch {
            self.fetch_layout(&snapshot).await
        } else {
            self.record(snapshot, request, next, started).await
        }
    }

    async fn fetch_layout(&self, snapshot: &InterceptedRequest) -> Response {
        self.stats.inc_layout_fetches();
        match self.layouts.fetch(snapshot).await {
            Ok(response) => response,
            Err(e) => {
                // No other response was prepared, so the request fails closed
                tracing::error!(
                    error = %e,
                    kind = ?e.kind(),
                    layout = %snapshot.referer.layout,
                    "Layout fetch failed"
                );
                e.into_response()
            }
        }
    }

    async fn record(
        &self,
        snapshot: InterceptedRequest,
        request: Request,
        next: Next,
        started: Instant,
    ) -> Response {
        self.stats.inc_recorded();
        let span = tracing::Span::current();

        let (response, cached) = match self.cache.probe(&snapshot).await {
            CacheProbe::Hit(hit) => {
                span.record("cache", "hit");
                self.stats.inc_cache_hits();
                (hit.into_response(), true)
            }
            CacheProbe::Miss if snapshot.identity.long_callback => {
                // The result service is expected to pick the computation up;
                // a later request will find it cached and be tracked then.
                span.record("cache", "pending");
                self.stats.inc_cache_misses();
                self.stats.inc_long_callbacks_deferred();
                return StatusCode::ACCEPTED.into_response();
            }
            CacheProbe::Miss => {
                span.record("cache", "miss");
                self.stats.inc_cache_misses();
                (next.run(request).await, false)
            }
        };

        self.track_on_completion(response, snapshot, cached, started)
    }

    /// Capture the response body and report the interaction when it ends.
    fn track_on_completion(
        &self,
        response: Response,
        snapshot: InterceptedRequest,
        cached: bool,
        started: Instant,
    ) -> Response {
        let headers = TrackHeaders::from_response(response.headers());
        let tracker = self.tracker.clone();

        capture_response(
            response,
            Box::new(move |result| {
                let event = TrackedEvent {
                    request: snapshot.body_text(),
                    result: String::from_utf8_lossy(&result).into_owned(),
                    url: snapshot.url,
                    email: snapshot.identity.email,
                    groups: snapshot.identity.groups,
                    frame: snapshot.referer.frame,
                    cached,
                    duration: started.elapsed().as_secs_f64(),
                    referer_base: snapshot.referer.base,
                };
                tracker.dispatch(event, headers, snapshot.correlation_id);
            }),
        )
    }
}

/// axum middleware entry point; install with
/// `axum::middleware::from_fn_with_state(Arc<Interceptor>, intercept)`.
pub async fn intercept(
    State(interceptor): State<Arc<Interceptor>>,
    request: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    interceptor.stats.inc_requests();

    let correlation_id = correlation::generate_id();
    let span = dash_tracing::intercept_request_span!(
        &correlation_id,
        request.method(),
        request.uri()
    );

    interceptor
        .handle(request, next, started, correlation_id)
        .instrument(span)
        .await
}
