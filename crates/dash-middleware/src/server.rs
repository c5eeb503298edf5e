//! Axum HTTP server: router, listener, graceful shutdown.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::config::MiddlewareConfig;
use crate::intercept::{self, Interceptor};
use crate::proxy::upstream::{self, Upstream};
use crate::stats::ProxyStats;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: MiddlewareConfig,
    pub upstream: Upstream,
    pub interceptor: Arc<Interceptor>,
    pub stats: ProxyStats,
}

/// Assemble the router.
///
/// Everything except the `/_middleware/*` endpoints goes through the
/// interception pipeline and, unless the pipeline answers itself, on to the
/// Dash app.
pub fn router(state: AppState) -> Router {
    let dash = Router::new()
        .fallback(upstream::forward)
        .with_state(state.upstream.clone())
        .layer(axum::middleware::from_fn_with_state(
            state.interceptor.clone(),
            intercept::intercept,
        ));

    Router::new()
        .route("/_middleware/health", get(handle_health))
        .route("/_middleware/stats", get(handle_get_stats))
        .with_state(Arc::new(state))
        .merge(dash)
        .layer(TraceLayer::new_for_http())
}

/// Build and run the HTTP server.
pub async fn run(state: AppState) -> anyhow::Result<()> {
    let listen_addr = state.config.server.listen_address.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "dash-middleware listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("dash-middleware shut down gracefully");
    Ok(())
}

/// GET /_middleware/stats: current pipeline counters.
async fn handle_get_stats(State(state): State<Arc<AppState>>) -> Response {
    axum::Json(state.stats.snapshot()).into_response()
}

/// Health check endpoint.
async fn handle_health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Wait for SIGINT (Ctrl+C) for graceful shutdown.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for CTRL+C, shutting down");
        return;
    }
    tracing::info!("Shutdown signal received, draining connections...");
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::extract::Request;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    /// Serve `app` on a real socket, the way `run` does.
    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    async fn track_count(services: &MockServer) -> usize {
        services
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == "/track")
            .count()
    }

    /// Wait for the detached track task, then give a duplicate time to show up.
    async fn track_posts(services: &MockServer) -> usize {
        for _ in 0..200 {
            if track_count(services).await > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        track_count(services).await
    }

    async fn post_callback(base: &str) -> reqwest::Response {
        reqwest::Client::new()
            .post(format!("{base}/app/_dash-update-component"))
            .header("content-type", "application/json")
            .header("referer", "https://dash.example.com/app/?frame=F1")
            .body("{\"inputs\":[]}")
            .send()
            .await
            .unwrap()
    }

    async fn app(dash_url: String, services: &MockServer) -> (Router, ProxyStats) {
        let mut config = MiddlewareConfig::default();
        config.upstream.url = dash_url;
        config.services.result_url = format!("{}/result", services.uri());
        config.services.layout_url = format!("{}/getlayout", services.uri());
        config.services.track_url = format!("{}/track", services.uri());

        let stats = ProxyStats::new();
        let interceptor = Arc::new(Interceptor::new(
            &config,
            reqwest::Client::new(),
            reqwest::Client::new(),
            stats.clone(),
        ));
        let upstream = Upstream {
            client: reqwest::Client::new(),
            base_url: config.upstream.url.clone(),
        };
        let state = AppState {
            config,
            upstream,
            interceptor,
            stats: stats.clone(),
        };
        (router(state), stats)
    }

    #[tokio::test]
    async fn test_health() {
        let services = MockServer::start().await;
        let (app, _) = app("http://127.0.0.1:9".to_string(), &services).await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/_middleware/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_recorded_callback_reaches_dash_app() {
        let dash = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/app/_dash-update-component"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("{\"response\":{}}", "application/json"))
            .expect(1)
            .mount(&dash)
            .await;

        let services = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/result"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&services)
            .await;
        Mock::given(method("POST"))
            .and(path("/track"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&services)
            .await;

        let (app, stats) = app(dash.uri(), &services).await;
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/app/_dash-update-component")
                    .header("content-type", "application/json")
                    .body(Body::from("{\"inputs\":[]}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"{\"response\":{}}");

        let stats_response = app
            .oneshot(
                Request::builder()
                    .uri("/_middleware/stats")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = axum::body::to_bytes(stats_response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["requests"], 1);
        assert_eq!(json["recorded"], 1);
        assert_eq!(json["cache_misses"], 1);
        assert_eq!(stats.snapshot().requests, 1);
    }

    #[tokio::test]
    async fn test_cache_hit_over_socket_is_tracked_once() {
        let dash = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&dash)
            .await;

        let services = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/result"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("{\"cached\":1}", "application/json"))
            .mount(&services)
            .await;
        Mock::given(method("POST"))
            .and(path("/track"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&services)
            .await;

        let (app, stats) = app(dash.uri(), &services).await;
        let base = serve(app).await;

        let response = post_callback(&base).await;
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(response.headers()["content-length"], "12");
        assert_eq!(&response.bytes().await.unwrap()[..], b"{\"cached\":1}");

        assert_eq!(track_posts(&services).await, 1);
        assert_eq!(stats.snapshot().cache_hits, 1);
    }

    #[tokio::test]
    async fn test_forwarded_callback_over_socket_is_tracked_once() {
        let dash = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/app/_dash-update-component"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("{\"response\":{}}", "application/json"))
            .expect(1)
            .mount(&dash)
            .await;

        let services = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/result"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&services)
            .await;
        Mock::given(method("POST"))
            .and(path("/track"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&services)
            .await;

        let (app, stats) = app(dash.uri(), &services).await;
        let base = serve(app).await;

        let response = post_callback(&base).await;
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert!(response.headers().contains_key("content-length"));
        assert_eq!(&response.bytes().await.unwrap()[..], b"{\"response\":{}}");

        assert_eq!(track_posts(&services).await, 1);
        for _ in 0..50 {
            if stats.snapshot().tracked == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(stats.snapshot().tracked, 1);

        let track = &services
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .find(|r| r.url.path() == "/track")
            .unwrap();
        let event: serde_json::Value = serde_json::from_slice(&track.body).unwrap();
        assert_eq!(event["Result"], "{\"response\":{}}");
        assert_eq!(event["Cached"], false);
        assert_eq!(event["Frame"], "F1");
    }
}
