//! Span builder helpers for dash-middleware instrumentation.

/// Create the root span for one intercepted request.
///
/// Usage: `let span = intercept_request_span!(correlation_id, method, url);`
///
/// Fields recorded later by the pipeline:
/// - `route`: the route decision (`not_recorded`, `recorded`, `layout_fetch`)
/// - `cache`: the cache outcome (`hit`, `miss`, `pending`)
/// - `frame`: the frame id taken from the referer
#[macro_export]
macro_rules! intercept_request_span {
    ($correlation_id:expr, $method:expr, $url:expr) => {
        tracing::info_span!(
            "intercept_request",
            correlation_id = %$correlation_id,
            method = %$method,
            url = %$url,
            route = tracing::field::Empty,
            cache = tracing::field::Empty,
            frame = tracing::field::Empty,
        )
    };
}

/// Create a span for a call to one of the backend collaborators
/// (result cache, layout service, track service).
#[macro_export]
macro_rules! collaborator_span {
    ($name:literal, $correlation_id:expr, $target:expr) => {
        tracing::info_span!(
            $name,
            correlation_id = %$correlation_id,
            target = %$target,
            status = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        )
    };
}

/// Create a span for the forward to the Dash application.
#[macro_export]
macro_rules! upstream_forward_span {
    ($method:expr, $url:expr) => {
        tracing::info_span!(
            "upstream_forward",
            method = %$method,
            url = %$url,
            status = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        )
    };
}
