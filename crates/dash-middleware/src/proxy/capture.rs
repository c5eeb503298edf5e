//! Response body capture.
//!
//! `CaptureBody` passes the client-bound byte stream through unchanged while
//! keeping a copy. Once the body is complete, the copy is handed to a
//! completion callback; this is how the tracker learns the exact bytes the
//! client got, whether they came from the Dash app or from the result cache.
//!
//! With a declared `Content-Length`, hyper stops polling the body as soon as
//! that many bytes are written and drops it without reading end-of-stream.
//! Completion is therefore also reached when the buffer hits the declared
//! length, and checked once more on drop.

use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::CONTENT_LENGTH;
use axum::http::HeaderMap;
use axum::response::Response;
use axum::BoxError;
use bytes::Bytes;
use futures_core::Stream;

/// Called once with the full captured body.
pub type OnComplete = Box<dyn FnOnce(Bytes) + Send>;

pub struct CaptureBody<S> {
    inner: Pin<Box<S>>,
    buffer: Vec<u8>,
    expected_len: Option<usize>,
    on_complete: Option<OnComplete>,
}

impl<S> CaptureBody<S> {
    pub fn new(inner: S, on_complete: OnComplete) -> Self {
        Self {
            inner: Box::pin(inner),
            buffer: Vec::new(),
            expected_len: None,
            on_complete: Some(on_complete),
        }
    }

    /// Complete as soon as `len` bytes have passed through.
    pub fn with_expected_len(mut self, len: Option<usize>) -> Self {
        self.expected_len = len;
        self
    }

    fn complete(&mut self) {
        if let Some(on_complete) = self.on_complete.take() {
            on_complete(Bytes::from(std::mem::take(&mut self.buffer)));
        }
    }

    fn reached_expected_len(&self) -> bool {
        self.expected_len
            .is_some_and(|expected| self.buffer.len() >= expected)
    }
}

impl<S, E> Stream for CaptureBody<S>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<BoxError>,
{
    type Item = Result<Bytes, BoxError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if self.on_complete.is_some() {
                    self.buffer.extend_from_slice(&chunk);
                    if self.reached_expected_len() {
                        self.complete();
                    }
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                // A truncated body is not what the client asked for; never report it.
                self.on_complete = None;
                Poll::Ready(Some(Err(e.into())))
            }
            Poll::Ready(None) => {
                self.complete();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S> Drop for CaptureBody<S> {
    fn drop(&mut self) {
        // Covers an empty body with `Content-Length: 0`, which is never polled
        if self.reached_expected_len() {
            self.complete();
        }
    }
}

/// The declared body length, when present and well formed.
fn content_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

/// Rewrap a response so its body is captured; status and headers are kept.
pub fn capture_response(response: Response, on_complete: OnComplete) -> Response {
    let (parts, body) = response.into_parts();
    let expected_len = content_length(&parts.headers);
    let capture =
        CaptureBody::new(body.into_data_stream(), on_complete).with_expected_len(expected_len);
    Response::from_parts(parts, Body::from_stream(capture))
}
