//! Reusable tracing setup for dash-middleware: stderr logging, optional OTLP
//! export, and span macros for the interception pipeline.

pub mod config;
pub mod otlp;
pub mod spans;

pub use config::{LogFormat, OtlpProtocol, TracingConfig};
pub use otlp::{init_tracing, TracingGuard};
