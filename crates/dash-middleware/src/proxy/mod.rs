//! Plumbing around the pipeline: forwarding to the Dash app, response body
//! capture, and correlation IDs.

pub mod capture;
pub mod correlation;
pub mod upstream;
