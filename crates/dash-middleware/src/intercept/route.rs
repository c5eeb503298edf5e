//! Which requests the pipeline acts on.

use super::referer::RefererMetadata;

/// Route Dash uses to fetch the initial page layout.
pub const LAYOUT_SUFFIX: &str = "/_dash-layout";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    /// Passed to the Dash app untouched.
    NotRecorded,
    /// Cache-probed and tracked.
    Recorded,
    /// Answered by the layout service.
    LayoutFetch,
}

impl RouteDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteDecision::NotRecorded => "not_recorded",
            RouteDecision::Recorded => "recorded",
            RouteDecision::LayoutFetch => "layout_fetch",
        }
    }
}

/// Classifies request URLs against the configured recorded suffixes.
#[derive(Debug, Clone)]
pub struct RouteClassifier {
    recorded_suffixes: Vec<String>,
}

impl RouteClassifier {
    pub fn new(recorded_suffixes: Vec<String>) -> Self {
        Self { recorded_suffixes }
    }

    /// A layout request only short-circuits when the page was opened with a
    /// named layout; otherwise it is classified like any other URL.
    pub fn classify(&self, url: &str, referer: &RefererMetadata) -> RouteDecision {
        if !referer.layout.is_empty() && url.ends_with(LAYOUT_SUFFIX) {
            return RouteDecision::LayoutFetch;
        }
        if self
            .recorded_suffixes
            .iter()
            .any(|suffix| url.ends_with(suffix.as_str()))
        {
            RouteDecision::Recorded
        } else {
            RouteDecision::NotRecorded
        }
    }
}
