//! Span attribute names for workflow operations.
//!
//! Every CLI command runs inside a `flowgate` span; the fields below are
//! declared empty on it and filled in with [`record_request`] once the
//! request is known, so exported traces can be grouped by request.

use std::fmt::Display;

use tracing::Span;

/// Request UUID.
pub const REQUEST_ID: &str = "flowgate.request.id";

/// Service key of the workflow the request runs.
pub const SERVICE_KEY: &str = "flowgate.service.key";

/// User the action is performed as.
pub const ACTOR: &str = "flowgate.actor";

/// Span wrapping one CLI command.
pub fn command_span(command: &'static str) -> Span {
    tracing::info_span!(
        "flowgate",
        command,
        flowgate.request.id = tracing::field::Empty,
        flowgate.service.key = tracing::field::Empty,
        flowgate.actor = tracing::field::Empty,
    )
}

/// Record which request, service, and actor `span` concerns.
pub fn record_request(span: &Span, request_id: &impl Display, service_key: &str, actor: &str) {
    span.record(REQUEST_ID, tracing::field::display(request_id));
    span.record(SERVICE_KEY, service_key);
    span.record(ACTOR, actor);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_names_are_namespaced() {
        for name in [REQUEST_ID, SERVICE_KEY, ACTOR] {
            assert!(name.starts_with("flowgate."), "{name}");
        }
    }

    #[test]
    fn test_recording_without_subscriber_is_harmless() {
        let span = command_span("request start");
        record_request(&span, &"0190-abc", "purchase-order", "alice");
    }
}
