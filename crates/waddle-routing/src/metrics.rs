//! Routing metrics for observability.
//!
//! Uses the global OpenTelemetry meter provider which must be initialized
//! by the host application (waddle-server). Without one, recording is a no-op.

use opentelemetry::metrics::{Counter, Meter};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

use crate::types::{HandlerKind, LookupOutcome};

static METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    METER.get_or_init(|| opentelemetry::global::meter("waddle-routing"))
}

/// Counter for route lookups.
pub fn lookups() -> Counter<u64> {
    meter()
        .u64_counter("routing.lookups")
        .with_description("Total routing table lookups")
        .with_unit("lookup")
        .build()
}

/// Counter for routes added.
pub fn routes_added() -> Counter<u64> {
    meter()
        .u64_counter("routing.routes.added")
        .with_description("Total routes added to the routing table")
        .with_unit("route")
        .build()
}

/// Counter for routes removed.
pub fn routes_removed() -> Counter<u64> {
    meter()
        .u64_counter("routing.routes.removed")
        .with_description("Total routes removed from the routing table")
        .with_unit("route")
        .build()
}

/// Counter for stanzas queued on the pending-remote placeholder.
pub fn pending_queued() -> Counter<u64> {
    meter()
        .u64_counter("routing.pending.queued")
        .with_description("Stanzas queued while a remote connection is pending")
        .with_unit("stanza")
        .build()
}

/// Record the outcome of a lookup.
pub fn record_lookup(operation: &'static str, outcome: LookupOutcome) {
    lookups().add(
        1,
        &[
            KeyValue::new("operation", operation),
            KeyValue::new("outcome", outcome.as_str()),
        ],
    );
}

/// Record a route being added.
pub fn record_route_added(kind: HandlerKind) {
    routes_added().add(1, &[KeyValue::new("kind", kind.as_str())]);
}

/// Record a route being removed.
pub fn record_route_removed(kind: HandlerKind) {
    routes_removed().add(1, &[KeyValue::new("kind", kind.as_str())]);
}

/// Record a stanza queued for a pending remote domain.
pub fn record_pending_queued(accepted: bool) {
    pending_queued().add(
        1,
        &[KeyValue::new(
            "result",
            if accepted { "queued" } else { "dropped" },
        )],
    );
}
