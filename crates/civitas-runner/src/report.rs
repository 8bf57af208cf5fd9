//! Turns committed events into log lines.

use tracing::{debug, info, warn};

use civitas_entities::{action_line, degraded_line};
use civitas_types::{Event, EventPayload};

/// One-line human description of an event.
pub fn describe(event: &Event) -> String {
    match event.payload {
        EventPayload::EntityCreated { subtype } => format!("{subtype} created"),
        EventPayload::EntityStateChanged { from, to } => format!("state {from:?} -> {to:?}"),
        EventPayload::EntityDestroyed { subtype } => format!("{subtype} destroyed"),
        EventPayload::ActionPerformed { subtype } => action_line(subtype).to_owned(),
        EventPayload::ActionDegraded { subtype, .. } => degraded_line(subtype),
        EventPayload::ResourceShortage {
            resource,
            denied_requests,
            units_denied,
        } => format!(
            "{resource} shortage: {denied_requests} requests denied ({units_denied} units)"
        ),
        EventPayload::ReleaseUnderflow {
            resource,
            requested,
            released,
        } => format!("{resource} release clamped: asked {requested}, released {released}"),
        EventPayload::TickCompleted {
            performed,
            degraded,
        } => format!("tick complete: {performed} performed, {degraded} degraded"),
    }
}

/// Log an event at a level matching its weight.
pub fn log_event(event: &Event) {
    let line = describe(event);
    let source = event.source.map(|id| id.to_string()).unwrap_or_default();
    match event.payload {
        EventPayload::ActionPerformed { .. } | EventPayload::ActionDegraded { .. } => {
            debug!(sequence = event.sequence, tick = event.tick, source = %source, "{line}");
        }
        EventPayload::ResourceShortage { .. } | EventPayload::ReleaseUnderflow { .. } => {
            warn!(sequence = event.sequence, tick = event.tick, "{line}");
        }
        EventPayload::EntityCreated { .. }
        | EventPayload::EntityStateChanged { .. }
        | EventPayload::EntityDestroyed { .. }
        | EventPayload::TickCompleted { .. } => {
            info!(sequence = event.sequence, tick = event.tick, source = %source, "{line}");
        }
    }
}
