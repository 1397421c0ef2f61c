//! Event sink port.
//!
//! Events are always appended to the telemetry store; a sink additionally
//! forwards them to the out-of-core notification pipeline. Publish failures
//! are logged and dropped without retry.

use uplink_common::models::Event;

use crate::store::TelemetryStore;

#[derive(Debug, thiserror::Error)]
#[error("event sink rejected {kind}: {reason}")]
pub struct SinkError {
    pub kind: &'static str,
    pub reason: String,
}

/// Port to the external notification collaborator.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &Event) -> Result<(), SinkError>;
}

/// Default sink: events are only logged.
pub struct LogSink;

impl EventSink for LogSink {
    fn publish(&self, event: &Event) -> Result<(), SinkError> {
        tracing::debug!(
            kind = event.kind.as_str(),
            member = event.member.as_deref().unwrap_or("-"),
            detail = %event.detail,
            "event"
        );
        Ok(())
    }
}

/// Record an event in the store and forward it to the sink.
pub fn emit(store: &TelemetryStore, sink: &dyn EventSink, event: Event) {
    if let Err(e) = sink.publish(&event) {
        tracing::warn!(kind = event.kind.as_str(), "event sink publish failed, dropping: {e}");
    }
    store.record_event(event);
}
