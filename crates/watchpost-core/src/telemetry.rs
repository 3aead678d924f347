//! Injected telemetry sink.
//!
//! Components receive a sink at construction instead of reaching for a global
//! logger object, so tests can swap in [`RecordingTelemetry`].

use std::sync::{Arc, Mutex};

use crate::fault::FaultClass;

/// Structured events emitted by the resilience layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryEvent {
    OperationQueued {
        operation_id: String,
        kind: &'static str,
    },
    OperationReplayed {
        operation_id: String,
        attempts: u32,
    },
    ReplayRetryScheduled {
        operation_id: String,
        retry_count: u32,
        delay_ms: u64,
        status: Option<u16>,
    },
    OperationFailed {
        operation_id: String,
        retry_count: u32,
        reason: String,
    },
    PersistenceFault {
        message: String,
    },
    MergeConflict {
        entity_id: String,
        fields: Vec<&'static str>,
    },
    MediaFault {
        feed_id: String,
        class: FaultClass,
        status: Option<u16>,
    },
    MediaReconnectScheduled {
        feed_id: String,
        attempt: u32,
        delay_ms: u64,
    },
    MediaRecovered {
        feed_id: String,
    },
    MediaExhausted {
        feed_id: String,
        attempts: u32,
    },
}

pub trait TelemetrySink: Send + Sync + 'static {
    fn record(&self, event: TelemetryEvent);
}

impl<T: TelemetrySink + ?Sized> TelemetrySink for Arc<T> {
    fn record(&self, event: TelemetryEvent) {
        (**self).record(event);
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn record(&self, _event: TelemetryEvent) {}
}

/// Forwards events to `tracing` with structured fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn record(&self, event: TelemetryEvent) {
        match event {
            TelemetryEvent::OperationQueued { operation_id, kind } => {
                tracing::info!(%operation_id, kind, "operation queued for replay");
            }
            TelemetryEvent::OperationReplayed {
                operation_id,
                attempts,
            } => {
                tracing::info!(%operation_id, attempts, "queued operation replayed");
            }
            TelemetryEvent::ReplayRetryScheduled {
                operation_id,
                retry_count,
                delay_ms,
                status,
            } => {
                tracing::debug!(
                    %operation_id,
                    retry_count,
                    delay_ms,
                    ?status,
                    "replay failed, will retry"
                );
            }
            TelemetryEvent::OperationFailed {
                operation_id,
                retry_count,
                reason,
            } => {
                tracing::warn!(%operation_id, retry_count, %reason, "queued operation failed");
            }
            TelemetryEvent::PersistenceFault { message } => {
                tracing::warn!(%message, "durable store write failed");
            }
            TelemetryEvent::MergeConflict { entity_id, fields } => {
                tracing::debug!(%entity_id, ?fields, "stale update rejected");
            }
            TelemetryEvent::MediaFault {
                feed_id,
                class,
                status,
            } => {
                tracing::debug!(%feed_id, ?class, ?status, "media fault");
            }
            TelemetryEvent::MediaReconnectScheduled {
                feed_id,
                attempt,
                delay_ms,
            } => {
                tracing::info!(%feed_id, attempt, delay_ms, "media reconnect scheduled");
            }
            TelemetryEvent::MediaRecovered { feed_id } => {
                tracing::info!(%feed_id, "media playback recovered");
            }
            TelemetryEvent::MediaExhausted { feed_id, attempts } => {
                tracing::warn!(%feed_id, attempts, "media reconnect attempts exhausted");
            }
        }
    }
}

/// Keeps every event in memory, in order.
#[derive(Debug, Clone, Default)]
pub struct RecordingTelemetry {
    events: Arc<Mutex<Vec<TelemetryEvent>>>,
}

impl RecordingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn record(&self, event: TelemetryEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_keeps_order() {
        let sink = RecordingTelemetry::new();
        let shared: Arc<dyn TelemetrySink> = Arc::new(sink.clone());
        shared.record(TelemetryEvent::MediaRecovered {
            feed_id: "cam-1".to_string(),
        });
        shared.record(TelemetryEvent::PersistenceFault {
            message: "disk full".to_string(),
        });

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], TelemetryEvent::MediaRecovered { .. }));
    }
}
