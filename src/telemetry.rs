//! Append-only telemetry sink for pipeline observability.
//!
//! Every pipeline transition, policy decision, and security verdict is
//! recorded here. Recording is fire-and-forget over a bounded channel:
//! `record` never blocks and never fails the pipeline. When the buffer is
//! full the event is dropped and counted, which is the correct trade for an
//! observability path.

use crate::compaction::CompactionStrategy;
use crate::pipeline::Stage;
use crate::policy::ToolProfile;
use crate::security::ViolationKind;
use crate::skills::IneligibleReason;
use crate::{CorrelationId, GatewayKind, MessageId};

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// One telemetry record. Raw message content never appears here beyond what
/// the pipeline explicitly whitelists (violation categories, counts, ids).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelemetryEvent {
    StageReached {
        correlation_id: CorrelationId,
        channel_id: String,
        stage: Stage,
    },
    SecurityRejected {
        correlation_id: CorrelationId,
        kind: ViolationKind,
    },
    ToolsResolved {
        correlation_id: CorrelationId,
        profile: ToolProfile,
        elevated: bool,
        tool_count: usize,
    },
    SkillsMatched {
        correlation_id: CorrelationId,
        skill_count: usize,
    },
    SkillIneligible {
        skill_id: String,
        reason: IneligibleReason,
    },
    CompactionApplied {
        correlation_id: CorrelationId,
        strategy: CompactionStrategy,
        tokens_before: usize,
        tokens_after: usize,
        turns_dropped: usize,
        degraded: bool,
    },
    RetryScheduled {
        message_id: MessageId,
        attempt: u32,
        delay_ms: u64,
    },
    DeadLettered {
        message_id: MessageId,
        attempts: u32,
        error: String,
    },
    ResponseSent {
        correlation_id: CorrelationId,
        gateway: GatewayKind,
        delivered: bool,
    },
}

/// Cloneable handle for recording telemetry events.
#[derive(Clone)]
pub struct TelemetrySink {
    tx: Option<mpsc::Sender<TelemetryEvent>>,
    dropped: Arc<AtomicU64>,
}

impl TelemetrySink {
    /// Create a sink with a background drain task that logs every event as a
    /// structured tracing record. Must be called inside a tokio runtime.
    pub fn spawn(buffer: usize) -> Self {
        let (tx, mut rx) = mpsc::channel(buffer);

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match serde_json::to_string(&event) {
                    Ok(json) => tracing::debug!(target: "switchboard::telemetry", %json, "event"),
                    Err(error) => tracing::warn!(%error, "failed to encode telemetry event"),
                }
            }
        });

        Self {
            tx: Some(tx),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A sink that discards everything. Used by unit tests and tools that
    /// run without a drain task.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Record an event. Never blocks; drops the event if the buffer is full.
    pub fn record(&self, event: TelemetryEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if tx.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of events dropped due to a full buffer.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_sink_accepts_events() {
        let sink = TelemetrySink::disabled();
        sink.record(TelemetryEvent::SkillsMatched {
            correlation_id: uuid::Uuid::new_v4(),
            skill_count: 2,
        });
        assert_eq!(sink.dropped_events(), 0);
    }

    #[tokio::test]
    async fn full_buffer_drops_instead_of_blocking() {
        // Channel of size 1 with no drain: second record must not block.
        let (tx, _rx) = mpsc::channel(1);
        let sink = TelemetrySink {
            tx: Some(tx),
            dropped: Arc::new(AtomicU64::new(0)),
        };

        for _ in 0..3 {
            sink.record(TelemetryEvent::SkillsMatched {
                correlation_id: uuid::Uuid::new_v4(),
                skill_count: 0,
            });
        }
        assert_eq!(sink.dropped_events(), 2);
    }
}
