//! Event types for the spotforge pipeline
//!
//! Progress reporting is a typed event on a single broadcast channel;
//! consumers (CLI status, logger, metrics) subscribe independently.
//! Emission is lossy fire-and-forget: a worker never blocks on a slow
//! subscriber.

use crate::status::ProductionStatus;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Pipeline event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// A production moved forward or reported intra-stage progress
    ProductionProgress {
        production_id: Uuid,
        stage: ProductionStatus,
        /// Overall progress 0..=100
        percent: u8,
        /// Optional human-readable note (soft errors, fallback decisions)
        note: Option<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A production reached COMPLETED
    ProductionCompleted {
        production_id: Uuid,
        output_path: String,
        duration_seconds: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A production reached FAILED
    ProductionFailed {
        production_id: Uuid,
        kind: String,
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A queue job finished successfully
    JobCompleted {
        queue: String,
        job_id: Uuid,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A queue job failed (terminally or pending retry)
    JobFailed {
        queue: String,
        job_id: Uuid,
        error: String,
        will_retry: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A running job reported progress
    JobProgress {
        queue: String,
        job_id: Uuid,
        percent: u8,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// Broadcast bus for pipeline events
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event; returns the subscriber count.
    pub fn emit(&self, event: PipelineEvent) -> Result<usize, broadcast::error::SendError<PipelineEvent>> {
        self.tx.send(event)
    }

    /// Emit without caring whether anyone is listening.
    pub fn emit_lossy(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_subscribers() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let id = Uuid::new_v4();
        bus.emit_lossy(PipelineEvent::ProductionProgress {
            production_id: id,
            stage: ProductionStatus::Script,
            percent: 20,
            note: None,
            timestamp: chrono::Utc::now(),
        });
        match rx.recv().await.unwrap() {
            PipelineEvent::ProductionProgress {
                production_id,
                percent,
                ..
            } => {
                assert_eq!(production_id, id);
                assert_eq!(percent, 20);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn emit_without_subscribers_does_not_panic() {
        let bus = EventBus::new(8);
        bus.emit_lossy(PipelineEvent::JobProgress {
            queue: "tts_generation".into(),
            job_id: Uuid::new_v4(),
            percent: 50,
            timestamp: chrono::Utc::now(),
        });
    }
}
