//! In-process event bus.
//!
//! Cross-component hooks (plan progress, consensus outcomes, episode
//! persistence) are published here over a Tokio broadcast channel. Delivery
//! is best-effort at-most-once per subscriber: a lagging receiver loses the
//! oldest events, which the receiver observes as a `Lagged` error and the
//! publisher never blocks on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use backends::Health;

use crate::consensus::DecisionStatus;
use crate::planning::StepStatus;

/// Bounded per-subscriber queue length
const CHANNEL_CAPACITY: usize = 256;

/// Events emitted by the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    EpisodeRecorded {
        session_id: String,
        episode_id: String,
        strategy: String,
        quality: f64,
        timestamp: DateTime<Utc>,
    },
    RequestRejected {
        session_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    DecisionClosed {
        decision_id: String,
        status: DecisionStatus,
        rationale: String,
        timestamp: DateTime<Utc>,
    },
    PlanStepTerminal {
        plan_id: String,
        step_id: String,
        status: StepStatus,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },
    GoalCancelled {
        goal_id: String,
        cascade_count: usize,
        timestamp: DateTime<Utc>,
    },
    BackendHealthChanged {
        backend: String,
        health: Health,
        timestamp: DateTime<Utc>,
    },
}

impl OrchestratorEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::EpisodeRecorded { .. } => "episode_recorded",
            Self::RequestRejected { .. } => "request_rejected",
            Self::DecisionClosed { .. } => "decision_closed",
            Self::PlanStepTerminal { .. } => "plan_step_terminal",
            Self::GoalCancelled { .. } => "goal_cancelled",
            Self::BackendHealthChanged { .. } => "backend_health_changed",
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::EpisodeRecorded { timestamp, .. }
            | Self::RequestRejected { timestamp, .. }
            | Self::DecisionClosed { timestamp, .. }
            | Self::PlanStepTerminal { timestamp, .. }
            | Self::GoalCancelled { timestamp, .. }
            | Self::BackendHealthChanged { timestamp, .. } => *timestamp,
        }
    }
}

/// Shared handle to the bus
pub type SharedEventBus = Arc<EventBus>;

/// Broadcast-backed pub/sub bus
pub struct EventBus {
    sender: broadcast::Sender<OrchestratorEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish to all current subscribers. Never blocks; with no subscribers
    /// the event is dropped.
    pub fn publish(&self, event: OrchestratorEvent) {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(receivers) => debug!(event_type, receivers, "event published"),
            Err(_) => debug!(event_type, "event published (no subscribers)"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(OrchestratorEvent::EpisodeRecorded {
            session_id: "s-1".into(),
            episode_id: "e-1".into(),
            strategy: "simple".into(),
            quality: 0.8,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "episode_recorded");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.publish(OrchestratorEvent::RequestRejected {
            session_id: "s-1".into(),
            reason: "timeout".into(),
            timestamp: Utc::now(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_drops_oldest() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        for i in 0..(CHANNEL_CAPACITY + 10) {
            bus.publish(OrchestratorEvent::RequestRejected {
                session_id: format!("s-{i}"),
                reason: "overflow".into(),
                timestamp: Utc::now(),
            });
        }

        // First recv reports the lag rather than blocking the publisher.
        let first = rx.recv().await;
        assert!(matches!(first, Err(broadcast::error::RecvError::Lagged(_))));
    }
}
