//! Engine event bus.
//!
//! Pub/sub over a Tokio broadcast channel. The orchestrator publishes a
//! `state_changed` event on every loop transition and a `phase_complete`
//! event after each phase; subsystems publish task, approval, and budget
//! events. Publishing with no subscribers is not an error.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::budget::BudgetLevel;
use crate::model::TaskState;
use crate::state_machine::{LoopState, Phase};
use crate::tier::AutonomyTier;

/// Broadcast channel capacity.
const CHANNEL_CAPACITY: usize = 256;

/// Shared reference to the event bus.
pub type SharedEventBus = Arc<EventBus>;

/// Events broadcast by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// The engine loop moved between states.
    StateChanged {
        from: LoopState,
        to: LoopState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        phase: Option<Phase>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cycle_id: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A phase finished (successfully or not).
    PhaseComplete {
        phase: Phase,
        cycle_id: String,
        cycle_number: u64,
        success: bool,
        cost_usd: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A task changed state.
    TaskUpdate {
        task_id: String,
        state: TaskState,
        timestamp: DateTime<Utc>,
    },

    /// A T2 task is parked and waiting for a human decision.
    ApprovalRequired {
        task_id: String,
        title: String,
        tier: AutonomyTier,
        timestamp: DateTime<Utc>,
    },

    /// Spend is approaching a cap.
    CostAlert {
        message: String,
        total_usd: f64,
        timestamp: DateTime<Utc>,
    },

    /// A budget cap blocked a call.
    BudgetExceeded {
        level: BudgetLevel,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl EngineEvent {
    /// Stable event-type name, matching the serde tag.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "state_changed",
            Self::PhaseComplete { .. } => "phase_complete",
            Self::TaskUpdate { .. } => "task_update",
            Self::ApprovalRequired { .. } => "approval_required",
            Self::CostAlert { .. } => "cost_alert",
            Self::BudgetExceeded { .. } => "budget_exceeded",
        }
    }
}

/// Event bus over a broadcast channel.
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish to all subscribers. A bus with no subscribers drops the
    /// event; delivery is best-effort.
    pub fn publish(&self, event: EngineEvent) {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(receivers) => debug!(event_type, receivers, "event published"),
            Err(_) => debug!(event_type, "event published (no receivers)"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
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
    async fn publish_reaches_all_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(EngineEvent::TaskUpdate {
            task_id: "t1".into(),
            state: TaskState::Reviewing,
            timestamp: Utc::now(),
        });

        assert_eq!(rx1.recv().await.unwrap().event_type(), "task_update");
        assert_eq!(rx2.recv().await.unwrap().event_type(), "task_update");
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(EngineEvent::CostAlert {
            message: "daily spend at 80%".into(),
            total_usd: 8.0,
            timestamp: Utc::now(),
        });
    }

    #[tokio::test]
    async fn events_arrive_in_publish_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(EngineEvent::StateChanged {
            from: LoopState::Idle,
            to: LoopState::Scanning,
            phase: Some(Phase::Scan),
            cycle_id: Some("c1".into()),
            timestamp: Utc::now(),
        });
        bus.publish(EngineEvent::PhaseComplete {
            phase: Phase::Scan,
            cycle_id: "c1".into(),
            cycle_number: 1,
            success: true,
            cost_usd: 0.0,
            error: None,
            timestamp: Utc::now(),
        });

        assert_eq!(rx.recv().await.unwrap().event_type(), "state_changed");
        assert_eq!(rx.recv().await.unwrap().event_type(), "phase_complete");
    }

    #[test]
    fn event_serde_tag_matches_event_type() {
        let event = EngineEvent::BudgetExceeded {
            level: BudgetLevel::Daily,
            reason: "cap".into(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "budget_exceeded");
        assert_eq!(json["level"], "daily");
    }
}
