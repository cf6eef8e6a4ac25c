//! Human-approval queue.
//!
//! A thin projection over the task collection: the set of tasks parked in
//! `awaiting_approval`, plus the only two legal ways out — approve (back to
//! `building`) and reject (to `failed`). Every human decision is recorded in
//! the append-only decision log.

use chrono::Utc;
use tracing::info;

use flywheel_core::{
    DecisionLogEntry, EngineEvent, SharedEventBus, SharedStore, StateStore as _, StoreError, Task,
    TaskState,
};

/// Error type for approval operations.
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    /// The task does not exist or is not awaiting approval.
    #[error("task {0} not found or not awaiting approval")]
    NotEligible(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The actor recorded for control-surface decisions.
const OPERATOR: &str = "operator";

/// Queue of tasks awaiting a human decision.
pub struct ApprovalQueue {
    store: SharedStore,
    events: SharedEventBus,
}

impl ApprovalQueue {
    pub fn new(store: SharedStore, events: SharedEventBus) -> Self {
        Self { store, events }
    }

    /// Tasks currently awaiting approval.
    pub fn pending(&self) -> Result<Vec<Task>, ApprovalError> {
        Ok(self
            .store
            .load_tasks()?
            .into_iter()
            .filter(|t| t.state == TaskState::AwaitingApproval)
            .collect())
    }

    fn take_eligible(&self, task_id: &str) -> Result<Task, ApprovalError> {
        match self.store.get_task(task_id)? {
            Some(task) if task.state == TaskState::AwaitingApproval => Ok(task),
            _ => Err(ApprovalError::NotEligible(task_id.to_string())),
        }
    }

    fn log_decision(
        &self,
        task: &Task,
        decision: &str,
        rationale: Option<&str>,
    ) -> Result<(), ApprovalError> {
        let mut entry = DecisionLogEntry::new(OPERATOR, decision);
        entry.cycle_id = Some(task.cycle_id.clone());
        entry.task_id = Some(task.id.clone());
        entry.rationale = rationale.map(String::from);
        self.store.append_decision(&entry)?;
        Ok(())
    }

    /// Approve: `awaiting_approval → building`.
    pub fn approve(&self, task_id: &str) -> Result<Task, ApprovalError> {
        let mut task = self.take_eligible(task_id)?;
        task.state = TaskState::Building;
        task.touch();
        self.store.upsert_task(&task)?;
        self.log_decision(&task, "approve", None)?;

        info!(task_id, title = %task.title, "task approved for building");
        self.events.publish(EngineEvent::TaskUpdate {
            task_id: task.id.clone(),
            state: task.state,
            timestamp: Utc::now(),
        });
        Ok(task)
    }

    /// Reject: `awaiting_approval → failed`, recording the reason as the
    /// task error.
    pub fn reject(&self, task_id: &str, reason: Option<&str>) -> Result<Task, ApprovalError> {
        let mut task = self.take_eligible(task_id)?;
        let reason_text = reason.unwrap_or("rejected by operator");
        task.fail(reason_text);
        self.store.upsert_task(&task)?;
        self.log_decision(&task, "reject", Some(reason_text))?;

        info!(task_id, title = %task.title, reason = reason_text, "task rejected");
        self.events.publish(EngineEvent::TaskUpdate {
            task_id: task.id.clone(),
            state: task.state,
            timestamp: Utc::now(),
        });
        Ok(task)
    }
}
