//! Transport-agnostic control surface.
//!
//! One dispatch entry point maps method names to engine operations, so any
//! frontend (CLI, HTTP, IPC) can drive the engine by sending
//! `(method, params)` pairs and rendering the JSON result. Boundary errors
//! are typed: configuration and validation problems are rejected without
//! state change; precondition failures surface the engine's message.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use flywheel_core::{EngineConfig, Objective, ObjectiveStatus, StateStore as _, StoreError};

use crate::approval::{ApprovalError, ApprovalQueue};
use crate::orchestrator::Orchestrator;

/// Error type for control operations.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<ApprovalError> for ControlError {
    fn from(e: ApprovalError) -> Self {
        match e {
            ApprovalError::NotEligible(msg) => Self::Precondition(format!(
                "task {msg} not found or not awaiting approval"
            )),
            ApprovalError::Store(e) => Self::Store(e),
        }
    }
}

fn params<T: for<'de> Deserialize<'de>>(value: Value) -> Result<T, ControlError> {
    serde_json::from_value(value).map_err(|e| ControlError::Validation(e.to_string()))
}

#[derive(Deserialize)]
struct CreateObjectiveParams {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    weight: Option<f64>,
    #[serde(default)]
    acceptance_criteria: Vec<String>,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Deserialize)]
struct UpdateObjectiveParams {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    weight: Option<f64>,
    #[serde(default)]
    status: Option<ObjectiveStatus>,
    #[serde(default)]
    acceptance_criteria: Option<Vec<String>>,
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct IdParams {
    id: String,
}

#[derive(Deserialize)]
struct TriggerParams {
    #[serde(default)]
    preset: Option<String>,
}

#[derive(Deserialize)]
struct ApproveParams {
    task_id: String,
}

#[derive(Deserialize)]
struct RejectParams {
    task_id: String,
    #[serde(default)]
    reason: Option<String>,
}

/// Maximum objective title length.
const MAX_TITLE_LEN: usize = 200;
/// Maximum objective description length.
const MAX_DESCRIPTION_LEN: usize = 2000;

/// Dispatching facade over the orchestrator, store, ledger, and approval
/// queue.
pub struct ControlSurface {
    orchestrator: Arc<Orchestrator>,
    approvals: ApprovalQueue,
}

impl ControlSurface {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        let approvals = ApprovalQueue::new(
            Arc::clone(orchestrator.store()),
            Arc::clone(orchestrator.events()),
        );
        Self {
            orchestrator,
            approvals,
        }
    }

    /// Dispatch a control method. Unknown methods are a validation error.
    pub async fn dispatch(&self, method: &str, params_value: Value) -> Result<Value, ControlError> {
        match method {
            "state" => Ok(serde_json::to_value(self.orchestrator.snapshot())
                .map_err(|e| ControlError::Validation(e.to_string()))?),

            "objectives.list" => {
                let objectives = self.orchestrator.store().load_objectives()?;
                Ok(json!({ "objectives": objectives }))
            }
            "objectives.create" => self.objectives_create(params(params_value)?),
            "objectives.update" => self.objectives_update(params(params_value)?),
            "objectives.delete" => self.objectives_delete(params(params_value)?),

            "tasks.list" => {
                let tasks = self.orchestrator.store().load_tasks()?;
                Ok(json!({ "tasks": tasks }))
            }
            "tasks.detail" => self.tasks_detail(params(params_value)?),

            "scans.list" => Ok(json!({ "scans": self.orchestrator.store().list_scans()? })),
            "plans.list" => Ok(json!({ "plans": self.orchestrator.store().list_plans()? })),
            "runs.list" => Ok(json!({ "runs": self.orchestrator.store().list_runs()? })),
            "evals.list" => Ok(json!({
                "evaluations": self.orchestrator.store().list_evaluations()?
            })),
            "decisions.list" => Ok(json!({
                "decisions": self.orchestrator.store().list_decisions()?
            })),
            "experiments.list" => Ok(json!({
                "experiments": self.orchestrator.store().list_experiments()?
            })),

            "cost.summary" => Ok(self.cost_summary()),
            "budget.status" => Ok(self.budget_status()),

            "pause" => {
                self.orchestrator.pause();
                Ok(json!({ "state": self.orchestrator.current_state() }))
            }
            "resume" => {
                self.orchestrator.resume();
                Ok(json!({ "state": self.orchestrator.current_state() }))
            }
            "trigger" => {
                let TriggerParams { preset } = params(params_value)?;
                let cycle_id = self
                    .orchestrator
                    .trigger(preset.as_deref())
                    .await
                    .map_err(|e| ControlError::Precondition(e.to_string()))?;
                Ok(json!({ "cycle_id": cycle_id }))
            }

            "approve" => {
                let ApproveParams { task_id } = params(params_value)?;
                let task = self.approvals.approve(&task_id)?;
                Ok(json!({ "task": task }))
            }
            "reject" => {
                let RejectParams { task_id, reason } = params(params_value)?;
                let task = self.approvals.reject(&task_id, reason.as_deref())?;
                Ok(json!({ "task": task }))
            }

            "config.get" => Ok(json!({ "config": self.orchestrator.config() })),
            "config.set" => {
                let config: EngineConfig = params(params_value)
                    .map_err(|e| ControlError::Configuration(e.to_string()))?;
                self.orchestrator
                    .set_config(config)
                    .map_err(|e| ControlError::Configuration(e.to_string()))?;
                Ok(json!({ "config": self.orchestrator.config() }))
            }

            other => Err(ControlError::Validation(format!("unknown method {other:?}"))),
        }
    }

    fn objectives_create(&self, p: CreateObjectiveParams) -> Result<Value, ControlError> {
        let title = p.title.trim().to_string();
        if title.is_empty() {
            return Err(ControlError::Validation("title must not be empty".into()));
        }
        if title.len() > MAX_TITLE_LEN {
            return Err(ControlError::Validation(format!(
                "title longer than {MAX_TITLE_LEN} characters"
            )));
        }
        if p.description.len() > MAX_DESCRIPTION_LEN {
            return Err(ControlError::Validation(format!(
                "description longer than {MAX_DESCRIPTION_LEN} characters"
            )));
        }

        let mut objective = Objective::new(title, p.description);
        if let Some(weight) = p.weight {
            objective.set_weight(weight);
        }
        objective.acceptance_criteria = p.acceptance_criteria;
        objective.tags = p.tags;
        self.orchestrator.store().upsert_objective(&objective)?;
        Ok(json!({ "objective": objective }))
    }

    fn objectives_update(&self, p: UpdateObjectiveParams) -> Result<Value, ControlError> {
        let mut objective = self
            .orchestrator
            .store()
            .get_objective(&p.id)?
            .ok_or_else(|| ControlError::NotFound(format!("objective {}", p.id)))?;

        if let Some(title) = p.title {
            let title = title.trim().to_string();
            if title.is_empty() || title.len() > MAX_TITLE_LEN {
                return Err(ControlError::Validation(
                    "title must be 1-200 characters".into(),
                ));
            }
            objective.title = title;
        }
        if let Some(description) = p.description {
            if description.len() > MAX_DESCRIPTION_LEN {
                return Err(ControlError::Validation(format!(
                    "description longer than {MAX_DESCRIPTION_LEN} characters"
                )));
            }
            objective.description = description;
        }
        if let Some(weight) = p.weight {
            objective.set_weight(weight);
        }
        if let Some(status) = p.status {
            objective.status = status;
        }
        if let Some(criteria) = p.acceptance_criteria {
            objective.acceptance_criteria = criteria;
        }
        if let Some(tags) = p.tags {
            objective.tags = tags;
        }
        objective.touch();
        self.orchestrator.store().upsert_objective(&objective)?;
        Ok(json!({ "objective": objective }))
    }

    fn objectives_delete(&self, p: IdParams) -> Result<Value, ControlError> {
        let mut objectives = self.orchestrator.store().load_objectives()?;
        let before = objectives.len();
        objectives.retain(|o| o.id != p.id);
        if objectives.len() == before {
            return Err(ControlError::NotFound(format!("objective {}", p.id)));
        }
        self.orchestrator.store().save_objectives(&objectives)?;
        Ok(json!({ "deleted": p.id }))
    }

    fn tasks_detail(&self, p: IdParams) -> Result<Value, ControlError> {
        let task = self
            .orchestrator
            .store()
            .get_task(&p.id)?
            .ok_or_else(|| ControlError::NotFound(format!("task {}", p.id)))?;
        let runs: Vec<_> = self
            .orchestrator
            .store()
            .list_runs()?
            .into_iter()
            .filter(|r| r.task_id.as_deref() == Some(p.id.as_str()))
            .collect();
        Ok(json!({ "task": task, "runs": runs }))
    }

    fn cost_summary(&self) -> Value {
        let records = self.orchestrator.ledger().records();
        let mut by_provider: HashMap<String, f64> = HashMap::new();
        let mut by_phase: HashMap<String, f64> = HashMap::new();
        for record in &records {
            *by_provider.entry(record.provider.clone()).or_default() += record.cost_usd;
            *by_phase.entry(record.phase.to_string()).or_default() += record.cost_usd;
        }
        json!({
            "total": self.orchestrator.ledger().total(),
            "by_provider": by_provider,
            "by_phase": by_phase,
            "run_count": records.len(),
        })
    }

    fn budget_status(&self) -> Value {
        let ledger = self.orchestrator.ledger();
        json!({
            "budget": {
                "total_usd": ledger.total(),
                "daily_usd": ledger.daily_cost(),
                "weekly_usd": ledger.weekly_cost(),
                "as_of": Utc::now(),
            },
            "caps": self.orchestrator.guard().config(),
        })
    }
}
