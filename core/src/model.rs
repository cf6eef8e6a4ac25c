//! Persisted data model for the work-cycle engine.
//!
//! Every entity carries a stable UUID identifier and UTC timestamps.
//! Knowledge-bearing entities (scan findings, tasks, evaluations,
//! experiment log entries) additionally carry a [`TruthLabel`] recording how
//! much trust the engine places in them.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::EngineMode;
use crate::state_machine::{LoopState, Phase};
use crate::tier::AutonomyTier;

/// Entity identifiers are UUID v4 strings.
pub type ObjectiveId = String;
pub type TaskId = String;
pub type CycleId = String;

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// =============================================================================
// Truth labels
// =============================================================================

/// Epistemic status of a knowledge-bearing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruthStatus {
    Verified,
    Hypothesis,
    Speculative,
    Implemented,
    Failed,
    Archived,
}

impl std::fmt::Display for TruthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Verified => write!(f, "verified"),
            Self::Hypothesis => write!(f, "hypothesis"),
            Self::Speculative => write!(f, "speculative"),
            Self::Implemented => write!(f, "implemented"),
            Self::Failed => write!(f, "failed"),
            Self::Archived => write!(f, "archived"),
        }
    }
}

/// Confidence attached to a truth status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// `(status, confidence)` annotation attached to knowledge-bearing entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruthLabel {
    pub status: TruthStatus,
    pub confidence: Confidence,
}

impl TruthLabel {
    pub fn new(status: TruthStatus, confidence: Confidence) -> Self {
        Self { status, confidence }
    }

    /// Label for freshly proposed work: `(hypothesis, medium)`.
    pub fn hypothesis() -> Self {
        Self::new(TruthStatus::Hypothesis, Confidence::Medium)
    }

    /// Label for unvetted model output: `(speculative, low)`.
    pub fn speculative() -> Self {
        Self::new(TruthStatus::Speculative, Confidence::Low)
    }

    /// Label for shipped work: `(implemented, medium)`.
    pub fn implemented() -> Self {
        Self::new(TruthStatus::Implemented, Confidence::Medium)
    }
}

// =============================================================================
// Objectives
// =============================================================================

/// Lifecycle status of an objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveStatus {
    Active,
    Paused,
    Completed,
    Abandoned,
}

/// An operator-declared goal the engine works toward.
///
/// Objectives are created and mutated by the operator through the control
/// surface; the engine itself never deletes one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Objective {
    pub id: ObjectiveId,
    /// 1–200 characters; enforced at the control-surface boundary.
    pub title: String,
    /// Up to 2000 characters.
    pub description: String,
    /// Relative importance, clamped into `[0, 1]` on every write.
    pub weight: f64,
    pub status: ObjectiveStatus,
    pub acceptance_criteria: Vec<String>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Objective {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            title: title.into(),
            description: description.into(),
            weight: 0.5,
            status: ObjectiveStatus::Active,
            acceptance_criteria: Vec::new(),
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the weight, clamped into `[0, 1]`.
    pub fn set_weight(&mut self, weight: f64) {
        self.weight = weight.clamp(0.0, 1.0);
        self.touch();
    }

    pub fn is_active(&self) -> bool {
        self.status == ObjectiveStatus::Active
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

// =============================================================================
// Tasks
// =============================================================================

/// Task lifecycle states.
///
/// The engine drives `building → reviewing → completed/failed` and the
/// approval diversion `awaiting_approval → building/failed`. The remaining
/// states exist for external writers (control UIs, future schedulers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Scanning,
    Planning,
    Building,
    Reviewing,
    AwaitingApproval,
    Approved,
    Rejected,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Rejected
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Scanning => "scanning",
            Self::Planning => "planning",
            Self::Building => "building",
            Self::Reviewing => "reviewing",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Kinds of artifact a build worker may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Branch,
    Pr,
    File,
    Url,
    Log,
}

/// A single artifact produced while executing a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub value: String,
}

impl Artifact {
    pub fn new(kind: ArtifactKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

/// A unit of work created in BUILD from a plan's proposed task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub objective_id: ObjectiveId,
    pub cycle_id: CycleId,
    pub title: String,
    pub description: String,
    pub state: TaskState,
    pub autonomy_tier: AutonomyTier,
    /// Per-task spend ceiling, defaulted from `BudgetConfig.per_task_usd`.
    pub budget_cap_usd: f64,
    /// Monotonically non-decreasing until the task reaches a terminal state.
    pub actual_cost_usd: f64,
    pub artifacts: Vec<Artifact>,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub truth: TruthLabel,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(
        objective_id: impl Into<ObjectiveId>,
        cycle_id: impl Into<CycleId>,
        title: impl Into<String>,
        description: impl Into<String>,
        autonomy_tier: AutonomyTier,
        budget_cap_usd: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            objective_id: objective_id.into(),
            cycle_id: cycle_id.into(),
            title: title.into(),
            description: description.into(),
            state: TaskState::Building,
            autonomy_tier,
            budget_cap_usd,
            actual_cost_usd: 0.0,
            artifacts: Vec::new(),
            retry_count: 0,
            error: None,
            truth: TruthLabel::hypothesis(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Move into `completed`, stamping `completed_at` and promoting the
    /// truth label to `(implemented, medium)`.
    pub fn complete(&mut self) {
        self.state = TaskState::Completed;
        self.completed_at = Some(Utc::now());
        self.truth = TruthLabel::implemented();
        self.touch();
    }

    /// Move into `failed` with the given error message.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.state = TaskState::Failed;
        self.error = Some(error.into());
        self.touch();
    }
}

// =============================================================================
// Cycles
// =============================================================================

/// Lifecycle state of one pass through the five-phase pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Running,
    Completed,
    Failed,
    Paused,
}

/// Start/completion stamps for one phase within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTiming {
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// One optional timing slot per phase.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseTimings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan: Option<PhaseTiming>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<PhaseTiming>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<PhaseTiming>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ship_check: Option<PhaseTiming>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval: Option<PhaseTiming>,
}

impl PhaseTimings {
    pub fn slot(&self, phase: Phase) -> Option<&PhaseTiming> {
        match phase {
            Phase::Scan => self.scan.as_ref(),
            Phase::Plan => self.plan.as_ref(),
            Phase::Build => self.build.as_ref(),
            Phase::ShipCheck => self.ship_check.as_ref(),
            Phase::Eval => self.eval.as_ref(),
        }
    }

    fn slot_mut(&mut self, phase: Phase) -> &mut Option<PhaseTiming> {
        match phase {
            Phase::Scan => &mut self.scan,
            Phase::Plan => &mut self.plan,
            Phase::Build => &mut self.build,
            Phase::ShipCheck => &mut self.ship_check,
            Phase::Eval => &mut self.eval,
        }
    }

    pub fn start(&mut self, phase: Phase) {
        *self.slot_mut(phase) = Some(PhaseTiming {
            started_at: Utc::now(),
            completed_at: None,
        });
    }

    pub fn complete(&mut self, phase: Phase) {
        if let Some(timing) = self.slot_mut(phase).as_mut() {
            timing.completed_at = Some(Utc::now());
        }
    }
}

/// One full pass through SCAN → PLAN → BUILD → SHIP_CHECK → EVAL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cycle {
    pub id: CycleId,
    /// 1-based, strictly increasing across the cycle history.
    pub number: u64,
    pub state: CycleState,
    pub mode: EngineMode,
    pub phases: PhaseTimings,
    /// Sum of the costs charged by this cycle's phases.
    pub total_cost_usd: f64,
    pub tasks_created: u32,
    pub tasks_completed: u32,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Cycle {
    pub fn new(number: u64, mode: EngineMode) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            number,
            state: CycleState::Running,
            mode,
            phases: PhaseTimings::default(),
            total_cost_usd: 0.0,
            tasks_created: 0,
            tasks_completed: 0,
            started_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Finalize to `completed` or `failed`, stamping `completed_at`.
    pub fn finalize(&mut self, failed: bool) {
        self.state = if failed {
            CycleState::Failed
        } else {
            CycleState::Completed
        };
        self.completed_at = Some(Utc::now());
        self.touch();
    }
}

// =============================================================================
// Phase artifacts: Scan, Plan, Run, Evaluation
// =============================================================================

/// A single observation produced by SCAN.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub summary: String,
    /// Clamped into `[0, 1]` at parse time.
    pub relevance: f64,
    /// Coerced into `{speculative, hypothesis}` at parse time.
    pub truth: TruthLabel,
    pub sources: Vec<String>,
}

/// Output of the SCAN phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scan {
    pub id: String,
    pub cycle_id: CycleId,
    pub objective_ids: Vec<ObjectiveId>,
    pub findings: Vec<Finding>,
    pub cost_usd: f64,
    pub tokens: u64,
    pub latency_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl Scan {
    pub fn new(cycle_id: impl Into<CycleId>, objective_ids: Vec<ObjectiveId>) -> Self {
        Self {
            id: new_id(),
            cycle_id: cycle_id.into(),
            objective_ids,
            findings: Vec::new(),
            cost_usd: 0.0,
            tokens: 0,
            latency_ms: 0,
            created_at: Utc::now(),
        }
    }
}

/// Estimated implementation size of a proposed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskComplexity {
    Trivial,
    Small,
    Medium,
    Large,
}

/// A task suggested by the planner, before tier resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedTask {
    pub title: String,
    pub description: String,
    pub estimated_complexity: TaskComplexity,
    pub suggested_tier: AutonomyTier,
}

/// One priority within a plan; always references a known objective.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Priority {
    pub objective_id: ObjectiveId,
    pub rationale: String,
    pub proposed_tasks: Vec<ProposedTask>,
}

/// The planner's strategy for the cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub summary: String,
    pub priorities: Vec<Priority>,
}

/// Output of the PLAN phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub cycle_id: CycleId,
    pub scan_id: String,
    pub strategy: Strategy,
    pub cost_usd: f64,
    pub tokens: u64,
    pub latency_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl Plan {
    pub fn new(cycle_id: impl Into<CycleId>, scan_id: impl Into<String>, strategy: Strategy) -> Self {
        Self {
            id: new_id(),
            cycle_id: cycle_id.into(),
            scan_id: scan_id.into(),
            strategy,
            cost_usd: 0.0,
            tokens: 0,
            latency_ms: 0,
            created_at: Utc::now(),
        }
    }
}

/// Record of a single external call that produced an artifact of record.
///
/// SCAN/PLAN/EVAL create one per adapter call; BUILD one per worker
/// execution; SHIP_CHECK one per task reviewed. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub cycle_id: CycleId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    pub phase: Phase,
    pub provider: String,
    pub model: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub tokens: u64,
    pub cost_usd: f64,
    pub latency_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl Run {
    pub fn new(cycle_id: impl Into<CycleId>, phase: Phase, provider: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            cycle_id: cycle_id.into(),
            task_id: None,
            phase,
            provider: provider.into(),
            model: String::new(),
            prompt: String::new(),
            response: None,
            success: false,
            error: None,
            tokens: 0,
            cost_usd: 0.0,
            latency_ms: 0,
            created_at: Utc::now(),
        }
    }
}

/// Time window an evaluation covers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EvalPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Cycle metrics assembled by EVAL.
///
/// `tasks_completed`, `tasks_failed`, and `total_cost_usd` are always
/// overridden with counts observed by the engine; model-reported values for
/// these fields are discarded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvalMetrics {
    pub tasks_completed: u32,
    pub tasks_failed: u32,
    pub total_cost_usd: f64,
    pub avg_task_latency_ms: u64,
    pub objective_progress: HashMap<ObjectiveId, f64>,
}

/// Urgency of an EVAL recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationPriority {
    Low,
    Medium,
    High,
}

/// A forward-looking suggestion produced by EVAL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub summary: String,
    pub priority: RecommendationPriority,
    pub truth: TruthLabel,
}

/// Output of the EVAL phase; one per cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub id: String,
    pub cycle_id: CycleId,
    pub period: EvalPeriod,
    pub metrics: EvalMetrics,
    pub insights: Vec<String>,
    pub recommendations: Vec<Recommendation>,
    pub cost_usd: f64,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Engine state
// =============================================================================

/// Process-wide engine state with a durable snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineState {
    pub loop_state: LoopState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_cycle_id: Option<CycleId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<Phase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task_id: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_cycle_completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cycle_scheduled_at: Option<DateTime<Utc>>,
    /// Increments only on successful cycle finalization.
    pub total_cycles_completed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            loop_state: LoopState::Idle,
            current_cycle_id: None,
            current_phase: None,
            current_task_id: None,
            last_cycle_completed_at: None,
            next_cycle_scheduled_at: None,
            total_cycles_completed: 0,
            error: None,
            updated_at: Utc::now(),
        }
    }
}

impl EngineState {
    /// Recover from a crash that persisted a mid-cycle state: anything other
    /// than `idle` or `paused` is forced back to `idle` on startup.
    pub fn reset_transient(&mut self) {
        if !matches!(self.loop_state, LoopState::Idle | LoopState::Paused) {
            tracing::warn!(
                from = %self.loop_state,
                "Persisted engine state is mid-cycle, resetting to idle"
            );
            self.loop_state = LoopState::Idle;
            self.current_cycle_id = None;
            self.current_phase = None;
            self.current_task_id = None;
        }
        self.updated_at = Utc::now();
    }
}

// =============================================================================
// Cost records & budget state
// =============================================================================

/// Immutable record of one billable call. Appended by the phase executor,
/// never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRecord {
    pub timestamp: DateTime<Utc>,
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    pub provider: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub latency_ms: u64,
}

/// Durable snapshot of the cost ledger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BudgetState {
    pub records: Vec<CostRecord>,
}

// =============================================================================
// Audit log entries
// =============================================================================

/// Append-only audit record of a decision made by a human or by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionLogEntry {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle_id: Option<CycleId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    /// Who decided, e.g. `"operator"`.
    pub actor: String,
    pub decision: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DecisionLogEntry {
    pub fn new(actor: impl Into<String>, decision: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            cycle_id: None,
            task_id: None,
            actor: actor.into(),
            decision: decision.into(),
            rationale: None,
            created_at: Utc::now(),
        }
    }
}

/// Append-only record of a hypothesis worth testing in later cycles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentLogEntry {
    pub id: String,
    pub cycle_id: CycleId,
    pub name: String,
    pub hypothesis: String,
    pub truth: TruthLabel,
    pub created_at: DateTime<Utc>,
}

impl ExperimentLogEntry {
    pub fn new(
        cycle_id: impl Into<CycleId>,
        name: impl Into<String>,
        hypothesis: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id(),
            cycle_id: cycle_id.into(),
            name: name.into(),
            hypothesis: hypothesis.into(),
            truth: TruthLabel::speculative(),
            created_at: Utc::now(),
        }
    }
}
