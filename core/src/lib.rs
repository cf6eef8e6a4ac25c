//! Core substrate for the flywheel work-cycle engine.
//!
//! This crate holds the pieces the orchestrator is built from but that carry
//! no orchestration policy of their own:
//!
//! - the persisted data model (objectives, tasks, cycles, scans, plans, runs,
//!   evaluations, audit log entries),
//! - the engine loop state machine with its legal-transition table,
//! - the append-only cost ledger and the multi-tier budget guard,
//! - the autonomy-tier keyword policy,
//! - the engine event bus,
//! - the store contract with its JSON-file and in-memory implementations,
//! - engine configuration.
//!
//! The orchestration loop, phase executors, provider routing, and the control
//! surface live in the `flywheel-engine` crate.

pub mod budget;
pub mod config;
pub mod events;
pub mod ledger;
pub mod model;
pub mod state_machine;
pub mod store;
pub mod tier;

pub use budget::{BudgetConfig, BudgetGuard, BudgetLevel, BudgetVerdict, SpendRequest};
pub use config::{EngineConfig, EngineMode, Provider, ProviderToggles};
pub use events::{EngineEvent, EventBus, SharedEventBus};
pub use ledger::CostLedger;
pub use model::{
    Artifact, ArtifactKind, BudgetState, Confidence, CostRecord, Cycle, CycleId, CycleState,
    DecisionLogEntry, EngineState, EvalMetrics, EvalPeriod, Evaluation, ExperimentLogEntry,
    Finding, Objective, ObjectiveId, ObjectiveStatus, Plan, PhaseTiming, PhaseTimings, Priority,
    ProposedTask, Recommendation, RecommendationPriority, Run, Scan, Strategy, Task,
    TaskComplexity, TaskId, TaskState, TruthLabel, TruthStatus,
};
pub use state_machine::{
    can_transition, EngineStateMachine, IllegalTransition, LoopState, Phase, TransitionRecord,
};
pub use store::{JsonStore, MemoryStore, SharedStore, StateStore, StoreError, StoreResult};
pub use tier::{AutonomyTier, KeywordTierPolicy, TierPolicy};
