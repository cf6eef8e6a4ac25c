//! Autonomous work-cycle orchestrator.
//!
//! Repeatedly drives the fixed pipeline SCAN → PLAN → BUILD → SHIP_CHECK →
//! EVAL against operator-declared objectives. Model and worker backends are
//! pluggable behind the adapter traits; every external call is admitted by
//! the budget guard and recorded in the cost ledger; risky tasks divert to
//! the human-approval queue instead of executing.
//!
//! Built on `flywheel-core` for the data model, state machine, ledger,
//! budget guard, tier policy, events, and store.

pub mod adapters;
pub mod approval;
pub mod control;
pub mod orchestrator;
pub mod phases;
pub mod router;
pub mod scheduler;

pub use adapters::{
    BuildWorker, CheckOutcome, GenerationRequest, GenerationResponse, MockGenerator, MockWorker,
    SharedGenerator, SharedWorker, TextGenerator, WorkOrder, WorkerOutcome,
};
pub use approval::{ApprovalError, ApprovalQueue};
pub use control::{ControlError, ControlSurface};
pub use orchestrator::{EngineSnapshot, Orchestrator, PresetHook};
pub use phases::{CycleContext, PhaseExecutor, PhaseOutcome};
pub use router::{assignment, ModelRouter, Role, RoleAssignment, RoutedGenerator, RoutedWorker};
pub use scheduler::CycleScheduler;
