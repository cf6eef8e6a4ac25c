//! Phase execution.
//!
//! One executor drives all five phases. Every phase passes through the same
//! pre-flight gate before any external call is made:
//!
//! 1. a conservative cost estimate for the phase,
//! 2. the provider the phase will use (from the role assignment),
//! 3. the budget guard — a block fails the phase with the guard's reason and
//!    charges nothing,
//! 4. the set of active objectives (SCAN alone requires it non-empty).
//!
//! Inter-phase state (`last_scan`, `last_plan`, `last_tasks`) lives in a
//! [`CycleContext`] owned by the running cycle and reset at the end of EVAL;
//! nothing leaks across cycles.

pub mod parse;

mod build;
mod eval;
mod plan;
mod scan;
mod ship_check;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use flywheel_core::{
    BudgetGuard, BudgetState, BudgetVerdict, CostLedger, Cycle, EngineEvent, KeywordTierPolicy,
    Objective, Phase, Plan, Scan, SharedEventBus, SharedStore, SpendRequest, StateStore as _,
    Task, TierPolicy,
};

use crate::router::{ModelRouter, Role};

/// Conservative per-phase cost estimates (USD), used for admission only.
pub const SCAN_ESTIMATE_USD: f64 = 0.01;
pub const PLAN_ESTIMATE_USD: f64 = 0.05;
pub const BUILD_ESTIMATE_USD: f64 = 0.50;
pub const SHIP_CHECK_ESTIMATE_USD: f64 = 0.10;
pub const EVAL_ESTIMATE_USD: f64 = 0.05;

/// Result of one phase execution.
#[derive(Debug, Clone)]
pub struct PhaseOutcome {
    pub success: bool,
    pub cost_usd: f64,
    pub error: Option<String>,
    pub tasks_created: u32,
    pub tasks_completed: u32,
}

impl PhaseOutcome {
    pub fn ok(cost_usd: f64) -> Self {
        Self {
            success: true,
            cost_usd,
            error: None,
            tasks_created: 0,
            tasks_completed: 0,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            cost_usd: 0.0,
            error: Some(error.into()),
            tasks_created: 0,
            tasks_completed: 0,
        }
    }
}

/// Inter-phase state carried within one cycle only.
#[derive(Default)]
pub struct CycleContext {
    pub last_scan: Option<Scan>,
    pub last_plan: Option<Plan>,
    pub last_tasks: Vec<Task>,
}

impl CycleContext {
    /// Cleared at the end of EVAL so nothing bleeds into the next cycle.
    pub fn reset(&mut self) {
        self.last_scan = None;
        self.last_plan = None;
        self.last_tasks.clear();
    }
}

/// Executes phases against the router, ledger, guard, and store.
pub struct PhaseExecutor {
    pub(crate) store: SharedStore,
    pub(crate) router: Arc<ModelRouter>,
    pub(crate) ledger: Arc<CostLedger>,
    pub(crate) guard: Arc<BudgetGuard>,
    pub(crate) events: SharedEventBus,
    pub(crate) working_dir: PathBuf,
    pub(crate) tier_policy: Box<dyn TierPolicy>,
}

impl PhaseExecutor {
    pub fn new(
        store: SharedStore,
        router: Arc<ModelRouter>,
        ledger: Arc<CostLedger>,
        guard: Arc<BudgetGuard>,
        events: SharedEventBus,
        working_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            router,
            ledger,
            guard,
            events,
            working_dir,
            tier_policy: Box::new(KeywordTierPolicy),
        }
    }

    /// Swap the tier policy (keyword policy by default).
    pub fn with_tier_policy(mut self, policy: Box<dyn TierPolicy>) -> Self {
        self.tier_policy = policy;
        self
    }

    pub fn estimated_cost(phase: Phase) -> f64 {
        match phase {
            Phase::Scan => SCAN_ESTIMATE_USD,
            Phase::Plan => PLAN_ESTIMATE_USD,
            Phase::Build => BUILD_ESTIMATE_USD,
            Phase::ShipCheck => SHIP_CHECK_ESTIMATE_USD,
            Phase::Eval => EVAL_ESTIMATE_USD,
        }
    }

    /// The role each phase draws its backend from.
    pub fn role_for(phase: Phase) -> Role {
        match phase {
            Phase::Scan => Role::Research,
            Phase::Plan => Role::Planning,
            Phase::Build => Role::Building,
            Phase::ShipCheck => Role::Reviewing,
            Phase::Eval => Role::Planning,
        }
    }

    /// Execute one phase under the common pre-flight gate.
    pub async fn execute(
        &self,
        phase: Phase,
        cycle: &Cycle,
        ctx: &mut CycleContext,
    ) -> PhaseOutcome {
        let estimate = Self::estimated_cost(phase);
        let provider = match phase {
            Phase::Build | Phase::ShipCheck => self.router.build_worker().provider,
            _ => self.router.adapter_for(Self::role_for(phase)).provider,
        };

        let verdict = self.guard.check(&SpendRequest {
            estimated_cost_usd: estimate,
            task_id: None,
            cycle_spend_usd: cycle.total_cost_usd,
            provider: &provider,
        });
        if let BudgetVerdict::Blocked { level, reason } = verdict {
            self.events.publish(EngineEvent::BudgetExceeded {
                level,
                reason: reason.clone(),
                timestamp: Utc::now(),
            });
            return PhaseOutcome::failed(format!("budget blocked ({level}): {reason}"));
        }

        let objectives = match self.active_objectives() {
            Ok(objectives) => objectives,
            Err(e) => return PhaseOutcome::failed(format!("failed to load objectives: {e}")),
        };
        if phase == Phase::Scan && objectives.is_empty() {
            return PhaseOutcome::failed("no active objectives");
        }

        match phase {
            Phase::Scan => scan::run(self, cycle, ctx, &objectives).await,
            Phase::Plan => plan::run(self, cycle, ctx, &objectives).await,
            Phase::Build => build::run(self, cycle, ctx).await,
            Phase::ShipCheck => ship_check::run(self, cycle, ctx).await,
            Phase::Eval => eval::run(self, cycle, ctx, &objectives).await,
        }
    }

    fn active_objectives(&self) -> Result<Vec<Objective>, flywheel_core::StoreError> {
        Ok(self
            .store
            .load_objectives()?
            .into_iter()
            .filter(Objective::is_active)
            .collect())
    }

    /// Append a cost record to the ledger and refresh the durable snapshot.
    /// Records land before the phase reports success.
    pub(crate) fn charge(&self, record: flywheel_core::CostRecord) {
        self.ledger.record(record);
        if let Err(e) = self.store.save_budget_state(&BudgetState {
            records: self.ledger.records(),
        }) {
            warn!(error = %e, "failed to persist budget state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_role_mapping() {
        assert_eq!(PhaseExecutor::role_for(Phase::Scan), Role::Research);
        assert_eq!(PhaseExecutor::role_for(Phase::Plan), Role::Planning);
        assert_eq!(PhaseExecutor::role_for(Phase::Build), Role::Building);
        assert_eq!(PhaseExecutor::role_for(Phase::ShipCheck), Role::Reviewing);
        assert_eq!(PhaseExecutor::role_for(Phase::Eval), Role::Planning);
    }

    #[test]
    fn estimates_are_positive_and_scan_is_cheapest() {
        for phase in Phase::ALL {
            assert!(PhaseExecutor::estimated_cost(phase) > 0.0);
        }
        assert!(SCAN_ESTIMATE_USD < PLAN_ESTIMATE_USD);
        assert!(BUILD_ESTIMATE_USD > SHIP_CHECK_ESTIMATE_USD);
    }

    #[test]
    fn context_reset_clears_everything() {
        let mut ctx = CycleContext {
            last_scan: Some(Scan::new("c1", vec!["o1".into()])),
            last_plan: None,
            last_tasks: vec![],
        };
        ctx.reset();
        assert!(ctx.last_scan.is_none());
        assert!(ctx.last_plan.is_none());
        assert!(ctx.last_tasks.is_empty());
    }
}
