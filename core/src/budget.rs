//! Multi-tier budget guard — pre-call admission control.
//!
//! Every phase asks the guard before making a billable call. The guard
//! checks six caps in a fixed order and the first failing check wins, which
//! makes the reported level observable and testable. Comparisons are strict
//! (`>`), so an estimate exactly at a cap is admitted.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::ledger::CostLedger;

/// Spend caps, all in USD. Hot-reloadable via [`BudgetGuard::update_budgets`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetConfig {
    pub per_call_usd: f64,
    pub per_task_usd: f64,
    pub per_cycle_usd: f64,
    pub daily_usd: f64,
    pub weekly_usd: f64,
    /// Per-provider daily caps. Providers without an entry (or with a cap of
    /// zero) are not checked at this level.
    #[serde(default)]
    pub per_provider_daily_usd: HashMap<String, f64>,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            per_call_usd: 1.0,
            per_task_usd: 5.0,
            per_cycle_usd: 20.0,
            daily_usd: 50.0,
            weekly_usd: 200.0,
            per_provider_daily_usd: HashMap::new(),
        }
    }
}

impl BudgetConfig {
    /// All caps must be non-negative.
    pub fn validate(&self) -> Result<(), String> {
        let named = [
            ("per_call_usd", self.per_call_usd),
            ("per_task_usd", self.per_task_usd),
            ("per_cycle_usd", self.per_cycle_usd),
            ("daily_usd", self.daily_usd),
            ("weekly_usd", self.weekly_usd),
        ];
        for (name, cap) in named {
            if cap < 0.0 {
                return Err(format!("{name} must be non-negative, got {cap}"));
            }
        }
        for (provider, cap) in &self.per_provider_daily_usd {
            if *cap < 0.0 {
                return Err(format!(
                    "per_provider_daily_usd[{provider}] must be non-negative, got {cap}"
                ));
            }
        }
        Ok(())
    }
}

/// The cap level at which a call was blocked. Checks run in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetLevel {
    PerCall,
    PerTask,
    PerCycle,
    Daily,
    Weekly,
    PerProviderDaily,
}

impl std::fmt::Display for BudgetLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PerCall => "per_call",
            Self::PerTask => "per_task",
            Self::PerCycle => "per_cycle",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::PerProviderDaily => "per_provider_daily",
        };
        write!(f, "{s}")
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BudgetVerdict {
    Allowed,
    Blocked { level: BudgetLevel, reason: String },
}

impl BudgetVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// The blocking level, if blocked.
    pub fn level(&self) -> Option<BudgetLevel> {
        match self {
            Self::Allowed => None,
            Self::Blocked { level, .. } => Some(*level),
        }
    }
}

/// One proposed billable call.
#[derive(Debug, Clone)]
pub struct SpendRequest<'a> {
    pub estimated_cost_usd: f64,
    pub task_id: Option<&'a str>,
    pub cycle_spend_usd: f64,
    pub provider: &'a str,
}

/// Pre-call admission control over the cost ledger and the cycle's running
/// spend.
pub struct BudgetGuard {
    config: RwLock<BudgetConfig>,
    ledger: Arc<CostLedger>,
}

impl BudgetGuard {
    pub fn new(config: BudgetConfig, ledger: Arc<CostLedger>) -> Self {
        Self {
            config: RwLock::new(config),
            ledger,
        }
    }

    /// Swap the active caps without touching the ledger.
    pub fn update_budgets(&self, config: BudgetConfig) {
        let mut guard = self.config.write().unwrap_or_else(|e| e.into_inner());
        *guard = config;
    }

    /// Snapshot of the active caps.
    pub fn config(&self) -> BudgetConfig {
        self.config
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Check the six caps in order; the first failing level wins.
    pub fn check(&self, req: &SpendRequest<'_>) -> BudgetVerdict {
        let cfg = self.config();
        let est = req.estimated_cost_usd;

        // 1. per_call
        if est > cfg.per_call_usd {
            return blocked(
                BudgetLevel::PerCall,
                format!(
                    "estimated ${est:.4} exceeds per-call cap ${:.4}",
                    cfg.per_call_usd
                ),
            );
        }

        // 2. per_task (skipped when the call is not attributed to a task)
        if let Some(task_id) = req.task_id {
            let spent = self.ledger.cost_for_task(task_id);
            if spent + est > cfg.per_task_usd {
                return blocked(
                    BudgetLevel::PerTask,
                    format!(
                        "task {task_id} at ${spent:.4} + ${est:.4} exceeds per-task cap ${:.4}",
                        cfg.per_task_usd
                    ),
                );
            }
        }

        // 3. per_cycle
        if req.cycle_spend_usd + est > cfg.per_cycle_usd {
            return blocked(
                BudgetLevel::PerCycle,
                format!(
                    "cycle at ${:.4} + ${est:.4} exceeds per-cycle cap ${:.4}",
                    req.cycle_spend_usd, cfg.per_cycle_usd
                ),
            );
        }

        // 4. daily
        let daily = self.ledger.daily_cost();
        if daily + est > cfg.daily_usd {
            return blocked(
                BudgetLevel::Daily,
                format!(
                    "daily spend ${daily:.4} + ${est:.4} exceeds daily cap ${:.4}",
                    cfg.daily_usd
                ),
            );
        }

        // 5. weekly
        let weekly = self.ledger.weekly_cost();
        if weekly + est > cfg.weekly_usd {
            return blocked(
                BudgetLevel::Weekly,
                format!(
                    "weekly spend ${weekly:.4} + ${est:.4} exceeds weekly cap ${:.4}",
                    cfg.weekly_usd
                ),
            );
        }

        // 6. per_provider_daily (skipped when unconfigured or capped at zero)
        if let Some(&cap) = cfg.per_provider_daily_usd.get(req.provider) {
            if cap != 0.0 {
                let spent = self.ledger.provider_daily_cost(req.provider);
                if spent + est > cap {
                    return blocked(
                        BudgetLevel::PerProviderDaily,
                        format!(
                            "provider {} daily spend ${spent:.4} + ${est:.4} exceeds cap ${cap:.4}",
                            req.provider
                        ),
                    );
                }
            }
        }

        BudgetVerdict::Allowed
    }
}

fn blocked(level: BudgetLevel, reason: String) -> BudgetVerdict {
    tracing::warn!(level = %level, %reason, "budget check blocked");
    BudgetVerdict::Blocked { level, reason }
}
