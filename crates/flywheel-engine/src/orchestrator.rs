//! Orchestration loop: drive cycles through the five-phase pipeline.
//!
//! The orchestrator owns the engine state and the current cycle. One cycle
//! at a time: phases run sequentially, each gated by the budget guard inside
//! the phase executor, and a failed phase routes the loop through `error`
//! back to `idle` — the next cycle is still scheduled. `stop()` breaks the
//! loop between phases; the in-flight phase always completes.
//!
//! Persistence of the engine state at finalization is awaited, never
//! fire-and-forget: the snapshot on disk is current before the next cycle
//! is armed.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, warn};

use flywheel_core::{
    can_transition, BudgetGuard, CostLedger, Cycle, EngineConfig, EngineEvent, EngineMode,
    EngineState, EngineStateMachine, LoopState, Phase, SharedEventBus, SharedStore,
    StateStore as _,
};

use crate::phases::{CycleContext, PhaseExecutor};
use crate::router::ModelRouter;
use crate::scheduler::CycleScheduler;

/// Hook run by `trigger(preset)` before the cycle starts, e.g. to seed an
/// objective for a demo run.
pub type PresetHook = Arc<dyn Fn(&SharedStore) -> anyhow::Result<()> + Send + Sync>;

/// Read-only view of the engine for the control surface.
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub state: LoopState,
    pub mode: EngineMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_cycle_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_task_id: Option<String>,
    pub total_cycles_completed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cycle_completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cycle_scheduled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Owns the engine state, runs cycles, and schedules the next one.
pub struct Orchestrator {
    store: SharedStore,
    router: Arc<ModelRouter>,
    ledger: Arc<CostLedger>,
    guard: Arc<BudgetGuard>,
    events: SharedEventBus,
    executor: PhaseExecutor,
    scheduler: CycleScheduler,
    config: RwLock<EngineConfig>,
    machine: Mutex<EngineStateMachine>,
    engine_state: RwLock<EngineState>,
    running: AtomicBool,
    /// Serializes cycle execution; `try_lock` failure means a cycle is in
    /// flight.
    cycle_lock: AsyncMutex<()>,
    presets: RwLock<HashMap<String, PresetHook>>,
}

impl Orchestrator {
    /// Wire the engine together. The phase executor is auto-wired with the
    /// router, ledger, and guard; the router is aligned with the config's
    /// mode and toggles.
    pub fn new(
        store: SharedStore,
        router: Arc<ModelRouter>,
        config: EngineConfig,
        events: SharedEventBus,
    ) -> Arc<Self> {
        let ledger = Arc::new(CostLedger::new());
        let guard = Arc::new(BudgetGuard::new(
            config.budgets.clone(),
            Arc::clone(&ledger),
        ));
        let working_dir = config
            .working_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        let executor = PhaseExecutor::new(
            Arc::clone(&store),
            Arc::clone(&router),
            Arc::clone(&ledger),
            Arc::clone(&guard),
            Arc::clone(&events),
            working_dir,
        );
        router.update_config(config.mode, config.providers);

        Arc::new(Self {
            store,
            router,
            ledger,
            guard,
            events,
            executor,
            scheduler: CycleScheduler::new(),
            config: RwLock::new(config),
            machine: Mutex::new(EngineStateMachine::new()),
            engine_state: RwLock::new(EngineState::default()),
            running: AtomicBool::new(true),
            cycle_lock: AsyncMutex::new(()),
            presets: RwLock::new(HashMap::new()),
        })
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn ledger(&self) -> &Arc<CostLedger> {
        &self.ledger
    }

    pub fn guard(&self) -> &Arc<BudgetGuard> {
        &self.guard
    }

    pub fn events(&self) -> &SharedEventBus {
        &self.events
    }

    pub fn router(&self) -> &Arc<ModelRouter> {
        &self.router
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start the engine: restore persisted state (forcing mid-cycle states
    /// back to `idle`), load config and the ledger snapshot, and arm the
    /// first cycle after the cooldown.
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        let mut state = self
            .store
            .load_engine_state()
            .context("load engine state")?
            .unwrap_or_default();
        state.reset_transient();

        {
            let mut machine = self.machine.lock().unwrap_or_else(|e| e.into_inner());
            *machine = EngineStateMachine::starting_at(state.loop_state);
        }
        {
            let mut st = self.engine_state.write().unwrap_or_else(|e| e.into_inner());
            *st = state;
        }

        match self.store.load_config().context("load config")? {
            Some(config) => {
                config.validate().map_err(anyhow::Error::msg)?;
                self.apply_config(config);
            }
            None => {
                // First boot: persist the defaults so the operator has a
                // document to edit.
                self.store.save_config(&self.config())?;
            }
        }

        if let Some(budget_state) = self.store.load_budget_state()? {
            self.ledger.load_records(budget_state.records);
        }

        self.running.store(true, Ordering::SeqCst);
        self.schedule_next();
        self.persist_engine_state()?;

        let config = self.config();
        info!(
            mode = %config.mode,
            cooldown_minutes = config.cycle_cooldown_minutes,
            ledger_records = self.ledger.len(),
            "engine started"
        );
        Ok(())
    }

    /// Stop the engine: clear the running flag, cancel any scheduled cycle,
    /// and persist the engine state. An in-flight phase completes first.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.scheduler.cancel();
        {
            let mut st = self.engine_state.write().unwrap_or_else(|e| e.into_inner());
            st.next_cycle_scheduled_at = None;
        }
        if let Err(e) = self.persist_engine_state() {
            warn!(error = %e, "failed to persist engine state on stop");
        }
        info!("engine stopped");
    }

    // =========================================================================
    // Public operations
    // =========================================================================

    /// Snapshot of the engine for the control surface.
    pub fn snapshot(&self) -> EngineSnapshot {
        let st = self
            .engine_state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        EngineSnapshot {
            state: st.loop_state,
            mode: self.config().mode,
            phase: st.current_phase,
            current_cycle_id: st.current_cycle_id,
            current_task_id: st.current_task_id,
            total_cycles_completed: st.total_cycles_completed,
            last_cycle_completed_at: st.last_cycle_completed_at,
            next_cycle_scheduled_at: st.next_cycle_scheduled_at,
            error: st.error,
        }
    }

    /// Pause: idempotent; cancels the scheduled cycle and parks the loop.
    /// A cycle already in flight completes before the pause takes effect on
    /// scheduling.
    pub fn pause(&self) {
        self.scheduler.cancel();
        {
            let mut st = self.engine_state.write().unwrap_or_else(|e| e.into_inner());
            st.next_cycle_scheduled_at = None;
        }

        let current = self.current_state();
        if current == LoopState::Paused {
            return;
        }
        if let Err(e) = self.transition(LoopState::Paused, Some("operator pause")) {
            warn!(error = %e, "pause transition rejected");
            return;
        }
        if let Err(e) = self.persist_engine_state() {
            warn!(error = %e, "failed to persist engine state on pause");
        }
        info!("engine paused");
    }

    /// Resume: no-op unless paused; returns to `idle` and reschedules.
    pub fn resume(self: &Arc<Self>) {
        if self.current_state() != LoopState::Paused {
            return;
        }
        if let Err(e) = self.transition(LoopState::Idle, Some("operator resume")) {
            warn!(error = %e, "resume transition rejected");
            return;
        }
        self.schedule_next();
        if let Err(e) = self.persist_engine_state() {
            warn!(error = %e, "failed to persist engine state on resume");
        }
        info!("engine resumed");
    }

    /// Run one cycle now. Fails unless the engine is `idle` or `paused`.
    /// An unknown preset name logs a warning but the cycle still runs.
    pub async fn trigger(self: &Arc<Self>, preset: Option<&str>) -> anyhow::Result<String> {
        let current = self.current_state();
        if !matches!(current, LoopState::Idle | LoopState::Paused) {
            anyhow::bail!("Cannot trigger: engine is {current}");
        }
        self.scheduler.cancel();

        if let Some(name) = preset {
            let hook = {
                let presets = self.presets.read().unwrap_or_else(|e| e.into_inner());
                presets.get(name).cloned()
            };
            match hook {
                Some(hook) => {
                    if let Err(e) = hook(&self.store) {
                        warn!(preset = name, error = %e, "preset hook failed; cycle continues");
                    }
                }
                None => warn!(preset = name, "unknown preset; cycle continues"),
            }
        }

        self.run_cycle().await
    }

    /// Register a preset hook under a name.
    pub fn register_preset(&self, name: impl Into<String>, hook: PresetHook) {
        let mut presets = self.presets.write().unwrap_or_else(|e| e.into_inner());
        presets.insert(name.into(), hook);
    }

    /// Reload config from the store and apply it. Does not restart cycles.
    pub fn reload_config(&self) -> anyhow::Result<()> {
        if let Some(config) = self.store.load_config()? {
            config.validate().map_err(anyhow::Error::msg)?;
            self.apply_config(config);
            info!("config reloaded");
        }
        Ok(())
    }

    /// Validate, apply, and persist a new config.
    pub fn set_config(&self, config: EngineConfig) -> anyhow::Result<()> {
        config.validate().map_err(anyhow::Error::msg)?;
        self.store.save_config(&config)?;
        self.apply_config(config);
        Ok(())
    }

    pub fn config(&self) -> EngineConfig {
        self.config
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Broadcast a new config to every consumer that holds it by reference:
    /// budget guard caps and router mode/toggles swap in place.
    fn apply_config(&self, config: EngineConfig) {
        self.guard.update_budgets(config.budgets.clone());
        self.router.update_config(config.mode, config.providers);
        let mut slot = self.config.write().unwrap_or_else(|e| e.into_inner());
        *slot = config;
    }

    // =========================================================================
    // Cycle execution
    // =========================================================================

    pub(crate) async fn run_cycle(self: &Arc<Self>) -> anyhow::Result<String> {
        let _permit = self
            .cycle_lock
            .try_lock()
            .map_err(|_| anyhow::anyhow!("Cannot trigger: a cycle is already running"))?;

        let config = self.config();
        let mut cycles = self.store.load_cycles()?;
        let number = cycles.len() as u64 + 1;
        let mut cycle = Cycle::new(number, config.mode);
        cycles.push(cycle.clone());
        self.store.save_cycles(&cycles)?;
        drop(cycles);

        {
            let mut st = self.engine_state.write().unwrap_or_else(|e| e.into_inner());
            st.current_cycle_id = Some(cycle.id.clone());
            st.next_cycle_scheduled_at = None;
        }
        info!(cycle = number, mode = %config.mode, "cycle started");

        let mut ctx = CycleContext::default();
        let mut failed = false;

        for phase in Phase::ALL {
            if !self.running.load(Ordering::SeqCst) {
                warn!(cycle = number, "engine stopping; breaking cycle loop");
                break;
            }

            if !self.enter_phase_state(phase) {
                warn!(cycle = number, phase = %phase, "phase state unreachable; skipping phase");
                continue;
            }
            {
                let mut st = self.engine_state.write().unwrap_or_else(|e| e.into_inner());
                st.current_phase = Some(phase);
            }

            cycle.phases.start(phase);
            let outcome = self.executor.execute(phase, &cycle, &mut ctx).await;
            cycle.phases.complete(phase);

            cycle.total_cost_usd += outcome.cost_usd;
            cycle.tasks_created += outcome.tasks_created;
            cycle.tasks_completed += outcome.tasks_completed;
            cycle.touch();
            self.store.upsert_cycle(&cycle)?;

            self.events.publish(EngineEvent::PhaseComplete {
                phase,
                cycle_id: cycle.id.clone(),
                cycle_number: cycle.number,
                success: outcome.success,
                cost_usd: outcome.cost_usd,
                error: outcome.error.clone(),
                timestamp: Utc::now(),
            });

            if !outcome.success {
                let message = outcome
                    .error
                    .unwrap_or_else(|| format!("{phase} failed"));
                error!(cycle = number, phase = %phase, error = %message, "phase failed; ending cycle");
                if let Err(e) = self.transition(LoopState::Error, Some(&message)) {
                    warn!(error = %e, "error transition rejected");
                }
                {
                    let mut st = self.engine_state.write().unwrap_or_else(|e| e.into_inner());
                    st.error = Some(message);
                }
                failed = true;
                break;
            }
        }

        // Finalize.
        cycle.finalize(failed);
        self.store.upsert_cycle(&cycle)?;
        {
            let mut st = self.engine_state.write().unwrap_or_else(|e| e.into_inner());
            if !failed {
                st.total_cycles_completed += 1;
                st.last_cycle_completed_at = Some(Utc::now());
                st.error = None;
            }
            st.current_cycle_id = None;
            st.current_phase = None;
            st.current_task_id = None;
        }

        if self.current_state() != LoopState::Idle {
            if let Err(e) = self.transition(LoopState::Idle, Some("cycle finalized")) {
                warn!(error = %e, "finalize transition rejected");
            }
        }

        self.schedule_next();
        // The durable snapshot must be current before this cycle is
        // reported finished.
        self.persist_engine_state()?;

        info!(
            cycle = number,
            failed,
            total_cost_usd = cycle.total_cost_usd,
            tasks_created = cycle.tasks_created,
            tasks_completed = cycle.tasks_completed,
            "cycle finalized"
        );
        Ok(cycle.id)
    }

    /// Arm the timer for the next cycle after the configured cooldown.
    fn schedule_next(self: &Arc<Self>) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        let delay = Duration::from_secs(self.config().cycle_cooldown_minutes * 60);
        let orch = Arc::clone(self);
        let fire_at = self.scheduler.schedule(delay, async move {
            if !orch.running.load(Ordering::SeqCst) {
                return;
            }
            if let Err(e) = orch.run_cycle().await {
                warn!(error = %e, "scheduled cycle did not run");
            }
        });
        let mut st = self.engine_state.write().unwrap_or_else(|e| e.into_inner());
        st.next_cycle_scheduled_at = Some(fire_at);
    }

    // =========================================================================
    // State machine plumbing
    // =========================================================================

    pub fn current_state(&self) -> LoopState {
        self.machine
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .current()
    }

    /// Advance the machine and mirror the state into the engine snapshot,
    /// broadcasting `state_changed`.
    fn transition(
        &self,
        to: LoopState,
        reason: Option<&str>,
    ) -> Result<(), flywheel_core::IllegalTransition> {
        let from = {
            let mut machine = self.machine.lock().unwrap_or_else(|e| e.into_inner());
            let from = machine.current();
            machine.advance(to, reason)?;
            from
        };

        let cycle_id = {
            let mut st = self.engine_state.write().unwrap_or_else(|e| e.into_inner());
            st.loop_state = to;
            st.updated_at = Utc::now();
            st.current_cycle_id.clone()
        };

        self.events.publish(EngineEvent::StateChanged {
            from,
            to,
            phase: to.phase(),
            cycle_id,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Enter a phase's loop state, recovering via `idle` when the direct
    /// edge is missing: if `target` is unreachable but `idle` is reachable
    /// and `idle → target` is legal, go through `idle`. Returns false when
    /// the phase must be skipped.
    fn enter_phase_state(&self, phase: Phase) -> bool {
        let target = phase.loop_state();
        if self.transition(target, None).is_ok() {
            return true;
        }

        let current = self.current_state();
        if can_transition(current, LoopState::Idle) && can_transition(LoopState::Idle, target) {
            warn!(from = %current, to = %target, "recovering via idle");
            return self.transition(LoopState::Idle, Some("recovery")).is_ok()
                && self.transition(target, None).is_ok();
        }
        false
    }

    fn persist_engine_state(&self) -> anyhow::Result<()> {
        let state = self
            .engine_state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        self.store
            .save_engine_state(&state)
            .context("persist engine state")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flywheel_core::{EventBus, MemoryStore, Objective, ProviderToggles, StateStore};

    fn simulation_orchestrator() -> Arc<Orchestrator> {
        let store = MemoryStore::new().shared();
        store
            .save_objectives(&[Objective::new("Test", "")])
            .unwrap();
        let config = EngineConfig {
            mode: EngineMode::Simulation,
            cycle_cooldown_minutes: 60,
            ..Default::default()
        };
        let router = Arc::new(ModelRouter::new(config.mode, ProviderToggles::default()));
        Orchestrator::new(store, router, config, EventBus::new().shared())
    }

    #[tokio::test]
    async fn trigger_is_rejected_while_mid_cycle_state() {
        let orch = simulation_orchestrator();
        orch.transition(LoopState::Scanning, None).unwrap();
        let err = orch.trigger(None).await.unwrap_err();
        assert!(err.to_string().contains("Cannot trigger: engine is scanning"));
    }

    #[tokio::test]
    async fn pause_is_idempotent_and_resume_reschedules() {
        let orch = simulation_orchestrator();
        orch.pause();
        orch.pause();
        assert_eq!(orch.current_state(), LoopState::Paused);
        assert!(orch.snapshot().next_cycle_scheduled_at.is_none());

        orch.resume();
        assert_eq!(orch.current_state(), LoopState::Idle);
        assert!(orch.snapshot().next_cycle_scheduled_at.is_some());
        orch.stop().await;
    }

    #[tokio::test]
    async fn resume_is_a_noop_unless_paused() {
        let orch = simulation_orchestrator();
        orch.resume();
        assert_eq!(orch.current_state(), LoopState::Idle);
        assert!(orch.snapshot().next_cycle_scheduled_at.is_none());
    }

    #[tokio::test]
    async fn triggered_cycle_from_paused_state_runs() {
        let orch = simulation_orchestrator();
        orch.pause();
        let cycle_id = orch.trigger(None).await.unwrap();
        assert!(!cycle_id.is_empty());
        assert_eq!(orch.current_state(), LoopState::Idle);
        assert_eq!(orch.snapshot().total_cycles_completed, 1);
        orch.stop().await;
    }

    #[tokio::test]
    async fn unknown_preset_still_runs_the_cycle() {
        let orch = simulation_orchestrator();
        let cycle_id = orch.trigger(Some("no-such-preset")).await.unwrap();
        assert!(!cycle_id.is_empty());
        orch.stop().await;
    }

    #[tokio::test]
    async fn preset_hook_runs_before_the_cycle() {
        let orch = simulation_orchestrator();
        orch.register_preset(
            "seed",
            Arc::new(|store: &SharedStore| {
                let mut objectives = store.load_objectives()?;
                objectives.push(Objective::new("Seeded", ""));
                store.save_objectives(&objectives)?;
                Ok(())
            }),
        );
        orch.trigger(Some("seed")).await.unwrap();
        assert_eq!(orch.store().load_objectives().unwrap().len(), 2);
        orch.stop().await;
    }

    #[tokio::test]
    async fn set_config_rejects_invalid_and_applies_valid() {
        let orch = simulation_orchestrator();
        let bad = EngineConfig {
            cycle_cooldown_minutes: 0,
            ..Default::default()
        };
        assert!(orch.set_config(bad).is_err());

        let good = EngineConfig {
            mode: EngineMode::Live,
            cycle_cooldown_minutes: 5,
            ..Default::default()
        };
        orch.set_config(good).unwrap();
        assert_eq!(orch.config().mode, EngineMode::Live);
        assert_eq!(orch.router().mode(), EngineMode::Live);
        assert!(orch.store().load_config().unwrap().is_some());
    }
}
