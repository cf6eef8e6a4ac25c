//! End-to-end cycle tests against scripted adapters and the in-memory store.
//!
//! Covers the simulation happy path, budget-denied phases, T2 approval
//! diversion, the full build-and-review pipeline, and cycle monotonicity.

use std::sync::Arc;

use serde_json::json;

use flywheel_core::{
    BudgetConfig, CycleState, EngineConfig, EngineEvent, EngineMode, EventBus, LoopState,
    MemoryStore, Objective, Phase, Provider, SharedStore, StateStore, TaskState,
};
use flywheel_engine::adapters::{MockGenerator, MockWorker};
use flywheel_engine::router::ModelRouter;
use flywheel_engine::{ControlSurface, Orchestrator};

fn config(mode: EngineMode) -> EngineConfig {
    EngineConfig {
        mode,
        cycle_cooldown_minutes: 60,
        ..Default::default()
    }
}

fn store_with_objective(title: &str) -> SharedStore {
    let store = MemoryStore::new().shared();
    store
        .save_objectives(&[Objective::new(title, "integration objective")])
        .unwrap();
    store
}

/// Scenario: simulation cycle. Five phases run in order, cost stays zero,
/// the engine returns to idle with one completed cycle.
#[tokio::test]
async fn simulation_cycle_completes_all_phases() {
    let store = store_with_objective("Test");
    let cfg = config(EngineMode::Simulation);
    let router = Arc::new(ModelRouter::new(cfg.mode, cfg.providers));
    let orch = Orchestrator::new(store.clone(), router, cfg, EventBus::new().shared());

    let cycle_id = orch.trigger(None).await.unwrap();

    let cycles = store.load_cycles().unwrap();
    assert_eq!(cycles.len(), 1);
    let cycle = &cycles[0];
    assert_eq!(cycle.id, cycle_id);
    assert_eq!(cycle.number, 1);
    assert_eq!(cycle.state, CycleState::Completed);
    assert_eq!(cycle.total_cost_usd, 0.0);
    for phase in Phase::ALL {
        let timing = cycle.phases.slot(phase).expect("phase ran");
        assert!(timing.completed_at.is_some(), "{phase} completed");
    }

    let snapshot = orch.snapshot();
    assert_eq!(snapshot.state, LoopState::Idle);
    assert_eq!(snapshot.total_cycles_completed, 1);
    assert!(snapshot.error.is_none());

    // One scan, one plan, one evaluation persisted; three generator runs.
    assert_eq!(store.list_scans().unwrap().len(), 1);
    assert_eq!(store.list_plans().unwrap().len(), 1);
    assert_eq!(store.list_evaluations().unwrap().len(), 1);
    assert_eq!(store.list_runs().unwrap().len(), 3);

    orch.stop().await;
}

/// Events arrive in program order: a state change into each phase, the
/// phase completion, and a final return to idle.
#[tokio::test]
async fn simulation_cycle_emits_ordered_events() {
    let store = store_with_objective("Test");
    let cfg = config(EngineMode::Simulation);
    let router = Arc::new(ModelRouter::new(cfg.mode, cfg.providers));
    let events = EventBus::new().shared();
    let orch = Orchestrator::new(store, router, cfg, Arc::clone(&events));
    let mut rx = events.subscribe();

    orch.trigger(None).await.unwrap();
    orch.stop().await;

    let mut received = Vec::new();
    while let Ok(event) = rx.try_recv() {
        received.push(event);
    }

    let phase_completions: Vec<Phase> = received
        .iter()
        .filter_map(|e| match e {
            EngineEvent::PhaseComplete { phase, success, .. } => {
                assert!(*success);
                Some(*phase)
            }
            _ => None,
        })
        .collect();
    assert_eq!(phase_completions, Phase::ALL.to_vec());

    // First transition enters scanning; the last returns to idle.
    let transitions: Vec<(LoopState, LoopState)> = received
        .iter()
        .filter_map(|e| match e {
            EngineEvent::StateChanged { from, to, .. } => Some((*from, *to)),
            _ => None,
        })
        .collect();
    assert_eq!(transitions.first(), Some(&(LoopState::Idle, LoopState::Scanning)));
    assert_eq!(transitions.last().map(|(_, to)| *to), Some(LoopState::Idle));
}

/// Scenario: SCAN fails outright when no objective is active.
#[tokio::test]
async fn scan_requires_an_active_objective() {
    let store = MemoryStore::new().shared();
    let cfg = config(EngineMode::Simulation);
    let router = Arc::new(ModelRouter::new(cfg.mode, cfg.providers));
    let orch = Orchestrator::new(store.clone(), router, cfg, EventBus::new().shared());

    orch.trigger(None).await.unwrap();

    let cycles = store.load_cycles().unwrap();
    assert_eq!(cycles[0].state, CycleState::Failed);
    assert!(orch
        .snapshot()
        .error
        .as_deref()
        .unwrap()
        .contains("no active objectives"));
    assert_eq!(orch.snapshot().total_cycles_completed, 0);
    orch.stop().await;
}

/// Scenario: budget-denied PLAN. The per-call cap admits SCAN's estimate at
/// the cap boundary, blocks PLAN's larger estimate, and the cycle finalizes
/// failed with the next cycle still scheduled.
#[tokio::test]
async fn budget_denied_plan_fails_cycle_but_schedules_next() {
    let store = store_with_objective("Test");
    let mut cfg = config(EngineMode::Live);
    cfg.budgets = BudgetConfig {
        per_call_usd: 0.01,
        ..Default::default()
    };
    let router = Arc::new(ModelRouter::new(cfg.mode, cfg.providers));
    let orch = Orchestrator::new(store.clone(), router, cfg, EventBus::new().shared());

    orch.trigger(None).await.unwrap();

    let cycles = store.load_cycles().unwrap();
    let cycle = &cycles[0];
    assert_eq!(cycle.state, CycleState::Failed);
    // SCAN ran; PLAN was blocked before any call.
    assert!(cycle.phases.slot(Phase::Scan).is_some());
    assert!(cycle.phases.slot(Phase::Plan).is_some());
    assert!(cycle.phases.slot(Phase::Build).is_none());

    let snapshot = orch.snapshot();
    assert_eq!(snapshot.state, LoopState::Idle);
    assert_eq!(snapshot.total_cycles_completed, 0);
    let error = snapshot.error.unwrap();
    assert!(error.contains("per_call"), "{error}");
    // Next cycle still armed.
    assert!(snapshot.next_cycle_scheduled_at.is_some());

    orch.stop().await;
}

fn deploy_plan_response(objective_id: &str) -> String {
    json!({
        "strategy": {
            "summary": "ship the release",
            "priorities": [{
                "objective_id": objective_id,
                "rationale": "top weighted",
                "proposed_tasks": [{
                    "title": "Deploy to production",
                    "description": "roll out the new build",
                    "estimated_complexity": "small",
                    "suggested_tier": 0
                }]
            }]
        }
    })
    .to_string()
}

/// Scenario: T2 approval diversion. The deploy task is parked in
/// `awaiting_approval`, the worker is never invoked, and a control-surface
/// approve moves it to `building`.
#[tokio::test]
async fn t2_task_diverts_to_approval_queue() {
    let store = store_with_objective("Release");
    let objective_id = store.load_objectives().unwrap()[0].id.clone();

    let cfg = config(EngineMode::Live);
    let mut router = ModelRouter::new(cfg.mode, cfg.providers);
    router.register_generator(
        Provider::Gemini,
        Arc::new(MockGenerator::scripted("gemini", vec![])),
    );
    router.register_generator(
        Provider::OpenAi,
        Arc::new(MockGenerator::scripted(
            "openai",
            vec![deploy_plan_response(&objective_id)],
        )),
    );
    let worker = Arc::new(MockWorker::new().with_provider("claude"));
    router.register_worker(Provider::Claude, worker.clone());

    let orch = Orchestrator::new(store.clone(), Arc::new(router), cfg, EventBus::new().shared());
    orch.trigger(None).await.unwrap();

    let cycles = store.load_cycles().unwrap();
    assert_eq!(cycles[0].state, CycleState::Completed);
    assert_eq!(cycles[0].tasks_created, 1);
    assert_eq!(cycles[0].tasks_completed, 0);

    let tasks = store.load_tasks().unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].state, TaskState::AwaitingApproval);
    // Hard gate: the worker never ran.
    assert_eq!(worker.execution_count(), 0);
    assert_eq!(worker.check_count(), 0);

    // Approve through the control surface.
    let control = ControlSurface::new(Arc::clone(&orch));
    let result = control
        .dispatch("approve", json!({ "task_id": tasks[0].id }))
        .await
        .unwrap();
    assert_eq!(result["task"]["state"], "building");
    assert_eq!(
        store.load_tasks().unwrap()[0].state,
        TaskState::Building
    );
    // The human decision is on the audit log.
    assert_eq!(store.list_decisions().unwrap().len(), 1);

    orch.stop().await;
}

fn autonomous_plan_response(objective_id: &str) -> String {
    json!({
        "strategy": {
            "summary": "improve importer",
            "priorities": [{
                "objective_id": objective_id,
                "rationale": "most findings point here",
                "proposed_tasks": [{
                    "title": "Add csv streaming parser",
                    "description": "replace the buffered reader",
                    "estimated_complexity": "medium",
                    "suggested_tier": 0
                }]
            }]
        }
    })
    .to_string()
}

/// A T0 task flows building → reviewing → completed through the worker and
/// the reviewer, and EVAL reports the authoritative count.
#[tokio::test]
async fn autonomous_task_runs_through_worker_and_review() {
    let store = store_with_objective("Importer");
    let objective_id = store.load_objectives().unwrap()[0].id.clone();

    let cfg = config(EngineMode::Live);
    let mut router = ModelRouter::new(cfg.mode, cfg.providers);
    router.register_generator(
        Provider::Gemini,
        Arc::new(MockGenerator::scripted("gemini", vec![])),
    );
    router.register_generator(
        Provider::OpenAi,
        Arc::new(MockGenerator::scripted(
            "openai",
            vec![autonomous_plan_response(&objective_id)],
        )),
    );
    let worker = Arc::new(MockWorker::new().with_provider("claude"));
    router.register_worker(Provider::Claude, worker.clone());

    let orch = Orchestrator::new(store.clone(), Arc::new(router), cfg, EventBus::new().shared());
    orch.trigger(None).await.unwrap();

    let cycles = store.load_cycles().unwrap();
    assert_eq!(cycles[0].state, CycleState::Completed);
    assert_eq!(cycles[0].tasks_created, 1);
    assert_eq!(cycles[0].tasks_completed, 1);
    assert_eq!(worker.execution_count(), 1);
    assert_eq!(worker.check_count(), 1);

    let tasks = store.load_tasks().unwrap();
    assert_eq!(tasks[0].state, TaskState::Completed);
    assert!(tasks[0].completed_at.is_some());

    // Worker execution and review each left a Run record.
    let runs = store.list_runs().unwrap();
    let build_runs = runs.iter().filter(|r| r.phase == Phase::Build).count();
    let check_runs = runs.iter().filter(|r| r.phase == Phase::ShipCheck).count();
    assert_eq!(build_runs, 1);
    assert_eq!(check_runs, 1);

    // EVAL overrode model-reported counts with the observed ones.
    let evaluations = store.list_evaluations().unwrap();
    assert_eq!(evaluations[0].metrics.tasks_completed, 1);
    assert_eq!(evaluations[0].metrics.tasks_failed, 0);

    orch.stop().await;
}

/// A rejecting reviewer fails the task; EVAL counts the failure.
#[tokio::test]
async fn rejected_review_fails_the_task() {
    let store = store_with_objective("Importer");
    let objective_id = store.load_objectives().unwrap()[0].id.clone();

    let cfg = config(EngineMode::Live);
    let mut router = ModelRouter::new(cfg.mode, cfg.providers);
    router.register_generator(
        Provider::Gemini,
        Arc::new(MockGenerator::scripted("gemini", vec![])),
    );
    router.register_generator(
        Provider::OpenAi,
        Arc::new(MockGenerator::scripted(
            "openai",
            vec![autonomous_plan_response(&objective_id)],
        )),
    );
    let worker = Arc::new(
        MockWorker::rejecting(vec!["tests missing".into(), "no docs".into()])
            .with_provider("claude"),
    );
    router.register_worker(Provider::Claude, worker.clone());

    let orch = Orchestrator::new(store.clone(), Arc::new(router), cfg, EventBus::new().shared());
    orch.trigger(None).await.unwrap();

    let tasks = store.load_tasks().unwrap();
    assert_eq!(tasks[0].state, TaskState::Failed);
    assert_eq!(tasks[0].error.as_deref(), Some("tests missing; no docs"));

    let evaluations = store.list_evaluations().unwrap();
    assert_eq!(evaluations[0].metrics.tasks_completed, 0);
    assert_eq!(evaluations[0].metrics.tasks_failed, 1);

    orch.stop().await;
}

/// Sequential cycles have consecutive numbers and do not overlap in time.
#[tokio::test]
async fn cycle_numbers_are_monotonic() {
    let store = store_with_objective("Test");
    let cfg = config(EngineMode::Simulation);
    let router = Arc::new(ModelRouter::new(cfg.mode, cfg.providers));
    let orch = Orchestrator::new(store.clone(), router, cfg, EventBus::new().shared());

    orch.trigger(None).await.unwrap();
    orch.trigger(None).await.unwrap();

    let cycles = store.load_cycles().unwrap();
    assert_eq!(cycles.len(), 2);
    assert_eq!(cycles[0].number, 1);
    assert_eq!(cycles[1].number, 2);
    assert!(cycles[1].started_at >= cycles[0].completed_at.unwrap());
    assert_eq!(orch.snapshot().total_cycles_completed, 2);

    orch.stop().await;
}
