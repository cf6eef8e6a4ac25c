//! SHIP_CHECK — review every task left in `reviewing`.
//!
//! One worker check per reviewing task, one Run record per check. Approval
//! completes the task and promotes its truth label to `(implemented,
//! medium)`; rejection fails it with the joined issues. Tasks in any other
//! state are untouched.

use chrono::Utc;
use tracing::info;

use flywheel_core::{
    CostRecord, Cycle, EngineEvent, Phase, Run, StateStore as _, Task, TaskState,
};

use super::{CycleContext, PhaseExecutor, PhaseOutcome};

/// Build the review input from what the worker reported during BUILD.
fn synthesize_build_result(task: &Task) -> String {
    let mut text = format!("Task: {}\n{}\n", task.title, task.description);
    if task.artifacts.is_empty() {
        text.push_str("No artifacts reported.\n");
    } else {
        text.push_str("Artifacts:\n");
        for artifact in &task.artifacts {
            text.push_str(&format!("- {:?}: {}\n", artifact.kind, artifact.value));
        }
    }
    text
}

pub(super) async fn run(
    exec: &PhaseExecutor,
    cycle: &Cycle,
    ctx: &mut CycleContext,
) -> PhaseOutcome {
    match run_inner(exec, cycle, ctx).await {
        Ok(outcome) => outcome,
        Err(e) => PhaseOutcome::failed(format!("ship_check failed: {e:#}")),
    }
}

async fn run_inner(
    exec: &PhaseExecutor,
    cycle: &Cycle,
    ctx: &mut CycleContext,
) -> anyhow::Result<PhaseOutcome> {
    let routed = exec.router.build_worker();
    let mut tasks = exec.store.load_tasks()?;
    let mut tasks_completed = 0u32;
    let mut phase_cost = 0.0;

    for task in tasks.iter_mut().filter(|t| t.state == TaskState::Reviewing) {
        let build_result = synthesize_build_result(task);

        let mut run = Run::new(cycle.id.clone(), Phase::ShipCheck, &routed.provider);
        run.task_id = Some(task.id.clone());
        run.model = "build-worker".to_string();
        run.prompt = build_result.clone();

        match routed.worker.check(task, &build_result).await {
            Ok(check) => {
                phase_cost += check.cost_usd;
                task.actual_cost_usd += check.cost_usd;
                run.success = true;
                run.response = Some(check.summary);
                run.cost_usd = check.cost_usd;
                run.latency_ms = check.latency_ms;

                if check.approved {
                    task.complete();
                    tasks_completed += 1;
                } else {
                    task.fail(check.issues.join("; "));
                }

                exec.charge(CostRecord {
                    timestamp: Utc::now(),
                    phase: Phase::ShipCheck,
                    task_id: Some(task.id.clone()),
                    provider: routed.provider.clone(),
                    model: run.model.clone(),
                    input_tokens: 0,
                    output_tokens: 0,
                    cost_usd: run.cost_usd,
                    latency_ms: run.latency_ms,
                });
            }
            Err(e) => {
                let error = format!("check error: {e}");
                run.error = Some(error.clone());
                task.fail(error);
            }
        }

        exec.store.append_run(&run)?;
        exec.events.publish(EngineEvent::TaskUpdate {
            task_id: task.id.clone(),
            state: task.state,
            timestamp: Utc::now(),
        });
    }

    exec.store.save_tasks(&tasks)?;

    // Refresh the cycle roster so EVAL counts the reviewed states.
    let roster: Vec<Task> = tasks
        .iter()
        .filter(|t| ctx.last_tasks.iter().any(|lt| lt.id == t.id))
        .cloned()
        .collect();
    ctx.last_tasks = roster;

    info!(cycle = cycle.number, tasks_completed, "ship_check complete");
    Ok(PhaseOutcome {
        tasks_completed,
        ..PhaseOutcome::ok(phase_cost)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flywheel_core::{Artifact, ArtifactKind, AutonomyTier};

    #[test]
    fn synthesized_result_lists_artifacts() {
        let mut task = Task::new("o", "c", "Add parser", "streaming csv", AutonomyTier::T0, 5.0);
        task.artifacts.push(Artifact::new(ArtifactKind::Branch, "feat/parser"));
        task.artifacts.push(Artifact::new(ArtifactKind::Log, "ran 12 tests"));
        let text = synthesize_build_result(&task);
        assert!(text.contains("Add parser"));
        assert!(text.contains("feat/parser"));
        assert!(text.contains("ran 12 tests"));
    }

    #[test]
    fn synthesized_result_handles_empty_artifacts() {
        let task = Task::new("o", "c", "t", "d", AutonomyTier::T0, 5.0);
        assert!(synthesize_build_result(&task).contains("No artifacts"));
    }
}
