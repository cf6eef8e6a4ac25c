//! BUILD — turn proposed tasks into executed (or approval-parked) tasks.
//!
//! For each proposed task the tier resolver decides autonomy. T2 tasks are
//! created in `awaiting_approval` and the worker is never invoked for them;
//! the rest are executed immediately. A worker failure fails that task, not
//! the phase.

use chrono::Utc;
use tracing::info;

use flywheel_core::{
    AutonomyTier, CostRecord, Cycle, EngineEvent, Phase, Run, StateStore as _, Task, TaskState,
};

use super::{CycleContext, PhaseExecutor, PhaseOutcome};
use crate::adapters::WorkOrder;

pub(super) async fn run(
    exec: &PhaseExecutor,
    cycle: &Cycle,
    ctx: &mut CycleContext,
) -> PhaseOutcome {
    let Some(plan) = ctx.last_plan.clone() else {
        return PhaseOutcome::failed("no plan available for building");
    };
    match run_inner(exec, cycle, ctx, plan).await {
        Ok(outcome) => outcome,
        Err(e) => PhaseOutcome::failed(format!("build failed: {e:#}")),
    }
}

async fn run_inner(
    exec: &PhaseExecutor,
    cycle: &Cycle,
    ctx: &mut CycleContext,
    plan: flywheel_core::Plan,
) -> anyhow::Result<PhaseOutcome> {
    let routed = exec.router.build_worker();
    let per_task_cap = exec.guard.config().per_task_usd;

    let mut new_tasks: Vec<Task> = Vec::new();
    let mut phase_cost = 0.0;

    for priority in &plan.strategy.priorities {
        for proposed in &priority.proposed_tasks {
            let tier = exec.tier_policy.resolve(
                &proposed.title,
                &proposed.description,
                Some(proposed.suggested_tier),
            );
            let mut task = Task::new(
                priority.objective_id.clone(),
                cycle.id.clone(),
                proposed.title.clone(),
                proposed.description.clone(),
                tier,
                per_task_cap,
            );

            if tier == AutonomyTier::T2 {
                // Hard gate: park for a human, never touch the worker.
                task.state = TaskState::AwaitingApproval;
                task.touch();
                info!(task_id = %task.id, title = %task.title, "task requires approval");
                exec.events.publish(EngineEvent::ApprovalRequired {
                    task_id: task.id.clone(),
                    title: task.title.clone(),
                    tier,
                    timestamp: Utc::now(),
                });
                exec.events.publish(EngineEvent::TaskUpdate {
                    task_id: task.id.clone(),
                    state: task.state,
                    timestamp: Utc::now(),
                });
                new_tasks.push(task);
                continue;
            }

            let order = WorkOrder {
                instruction: format!("{}\n\n{}", proposed.title, proposed.description),
                working_dir: exec.working_dir.clone(),
                context: Some(plan.strategy.summary.clone()),
            };

            let mut run = Run::new(cycle.id.clone(), Phase::Build, &routed.provider);
            run.task_id = Some(task.id.clone());
            run.model = "build-worker".to_string();
            run.prompt = order.instruction.clone();

            match routed.worker.execute(order).await {
                Ok(outcome) => {
                    task.actual_cost_usd = outcome.cost_usd;
                    phase_cost += outcome.cost_usd;
                    run.success = outcome.success;
                    run.response = Some(outcome.output);
                    run.cost_usd = outcome.cost_usd;
                    run.latency_ms = outcome.latency_ms;

                    if outcome.success {
                        task.state = TaskState::Reviewing;
                        task.artifacts = outcome.artifacts;
                        task.touch();
                    } else {
                        let error = outcome
                            .error
                            .unwrap_or_else(|| "worker execution failed".to_string());
                        run.error = Some(error.clone());
                        task.fail(error);
                    }

                    exec.charge(CostRecord {
                        timestamp: Utc::now(),
                        phase: Phase::Build,
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
                    let error = format!("worker error: {e}");
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
            new_tasks.push(task);
        }
    }

    let tasks_created = new_tasks.len() as u32;
    let mut tasks = exec.store.load_tasks()?;
    tasks.extend(new_tasks.iter().cloned());
    exec.store.save_tasks(&tasks)?;

    info!(
        cycle = cycle.number,
        tasks_created,
        awaiting_approval = new_tasks
            .iter()
            .filter(|t| t.state == TaskState::AwaitingApproval)
            .count(),
        "build complete"
    );

    ctx.last_tasks = new_tasks;
    Ok(PhaseOutcome {
        tasks_created,
        ..PhaseOutcome::ok(phase_cost)
    })
}
