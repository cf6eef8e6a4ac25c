//! EVAL — close the loop on the cycle.
//!
//! Feeds the cycle summary and task roster to the planning adapter and
//! parses metrics, insights, and recommendations. The model's opinion of
//! `tasks_completed`, `tasks_failed`, and `total_cost_usd` is discarded in
//! favor of the engine's own counts. High-priority recommendations are
//! captured as experiment-log hypotheses for later cycles. Resets the
//! inter-phase context.

use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;

use flywheel_core::{
    CostRecord, Cycle, EvalMetrics, EvalPeriod, Evaluation, ExperimentLogEntry, Objective, Phase,
    Recommendation, RecommendationPriority, Run, StateStore as _, TaskState,
};

use super::parse::{clamp01, coerce_priority, coerce_truth, extract_json, string_field};
use super::{CycleContext, PhaseExecutor, PhaseOutcome};
use crate::adapters::GenerationRequest;
use crate::router::Role;

const SYSTEM_PROMPT: &str = "You are evaluating one cycle of an autonomous engineering engine. \
    Respond with strict JSON: {\"metrics\": {\"avg_task_latency_ms\", \
    \"objective_progress\": {objective_id: 0..1}}, \"insights\": [..], \
    \"recommendations\": [{\"summary\", \"priority\" (low|medium|high)}]}.";

fn user_prompt(cycle: &Cycle, ctx: &CycleContext) -> String {
    let roster: Vec<Value> = ctx
        .last_tasks
        .iter()
        .map(|t| {
            json!({
                "title": t.title,
                "state": t.state.to_string(),
                "tier": t.autonomy_tier.to_string(),
                "cost_usd": t.actual_cost_usd,
            })
        })
        .collect();
    json!({
        "cycle_number": cycle.number,
        "mode": cycle.mode.to_string(),
        "total_cost_usd": cycle.total_cost_usd,
        "tasks": roster,
    })
    .to_string()
}

pub(super) struct ParsedEvaluation {
    pub metrics: EvalMetrics,
    pub insights: Vec<String>,
    pub recommendations: Vec<Recommendation>,
}

/// Parse the evaluator response; every field degrades independently.
pub(super) fn parse_evaluation(text: &str) -> ParsedEvaluation {
    let value = extract_json(text).unwrap_or_else(|| json!({}));

    let metrics_value = value.get("metrics").cloned().unwrap_or_else(|| json!({}));
    let objective_progress = metrics_value
        .get("objective_progress")
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .map(|(k, v)| (k.clone(), clamp01(v.as_f64().unwrap_or(0.0))))
                .collect()
        })
        .unwrap_or_default();
    let metrics = EvalMetrics {
        avg_task_latency_ms: metrics_value
            .get("avg_task_latency_ms")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        objective_progress,
        // Overridden below with authoritative counts.
        ..EvalMetrics::default()
    };

    let insights = value
        .get("insights")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let recommendations = value
        .get("recommendations")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let summary = string_field(item, &["summary", "title"])?;
                    Some(Recommendation {
                        summary,
                        priority: coerce_priority(item.get("priority")),
                        truth: coerce_truth(item),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    ParsedEvaluation {
        metrics,
        insights,
        recommendations,
    }
}

pub(super) async fn run(
    exec: &PhaseExecutor,
    cycle: &Cycle,
    ctx: &mut CycleContext,
    objectives: &[Objective],
) -> PhaseOutcome {
    match run_inner(exec, cycle, ctx, objectives).await {
        Ok(outcome) => outcome,
        Err(e) => PhaseOutcome::failed(format!("eval failed: {e:#}")),
    }
}

async fn run_inner(
    exec: &PhaseExecutor,
    cycle: &Cycle,
    ctx: &mut CycleContext,
    _objectives: &[Objective],
) -> anyhow::Result<PhaseOutcome> {
    let routed = exec.router.adapter_for(Role::Planning);
    let request = GenerationRequest::json(SYSTEM_PROMPT, user_prompt(cycle, ctx));

    let mut run = Run::new(cycle.id.clone(), Phase::Eval, &routed.provider);
    run.model = routed.adapter.model().to_string();
    run.prompt = request.user_prompt.clone();

    let response = match routed.adapter.generate(request).await {
        Ok(response) => response,
        Err(e) => {
            run.error = Some(e.to_string());
            exec.store.append_run(&run)?;
            anyhow::bail!("evaluation adapter error: {e}");
        }
    };

    let mut parsed = parse_evaluation(&response.text);

    // The model's self-reported counts are advisory at best; override with
    // what this cycle actually did.
    parsed.metrics.tasks_completed = ctx
        .last_tasks
        .iter()
        .filter(|t| t.state == TaskState::Completed)
        .count() as u32;
    parsed.metrics.tasks_failed = ctx
        .last_tasks
        .iter()
        .filter(|t| t.state == TaskState::Failed)
        .count() as u32;
    parsed.metrics.total_cost_usd = cycle.total_cost_usd + response.cost_usd;

    let evaluation = Evaluation {
        id: uuid::Uuid::new_v4().to_string(),
        cycle_id: cycle.id.clone(),
        period: EvalPeriod {
            start: cycle.started_at,
            end: Utc::now(),
        },
        metrics: parsed.metrics,
        insights: parsed.insights,
        recommendations: parsed.recommendations,
        cost_usd: response.cost_usd,
        created_at: Utc::now(),
    };

    run.response = Some(response.text);
    run.success = true;
    run.tokens = response.input_tokens + response.output_tokens;
    run.cost_usd = response.cost_usd;
    run.latency_ms = response.latency_ms;
    exec.store.append_run(&run)?;
    exec.store.append_evaluation(&evaluation)?;

    // High-priority recommendations become hypotheses to test next cycle.
    for rec in &evaluation.recommendations {
        if rec.priority == RecommendationPriority::High {
            let entry = ExperimentLogEntry::new(
                cycle.id.clone(),
                format!("cycle-{} recommendation", cycle.number),
                rec.summary.clone(),
            );
            exec.store.append_experiment(&entry)?;
        }
    }

    exec.charge(CostRecord {
        timestamp: Utc::now(),
        phase: Phase::Eval,
        task_id: None,
        provider: routed.provider.clone(),
        model: run.model.clone(),
        input_tokens: response.input_tokens,
        output_tokens: response.output_tokens,
        cost_usd: response.cost_usd,
        latency_ms: response.latency_ms,
    });

    info!(
        cycle = cycle.number,
        tasks_completed = evaluation.metrics.tasks_completed,
        tasks_failed = evaluation.metrics.tasks_failed,
        total_cost_usd = evaluation.metrics.total_cost_usd,
        "eval complete"
    );

    ctx.reset();
    Ok(PhaseOutcome::ok(response.cost_usd))
}
