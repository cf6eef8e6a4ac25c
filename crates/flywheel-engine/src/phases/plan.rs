//! PLAN — turn scan findings into a prioritized strategy.
//!
//! Requires a scan from earlier in the same cycle. Each parsed priority must
//! reference a known active objective; unknown references fall back to the
//! first active objective. Proposed-task bounds (≤5 per priority, ≤10 total)
//! are advisory and only logged when exceeded.

use serde_json::{json, Value};
use tracing::{info, warn};

use flywheel_core::{
    CostRecord, Cycle, Objective, Phase, Plan, Priority, ProposedTask, Run, StateStore as _,
    Strategy,
};

use super::parse::{coerce_complexity, coerce_tier, extract_json, string_field};
use super::{CycleContext, PhaseExecutor, PhaseOutcome};
use crate::adapters::GenerationRequest;
use crate::router::Role;

const SYSTEM_PROMPT: &str = "You are a planner for an autonomous engineering engine. \
    Given findings and objectives, respond with strict JSON: \
    {\"strategy\": {\"summary\", \"priorities\": [{\"objective_id\", \"rationale\", \
    \"proposed_tasks\": [{\"title\", \"description\", \"estimated_complexity\" \
    (trivial|small|medium|large), \"suggested_tier\" (0|1|2)}]}]}}. \
    Propose at most 5 tasks per priority and at most 10 in total.";

const MAX_TASKS_PER_PRIORITY: usize = 5;
const MAX_TASKS_TOTAL: usize = 10;

fn user_prompt(ctx: &CycleContext, objectives: &[Objective]) -> String {
    let findings: Vec<Value> = ctx
        .last_scan
        .as_ref()
        .map(|scan| {
            scan.findings
                .iter()
                .map(|f| json!({ "summary": f.summary, "relevance": f.relevance }))
                .collect()
        })
        .unwrap_or_default();
    let objectives: Vec<Value> = objectives
        .iter()
        .map(|o| json!({ "id": o.id, "title": o.title, "weight": o.weight }))
        .collect();
    json!({ "findings": findings, "objectives": objectives }).to_string()
}

/// Parse the planner response. Unknown objective references fall back to the
/// first active objective; total parse failure yields an empty strategy.
pub(super) fn parse_strategy(text: &str, objectives: &[Objective]) -> Strategy {
    let Some(value) = extract_json(text) else {
        return Strategy {
            summary: "plan response could not be parsed".to_string(),
            priorities: Vec::new(),
        };
    };
    let strategy = value.get("strategy").unwrap_or(&value);

    let summary = string_field(strategy, &["summary"]).unwrap_or_default();
    let priorities = strategy
        .get("priorities")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| parse_priority(item, objectives))
                .collect()
        })
        .unwrap_or_default();

    Strategy { summary, priorities }
}

fn parse_priority(value: &Value, objectives: &[Objective]) -> Option<Priority> {
    let requested = string_field(value, &["objective_id", "objectiveId"]);
    let objective_id = match requested {
        Some(id) if objectives.iter().any(|o| o.id == id) => id,
        other => {
            let fallback = objectives.first()?.id.clone();
            if let Some(unknown) = other {
                warn!(requested = %unknown, fallback = %fallback, "priority references unknown objective");
            }
            fallback
        }
    };

    let proposed_tasks = value
        .get("proposed_tasks")
        .or_else(|| value.get("proposedTasks"))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let title = string_field(item, &["title"])?;
                    Some(ProposedTask {
                        title,
                        description: string_field(item, &["description"]).unwrap_or_default(),
                        estimated_complexity: coerce_complexity(
                            item.get("estimated_complexity")
                                .or_else(|| item.get("estimatedComplexity")),
                        ),
                        suggested_tier: coerce_tier(
                            item.get("suggested_tier").or_else(|| item.get("suggestedTier")),
                        ),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Some(Priority {
        objective_id,
        rationale: string_field(value, &["rationale"]).unwrap_or_default(),
        proposed_tasks,
    })
}

pub(super) async fn run(
    exec: &PhaseExecutor,
    cycle: &Cycle,
    ctx: &mut CycleContext,
    objectives: &[Objective],
) -> PhaseOutcome {
    if ctx.last_scan.is_none() {
        return PhaseOutcome::failed("no scan available for planning");
    }
    match run_inner(exec, cycle, ctx, objectives).await {
        Ok(outcome) => outcome,
        Err(e) => PhaseOutcome::failed(format!("plan failed: {e:#}")),
    }
}

async fn run_inner(
    exec: &PhaseExecutor,
    cycle: &Cycle,
    ctx: &mut CycleContext,
    objectives: &[Objective],
) -> anyhow::Result<PhaseOutcome> {
    let routed = exec.router.adapter_for(Role::Planning);
    let request = GenerationRequest::json(SYSTEM_PROMPT, user_prompt(ctx, objectives));

    let mut run = Run::new(cycle.id.clone(), Phase::Plan, &routed.provider);
    run.model = routed.adapter.model().to_string();
    run.prompt = request.user_prompt.clone();

    let response = match routed.adapter.generate(request).await {
        Ok(response) => response,
        Err(e) => {
            run.error = Some(e.to_string());
            exec.store.append_run(&run)?;
            anyhow::bail!("planning adapter error: {e}");
        }
    };

    let strategy = parse_strategy(&response.text, objectives);

    let total_proposed: usize = strategy
        .priorities
        .iter()
        .map(|p| p.proposed_tasks.len())
        .sum();
    if total_proposed > MAX_TASKS_TOTAL
        || strategy
            .priorities
            .iter()
            .any(|p| p.proposed_tasks.len() > MAX_TASKS_PER_PRIORITY)
    {
        warn!(total_proposed, "planner exceeded advisory task bounds");
    }

    let scan_id = ctx
        .last_scan
        .as_ref()
        .map(|s| s.id.clone())
        .unwrap_or_default();
    let mut plan = Plan::new(cycle.id.clone(), scan_id, strategy);
    plan.cost_usd = response.cost_usd;
    plan.tokens = response.input_tokens + response.output_tokens;
    plan.latency_ms = response.latency_ms;

    run.response = Some(response.text);
    run.success = true;
    run.tokens = plan.tokens;
    run.cost_usd = response.cost_usd;
    run.latency_ms = response.latency_ms;
    exec.store.append_run(&run)?;
    exec.store.append_plan(&plan)?;

    exec.charge(CostRecord {
        timestamp: chrono::Utc::now(),
        phase: Phase::Plan,
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
        priorities = plan.strategy.priorities.len(),
        proposed_tasks = total_proposed,
        provider = %routed.provider,
        "plan complete"
    );
    ctx.last_plan = Some(plan);
    Ok(PhaseOutcome::ok(response.cost_usd))
}
