//! SCAN — survey the active objectives for relevant signals.
//!
//! Invokes the research adapter in JSON mode with the active objectives and
//! parses a list of findings. A response that cannot be parsed degrades to a
//! single zero-relevance sentinel finding; the phase still succeeds.

use serde_json::{json, Value};
use tracing::info;

use flywheel_core::{
    CostRecord, Cycle, Finding, Objective, Phase, Run, Scan, StateStore as _, TruthLabel,
};

use super::parse::{clamp01, coerce_scan_truth, extract_json, string_field, string_list};
use super::{CycleContext, PhaseExecutor, PhaseOutcome};
use crate::adapters::GenerationRequest;
use crate::router::Role;

const SYSTEM_PROMPT: &str = "You are a research scanner for an autonomous engineering engine. \
    Survey the given objectives and report findings as strict JSON: \
    {\"findings\": [{\"summary\", \"relevance\" (0..1), \"truth_status\" \
    (speculative|hypothesis), \"confidence\" (low|medium|high), \"sources\": []}]}.";

fn user_prompt(objectives: &[Objective]) -> String {
    let listed: Vec<Value> = objectives
        .iter()
        .map(|o| {
            json!({
                "id": o.id,
                "title": o.title,
                "description": o.description,
                "weight": o.weight,
                "acceptance_criteria": o.acceptance_criteria,
            })
        })
        .collect();
    json!({ "objectives": listed }).to_string()
}

/// Parse the adapter response into findings. Invalid JSON yields the
/// sentinel; a valid document without findings yields an empty list.
pub(super) fn parse_findings(text: &str) -> Vec<Finding> {
    let Some(value) = extract_json(text) else {
        return vec![Finding {
            summary: "scan response could not be parsed".to_string(),
            relevance: 0.0,
            truth: TruthLabel::speculative(),
            sources: Vec::new(),
        }];
    };

    value
        .get("findings")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| Finding {
                    summary: string_field(item, &["summary", "title"])
                        .unwrap_or_else(|| "(no summary)".to_string()),
                    relevance: clamp01(
                        item.get("relevance").and_then(Value::as_f64).unwrap_or(0.0),
                    ),
                    truth: coerce_scan_truth(item),
                    sources: string_list(item, "sources"),
                })
                .collect()
        })
        .unwrap_or_default()
}

pub(super) async fn run(
    exec: &PhaseExecutor,
    cycle: &Cycle,
    ctx: &mut CycleContext,
    objectives: &[Objective],
) -> PhaseOutcome {
    match run_inner(exec, cycle, ctx, objectives).await {
        Ok(outcome) => outcome,
        Err(e) => PhaseOutcome::failed(format!("scan failed: {e:#}")),
    }
}

async fn run_inner(
    exec: &PhaseExecutor,
    cycle: &Cycle,
    ctx: &mut CycleContext,
    objectives: &[Objective],
) -> anyhow::Result<PhaseOutcome> {
    let routed = exec.router.adapter_for(Role::Research);
    let request = GenerationRequest::json(SYSTEM_PROMPT, user_prompt(objectives));

    let mut run = Run::new(cycle.id.clone(), Phase::Scan, &routed.provider);
    run.model = routed.adapter.model().to_string();
    run.prompt = request.user_prompt.clone();

    let response = match routed.adapter.generate(request).await {
        Ok(response) => response,
        Err(e) => {
            run.error = Some(e.to_string());
            exec.store.append_run(&run)?;
            anyhow::bail!("research adapter error: {e}");
        }
    };

    let findings = parse_findings(&response.text);
    let mut scan = Scan::new(cycle.id.clone(), objectives.iter().map(|o| o.id.clone()).collect());
    scan.findings = findings;
    scan.cost_usd = response.cost_usd;
    scan.tokens = response.input_tokens + response.output_tokens;
    scan.latency_ms = response.latency_ms;

    run.response = Some(response.text);
    run.success = true;
    run.tokens = scan.tokens;
    run.cost_usd = response.cost_usd;
    run.latency_ms = response.latency_ms;
    exec.store.append_run(&run)?;
    exec.store.append_scan(&scan)?;

    exec.charge(CostRecord {
        timestamp: chrono::Utc::now(),
        phase: Phase::Scan,
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
        findings = scan.findings.len(),
        provider = %routed.provider,
        cost_usd = response.cost_usd,
        "scan complete"
    );
    ctx.last_scan = Some(scan);
    Ok(PhaseOutcome::ok(response.cost_usd))
}
