//! Mock adapters.
//!
//! Used as the universal fallback by the router (and exclusively in
//! simulation mode). The default mock returns an empty JSON object, which
//! every phase parser degrades gracefully on; scripted variants replay a
//! fixed sequence of responses for tests.
//!
//! Mocks report zero cost and zero tokens.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use flywheel_core::{Artifact, ArtifactKind, Task};

use super::{
    BuildWorker, CheckOutcome, GenerationRequest, GenerationResponse, TextGenerator, WorkOrder,
    WorkerOutcome,
};

/// The provider name mocks report.
pub const MOCK_PROVIDER: &str = "mock";

/// Mock text generator.
pub struct MockGenerator {
    provider: String,
    model: String,
    scripted: Mutex<VecDeque<String>>,
}

impl MockGenerator {
    /// Default mock: answers `{}` to everything.
    pub fn new() -> Self {
        Self {
            provider: MOCK_PROVIDER.to_string(),
            model: "mock-model".to_string(),
            scripted: Mutex::new(VecDeque::new()),
        }
    }

    /// Mock masquerading as a given provider, replaying `responses` in order
    /// and falling back to `{}` once exhausted.
    pub fn scripted(provider: impl Into<String>, responses: Vec<String>) -> Self {
        Self {
            provider: provider.into(),
            model: "scripted-model".to_string(),
            scripted: Mutex::new(responses.into()),
        }
    }
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextGenerator for MockGenerator {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, _request: GenerationRequest) -> anyhow::Result<GenerationResponse> {
        let text = self
            .scripted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| "{}".to_string());
        Ok(GenerationResponse {
            text,
            input_tokens: 0,
            output_tokens: 0,
            latency_ms: 0,
            cost_usd: 0.0,
        })
    }
}

/// Behavior of the mock worker on `execute`.
enum WorkerScript {
    Succeed,
    Fail(String),
}

/// Mock build worker.
///
/// Counts invocations so tests can assert the worker was (or was not)
/// called, e.g. for T2 approval diversion.
pub struct MockWorker {
    provider: String,
    script: WorkerScript,
    reject_with: Option<Vec<String>>,
    executions: Mutex<u32>,
    checks: Mutex<u32>,
}

impl MockWorker {
    /// Worker that succeeds and reports one log artifact per execution.
    pub fn new() -> Self {
        Self {
            provider: MOCK_PROVIDER.to_string(),
            script: WorkerScript::Succeed,
            reject_with: None,
            executions: Mutex::new(0),
            checks: Mutex::new(0),
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    /// Worker whose executions fail with the given error.
    pub fn failing(error: impl Into<String>) -> Self {
        Self {
            script: WorkerScript::Fail(error.into()),
            ..Self::new()
        }
    }

    /// Worker whose checks reject with the given issues.
    pub fn rejecting(issues: Vec<String>) -> Self {
        Self {
            reject_with: Some(issues),
            ..Self::new()
        }
    }

    pub fn execution_count(&self) -> u32 {
        *self.executions.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn check_count(&self) -> u32 {
        *self.checks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MockWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BuildWorker for MockWorker {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn execute(&self, order: WorkOrder) -> anyhow::Result<WorkerOutcome> {
        *self.executions.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        match &self.script {
            WorkerScript::Succeed => Ok(WorkerOutcome {
                output: format!("executed: {}", order.instruction.lines().next().unwrap_or("")),
                success: true,
                error: None,
                artifacts: vec![Artifact::new(ArtifactKind::Log, "mock execution log")],
                latency_ms: 0,
                cost_usd: 0.0,
            }),
            WorkerScript::Fail(error) => Ok(WorkerOutcome {
                output: String::new(),
                success: false,
                error: Some(error.clone()),
                artifacts: Vec::new(),
                latency_ms: 0,
                cost_usd: 0.0,
            }),
        }
    }

    async fn check(&self, task: &Task, _build_result: &str) -> anyhow::Result<CheckOutcome> {
        *self.checks.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        match &self.reject_with {
            None => Ok(CheckOutcome {
                approved: true,
                issues: Vec::new(),
                summary: format!("approved: {}", task.title),
                latency_ms: 0,
                cost_usd: 0.0,
            }),
            Some(issues) => Ok(CheckOutcome {
                approved: false,
                issues: issues.clone(),
                summary: format!("rejected: {}", task.title),
                latency_ms: 0,
                cost_usd: 0.0,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flywheel_core::AutonomyTier;

    #[tokio::test]
    async fn default_mock_answers_empty_object() {
        let generator = MockGenerator::new();
        let response = generator
            .generate(GenerationRequest::json("sys", "user"))
            .await
            .unwrap();
        assert_eq!(response.text, "{}");
        assert_eq!(response.cost_usd, 0.0);
        assert_eq!(generator.provider(), MOCK_PROVIDER);
    }

    #[tokio::test]
    async fn scripted_mock_replays_then_falls_back() {
        let generator = MockGenerator::scripted("openai", vec!["one".into(), "two".into()]);
        assert_eq!(generator.provider(), "openai");
        let first = generator
            .generate(GenerationRequest::json("", ""))
            .await
            .unwrap();
        assert_eq!(first.text, "one");
        let second = generator
            .generate(GenerationRequest::json("", ""))
            .await
            .unwrap();
        assert_eq!(second.text, "two");
        let third = generator
            .generate(GenerationRequest::json("", ""))
            .await
            .unwrap();
        assert_eq!(third.text, "{}");
    }

    #[tokio::test]
    async fn worker_counts_invocations() {
        let worker = MockWorker::new();
        let order = WorkOrder {
            instruction: "do the thing".into(),
            working_dir: ".".into(),
            context: None,
        };
        let outcome = worker.execute(order).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.artifacts.len(), 1);
        assert_eq!(worker.execution_count(), 1);
        assert_eq!(worker.check_count(), 0);
    }

    #[tokio::test]
    async fn failing_and_rejecting_scripts() {
        let failing = MockWorker::failing("disk full");
        let outcome = failing
            .execute(WorkOrder {
                instruction: "x".into(),
                working_dir: ".".into(),
                context: None,
            })
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("disk full"));

        let rejecting = MockWorker::rejecting(vec!["missing tests".into()]);
        let task = Task::new("o", "c", "t", "d", AutonomyTier::T0, 1.0);
        let check = rejecting.check(&task, "build ok").await.unwrap();
        assert!(!check.approved);
        assert_eq!(check.issues, vec!["missing tests".to_string()]);
    }
}
