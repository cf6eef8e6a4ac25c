//! Adapter seams the engine consumes.
//!
//! The core never talks to a concrete model backend. It sees two
//! capabilities:
//!
//! - [`TextGenerator`] — prompt in, text out, with token/cost/latency
//!   accounting. Used by SCAN, PLAN, and EVAL.
//! - [`BuildWorker`] — executes a task against a working directory and
//!   reviews the result. Used by BUILD and SHIP_CHECK.
//!
//! Adapters must report the cost they actually incurred; mocks report zero.
//! Retries and timeouts are the adapter's concern — the engine treats an
//! error as a failed phase and moves on.

pub mod mock;
pub mod openai_compat;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use flywheel_core::{Artifact, Task};

pub use mock::{MockGenerator, MockWorker};
pub use openai_compat::OpenAiCompatGenerator;

/// One text-generation request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system_prompt: Option<String>,
    pub user_prompt: String,
    /// Ask the backend for a strict-JSON response.
    pub json_mode: bool,
}

impl GenerationRequest {
    pub fn json(system_prompt: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: Some(system_prompt.into()),
            user_prompt: user_prompt.into(),
            json_mode: true,
        }
    }
}

/// Outcome of one text-generation call.
#[derive(Debug, Clone)]
pub struct GenerationResponse {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub latency_ms: u64,
    pub cost_usd: f64,
}

/// Text-generation capability.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Provider name as used in routing and cost records.
    fn provider(&self) -> &str;

    /// Model identifier as used in cost records.
    fn model(&self) -> &str;

    async fn generate(&self, request: GenerationRequest) -> anyhow::Result<GenerationResponse>;
}

/// Instruction handed to the build worker for one task.
#[derive(Debug, Clone)]
pub struct WorkOrder {
    pub instruction: String,
    pub working_dir: PathBuf,
    pub context: Option<String>,
}

/// Outcome of one worker execution.
#[derive(Debug, Clone)]
pub struct WorkerOutcome {
    pub output: String,
    pub success: bool,
    pub error: Option<String>,
    pub artifacts: Vec<Artifact>,
    pub latency_ms: u64,
    pub cost_usd: f64,
}

/// Outcome of one review check.
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub approved: bool,
    pub issues: Vec<String>,
    pub summary: String,
    pub latency_ms: u64,
    pub cost_usd: f64,
}

/// Build-and-review capability.
#[async_trait]
pub trait BuildWorker: Send + Sync {
    fn provider(&self) -> &str;

    /// Execute a task's instruction against the working directory.
    async fn execute(&self, order: WorkOrder) -> anyhow::Result<WorkerOutcome>;

    /// Review a finished build for a task.
    async fn check(&self, task: &Task, build_result: &str) -> anyhow::Result<CheckOutcome>;
}

pub type SharedGenerator = Arc<dyn TextGenerator>;
pub type SharedWorker = Arc<dyn BuildWorker>;
