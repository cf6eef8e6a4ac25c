use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use flywheel_core::{EngineMode, EventBus, JsonStore, Provider, StateStore as _};
use flywheel_engine::adapters::openai_compat::{ModelPricing, OpenAiCompatGenerator};
use flywheel_engine::router::ModelRouter;
use flywheel_engine::Orchestrator;

/// Autonomous work-cycle engine: SCAN → PLAN → BUILD → SHIP_CHECK → EVAL.
#[derive(Debug, Parser)]
#[command(name = "flywheel", version, about)]
struct Cli {
    /// State directory for the JSON store.
    #[arg(long, default_value = ".flywheel")]
    state_dir: PathBuf,

    /// Override the configured mode (simulation | selective | live).
    #[arg(long)]
    mode: Option<EngineModeArg>,

    /// Override the cycle cooldown in minutes.
    #[arg(long)]
    cooldown_minutes: Option<u64>,
}

#[derive(Debug, Clone, clap::ValueEnum)]
enum EngineModeArg {
    Simulation,
    Selective,
    Live,
}

impl From<EngineModeArg> for EngineMode {
    fn from(arg: EngineModeArg) -> Self {
        match arg {
            EngineModeArg::Simulation => EngineMode::Simulation,
            EngineModeArg::Selective => EngineMode::Selective,
            EngineModeArg::Live => EngineMode::Live,
        }
    }
}

/// Register a live adapter for each provider whose API key is present in the
/// environment. Missing keys are fine: the router degrades to the fallback
/// chain and ultimately the mock.
fn register_live_adapters(router: &mut ModelRouter) -> Result<()> {
    let endpoints = [
        (
            Provider::Gemini,
            "GEMINI_API_KEY",
            "https://generativelanguage.googleapis.com/v1beta/openai",
            "gemini-2.5-flash",
            ModelPricing {
                input_per_1k_usd: 0.000_3,
                output_per_1k_usd: 0.002_5,
            },
        ),
        (
            Provider::OpenAi,
            "OPENAI_API_KEY",
            "https://api.openai.com/v1",
            "gpt-4o-mini",
            ModelPricing {
                input_per_1k_usd: 0.000_15,
                output_per_1k_usd: 0.000_6,
            },
        ),
        (
            Provider::Claude,
            "ANTHROPIC_API_KEY",
            "https://api.anthropic.com/v1",
            "claude-sonnet-4-20250514",
            ModelPricing {
                input_per_1k_usd: 0.003,
                output_per_1k_usd: 0.015,
            },
        ),
    ];

    for (provider, key_var, base_url, model, pricing) in endpoints {
        match std::env::var(key_var) {
            Ok(api_key) if !api_key.is_empty() => {
                let adapter =
                    OpenAiCompatGenerator::new(provider.as_str(), base_url, api_key, model, pricing)?;
                router.register_generator(provider, Arc::new(adapter));
                info!(provider = %provider, model, "registered live adapter");
            }
            _ => warn!(provider = %provider, key_var, "no API key; provider will fall back"),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let store = JsonStore::open(&cli.state_dir)?.shared();

    // Configuration: stored document, then defaults, then CLI overrides.
    let mut config = store.load_config()?.unwrap_or_default();
    if let Some(mode) = cli.mode {
        config.mode = mode.into();
    }
    if let Some(cooldown) = cli.cooldown_minutes {
        config.cycle_cooldown_minutes = cooldown;
    }
    config.validate().map_err(anyhow::Error::msg)?;
    store.save_config(&config)?;

    info!(
        state_dir = %cli.state_dir.display(),
        mode = %config.mode,
        cooldown_minutes = config.cycle_cooldown_minutes,
        "flywheel starting"
    );

    let mut router = ModelRouter::new(config.mode, config.providers);
    if config.mode != EngineMode::Simulation {
        register_live_adapters(&mut router)?;
    }

    let events = EventBus::new().shared();
    let orchestrator = Orchestrator::new(store, Arc::new(router), config, events);
    orchestrator.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    orchestrator.stop().await;
    Ok(())
}
