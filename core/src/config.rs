//! Engine configuration.
//!
//! One `EngineConfig` document drives the router mode, the cycle cadence,
//! per-provider enablement, and the budget caps. It is loaded from the store
//! at startup, hot-reloadable through the control surface, and defaults can
//! be overridden from the environment (`FLYWHEEL_MODE`,
//! `FLYWHEEL_COOLDOWN_MINUTES`).

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::budget::BudgetConfig;

/// Routing mode for the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineMode {
    /// Every call resolves to the mock adapter; zero spend.
    Simulation,
    /// Per-provider enable flags decide which live adapters are used.
    Selective,
    /// Registered adapters are used directly, falling back per the table.
    Live,
}

impl std::fmt::Display for EngineMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simulation => write!(f, "simulation"),
            Self::Selective => write!(f, "selective"),
            Self::Live => write!(f, "live"),
        }
    }
}

impl FromStr for EngineMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "simulation" => Ok(Self::Simulation),
            "selective" => Ok(Self::Selective),
            "live" => Ok(Self::Live),
            other => Err(format!(
                "invalid mode {other:?}, expected simulation | selective | live"
            )),
        }
    }
}

/// The model providers the router knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Gemini,
    OpenAi,
    Claude,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::OpenAi => "openai",
            Self::Claude => "claude",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gemini" => Ok(Self::Gemini),
            "openai" => Ok(Self::OpenAi),
            "claude" => Ok(Self::Claude),
            other => Err(format!("unknown provider {other:?}")),
        }
    }
}

/// Per-provider enable flags, consulted in `selective` mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderToggles {
    pub gemini: bool,
    pub openai: bool,
    pub claude: bool,
}

impl Default for ProviderToggles {
    fn default() -> Self {
        Self {
            gemini: true,
            openai: true,
            claude: true,
        }
    }
}

impl ProviderToggles {
    pub fn all_disabled() -> Self {
        Self {
            gemini: false,
            openai: false,
            claude: false,
        }
    }

    pub fn is_enabled(&self, provider: Provider) -> bool {
        match provider {
            Provider::Gemini => self.gemini,
            Provider::OpenAi => self.openai,
            Provider::Claude => self.claude,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub mode: EngineMode,
    /// Cooldown between the end of one cycle and the start of the next.
    pub cycle_cooldown_minutes: u64,
    pub providers: ProviderToggles,
    pub budgets: BudgetConfig,
    /// Directory handed to the build worker for task execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mode = std::env::var("FLYWHEEL_MODE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(EngineMode::Simulation);
        let cycle_cooldown_minutes = std::env::var("FLYWHEEL_COOLDOWN_MINUTES")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|v| *v > 0)
            .unwrap_or(30);
        Self {
            mode,
            cycle_cooldown_minutes,
            providers: ProviderToggles::default(),
            budgets: BudgetConfig::default(),
            working_dir: None,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.cycle_cooldown_minutes == 0 {
            return Err("cycle_cooldown_minutes must be > 0".to_string());
        }
        self.budgets.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parse_roundtrip() {
        for mode in [EngineMode::Simulation, EngineMode::Selective, EngineMode::Live] {
            assert_eq!(mode.to_string().parse::<EngineMode>().ok(), Some(mode));
        }
        assert!("prod".parse::<EngineMode>().is_err());
    }

    #[test]
    fn provider_parse_roundtrip() {
        for provider in [Provider::Gemini, Provider::OpenAi, Provider::Claude] {
            assert_eq!(provider.as_str().parse::<Provider>().ok(), Some(provider));
        }
        assert!("mistral".parse::<Provider>().is_err());
    }

    #[test]
    fn toggles_lookup() {
        let toggles = ProviderToggles {
            gemini: false,
            openai: true,
            claude: false,
        };
        assert!(!toggles.is_enabled(Provider::Gemini));
        assert!(toggles.is_enabled(Provider::OpenAi));
        assert!(!toggles.is_enabled(Provider::Claude));
    }

    #[test]
    fn zero_cooldown_rejected() {
        let cfg = EngineConfig {
            cycle_cooldown_minutes: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn config_serde_roundtrip() {
        let cfg = EngineConfig {
            mode: EngineMode::Selective,
            cycle_cooldown_minutes: 15,
            providers: ProviderToggles::all_disabled(),
            ..Default::default()
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let restored: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.mode, EngineMode::Selective);
        assert_eq!(restored.cycle_cooldown_minutes, 15);
        assert!(!restored.providers.is_enabled(Provider::Claude));
    }
}
