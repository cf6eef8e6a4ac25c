//! Role-and-mode provider routing.
//!
//! Each phase asks for a backend by *role*; the router resolves the role to
//! a provider through a static assignment table and the current mode:
//!
//! | Role      | Primary | Fallback |
//! |-----------|---------|----------|
//! | research  | gemini  | openai   |
//! | planning  | openai  | gemini   |
//! | building  | claude  | —        |
//! | reviewing | claude  | openai   |
//!
//! - `simulation` — every call gets the mock, registrations ignored.
//! - `selective` — a provider is eligible only if enabled *and* registered.
//! - `live` — a provider is eligible if registered.
//!
//! The chain always terminates: primary, then fallback, then mock. Mode and
//! toggles are hot-swappable via [`ModelRouter::update_config`] without
//! invalidating registered adapters.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use flywheel_core::{EngineMode, Provider, ProviderToggles};

use crate::adapters::{MockGenerator, MockWorker, SharedGenerator, SharedWorker};

/// Abstract capability used to select a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Research,
    Planning,
    Building,
    Reviewing,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Research => "research",
            Self::Planning => "planning",
            Self::Building => "building",
            Self::Reviewing => "reviewing",
        };
        write!(f, "{s}")
    }
}

/// Static primary/fallback assignment for a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub primary: Provider,
    pub fallback: Option<Provider>,
}

/// The fixed role→provider table.
pub fn assignment(role: Role) -> RoleAssignment {
    match role {
        Role::Research => RoleAssignment {
            primary: Provider::Gemini,
            fallback: Some(Provider::OpenAi),
        },
        Role::Planning => RoleAssignment {
            primary: Provider::OpenAi,
            fallback: Some(Provider::Gemini),
        },
        Role::Building => RoleAssignment {
            primary: Provider::Claude,
            fallback: None,
        },
        Role::Reviewing => RoleAssignment {
            primary: Provider::Claude,
            fallback: Some(Provider::OpenAi),
        },
    }
}

/// A resolved text-generation backend.
#[derive(Clone)]
pub struct RoutedGenerator {
    pub adapter: SharedGenerator,
    pub provider: String,
    pub is_mock: bool,
}

/// A resolved build worker.
#[derive(Clone)]
pub struct RoutedWorker {
    pub worker: SharedWorker,
    pub provider: String,
    pub is_mock: bool,
}

struct RouterConfig {
    mode: EngineMode,
    toggles: ProviderToggles,
}

/// Chooses backends for roles under the current mode.
pub struct ModelRouter {
    config: RwLock<RouterConfig>,
    generators: HashMap<Provider, SharedGenerator>,
    workers: HashMap<Provider, SharedWorker>,
    mock_generator: SharedGenerator,
    mock_worker: SharedWorker,
}

impl ModelRouter {
    pub fn new(mode: EngineMode, toggles: ProviderToggles) -> Self {
        Self {
            config: RwLock::new(RouterConfig { mode, toggles }),
            generators: HashMap::new(),
            workers: HashMap::new(),
            mock_generator: Arc::new(MockGenerator::new()),
            mock_worker: Arc::new(MockWorker::new()),
        }
    }

    /// Register a live text generator for a provider. Registration happens
    /// once at startup, before the router is shared.
    pub fn register_generator(&mut self, provider: Provider, adapter: SharedGenerator) {
        self.generators.insert(provider, adapter);
    }

    /// Register a live build worker for a provider.
    pub fn register_worker(&mut self, provider: Provider, worker: SharedWorker) {
        self.workers.insert(provider, worker);
    }

    /// Swap the effective mode and toggles. Registered adapters survive.
    pub fn update_config(&self, mode: EngineMode, toggles: ProviderToggles) {
        let mut cfg = self.config.write().unwrap_or_else(|e| e.into_inner());
        cfg.mode = mode;
        cfg.toggles = toggles;
    }

    pub fn mode(&self) -> EngineMode {
        self.config.read().unwrap_or_else(|e| e.into_inner()).mode
    }

    /// Expose the static table for debugging.
    pub fn assignment(&self, role: Role) -> RoleAssignment {
        assignment(role)
    }

    /// Whether `provider` may serve under the current mode.
    fn eligible(&self, provider: Provider, registered: bool) -> bool {
        let cfg = self.config.read().unwrap_or_else(|e| e.into_inner());
        match cfg.mode {
            EngineMode::Simulation => false,
            EngineMode::Selective => registered && cfg.toggles.is_enabled(provider),
            EngineMode::Live => registered,
        }
    }

    /// Resolve the text-generation backend for a role.
    pub fn adapter_for(&self, role: Role) -> RoutedGenerator {
        let table = assignment(role);

        for candidate in std::iter::once(table.primary).chain(table.fallback) {
            if self.eligible(candidate, self.generators.contains_key(&candidate)) {
                if let Some(adapter) = self.generators.get(&candidate) {
                    return RoutedGenerator {
                        adapter: Arc::clone(adapter),
                        provider: candidate.as_str().to_string(),
                        is_mock: false,
                    };
                }
            }
        }

        tracing::debug!(role = %role, "routing to mock generator");
        RoutedGenerator {
            adapter: Arc::clone(&self.mock_generator),
            provider: self.mock_generator.provider().to_string(),
            is_mock: true,
        }
    }

    /// Resolve the build worker. Single provider (`claude`), same mode
    /// semantics as [`adapter_for`](Self::adapter_for).
    pub fn build_worker(&self) -> RoutedWorker {
        let provider = Provider::Claude;
        if self.eligible(provider, self.workers.contains_key(&provider)) {
            if let Some(worker) = self.workers.get(&provider) {
                return RoutedWorker {
                    worker: Arc::clone(worker),
                    provider: provider.as_str().to_string(),
                    is_mock: false,
                };
            }
        }

        RoutedWorker {
            worker: Arc::clone(&self.mock_worker),
            provider: self.mock_worker.provider().to_string(),
            is_mock: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator(provider: Provider) -> SharedGenerator {
        Arc::new(MockGenerator::scripted(provider.as_str(), Vec::new()))
    }

    fn fully_registered(mode: EngineMode, toggles: ProviderToggles) -> ModelRouter {
        let mut router = ModelRouter::new(mode, toggles);
        for provider in [Provider::Gemini, Provider::OpenAi, Provider::Claude] {
            router.register_generator(provider, generator(provider));
        }
        router.register_worker(
            Provider::Claude,
            Arc::new(MockWorker::new().with_provider("claude")),
        );
        router
    }

    #[test]
    fn simulation_always_routes_to_mock() {
        let router = fully_registered(EngineMode::Simulation, ProviderToggles::default());
        for role in [Role::Research, Role::Planning, Role::Building, Role::Reviewing] {
            let routed = router.adapter_for(role);
            assert!(routed.is_mock, "{role}");
            assert_eq!(routed.provider, "mock");
        }
        assert!(router.build_worker().is_mock);
    }

    #[test]
    fn live_prefers_primary() {
        let router = fully_registered(EngineMode::Live, ProviderToggles::all_disabled());
        // Toggles are ignored in live mode.
        assert_eq!(router.adapter_for(Role::Research).provider, "gemini");
        assert_eq!(router.adapter_for(Role::Planning).provider, "openai");
        assert_eq!(router.adapter_for(Role::Building).provider, "claude");
        assert_eq!(router.adapter_for(Role::Reviewing).provider, "claude");
        assert_eq!(router.build_worker().provider, "claude");
    }

    #[test]
    fn live_falls_back_when_primary_unregistered() {
        let mut router = ModelRouter::new(EngineMode::Live, ProviderToggles::default());
        router.register_generator(Provider::OpenAi, generator(Provider::OpenAi));
        // research: primary gemini unregistered → fallback openai
        let routed = router.adapter_for(Role::Research);
        assert_eq!(routed.provider, "openai");
        assert!(!routed.is_mock);
        // building: claude unregistered, no fallback → mock
        let routed = router.adapter_for(Role::Building);
        assert!(routed.is_mock);
    }

    #[test]
    fn selective_honors_enable_flags() {
        // Scenario: only openai enabled.
        let toggles = ProviderToggles {
            gemini: false,
            openai: true,
            claude: false,
        };
        let router = fully_registered(EngineMode::Selective, toggles);

        // research: primary gemini disabled → fallback openai enabled
        let routed = router.adapter_for(Role::Research);
        assert_eq!(routed.provider, "openai");
        assert!(!routed.is_mock);

        // building: claude disabled, no fallback → mock
        let routed = router.adapter_for(Role::Building);
        assert!(routed.is_mock);
        assert!(router.build_worker().is_mock);
    }

    #[test]
    fn selective_requires_registration_too() {
        let toggles = ProviderToggles::default();
        let mut router = ModelRouter::new(EngineMode::Selective, toggles);
        router.register_generator(Provider::Gemini, generator(Provider::Gemini));
        // planning: openai enabled but unregistered → fallback gemini
        assert_eq!(router.adapter_for(Role::Planning).provider, "gemini");
    }

    #[test]
    fn update_config_swaps_mode_without_losing_registrations() {
        let router = fully_registered(EngineMode::Simulation, ProviderToggles::default());
        assert!(router.adapter_for(Role::Planning).is_mock);

        router.update_config(EngineMode::Live, ProviderToggles::default());
        let routed = router.adapter_for(Role::Planning);
        assert_eq!(routed.provider, "openai");
        assert!(!routed.is_mock);
        assert_eq!(router.mode(), EngineMode::Live);
    }

    #[test]
    fn assignment_table_is_fixed() {
        let router = ModelRouter::new(EngineMode::Live, ProviderToggles::default());
        let research = router.assignment(Role::Research);
        assert_eq!(research.primary, Provider::Gemini);
        assert_eq!(research.fallback, Some(Provider::OpenAi));
        let building = router.assignment(Role::Building);
        assert_eq!(building.primary, Provider::Claude);
        assert_eq!(building.fallback, None);
    }
}
