//! Autonomy-tier resolution — keyword policy for task risk classification.
//!
//! Every proposed task is classified into one of three tiers before the
//! build worker touches it:
//!
//! - **T0** — fully autonomous.
//! - **T1** — budget-constrained; riskier-but-reversible work.
//! - **T2** — hard gate; requires human approval before execution.
//!
//! Classification is substring matching over the lowercased
//! `title + " " + description`. The keyword sets are policy, not typing:
//! `public` matches `publication` and that imprecision is accepted in favor
//! of never missing a true hard gate. The resolver sits behind
//! [`TierPolicy`] so the policy can change without rippling through the
//! build phase.

use serde::{Deserialize, Serialize};

/// Task autonomy tier. T2 is a one-way ratchet: once suggested or matched,
/// nothing lowers it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutonomyTier {
    T0,
    T1,
    T2,
}

impl AutonomyTier {
    /// Numeric index as used in adapter JSON (`0`, `1`, `2`).
    pub fn index(self) -> u8 {
        match self {
            Self::T0 => 0,
            Self::T1 => 1,
            Self::T2 => 2,
        }
    }

    /// Parse a numeric index; out-of-range values yield `None`.
    pub fn from_index(index: u64) -> Option<Self> {
        match index {
            0 => Some(Self::T0),
            1 => Some(Self::T1),
            2 => Some(Self::T2),
            _ => None,
        }
    }
}

impl std::fmt::Display for AutonomyTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::T0 => write!(f, "T0"),
            Self::T1 => write!(f, "T1"),
            Self::T2 => write!(f, "T2"),
        }
    }
}

/// Keywords that force T2 (human approval) regardless of any suggestion.
pub const T2_KEYWORDS: &[&str] = &[
    "deploy",
    "production",
    "publish",
    "release",
    "customer",
    "outbound",
    "email send",
    "billing",
    "payment",
    "spend",
    "purchase",
    "delete",
    "destroy",
    "public",
];

/// Keywords that promote T0 to T1 (budget-constrained).
pub const T1_KEYWORDS: &[&str] = &[
    "staging",
    "experiment",
    "a/b test",
    "trial",
    "prototype",
    "draft",
];

/// Pluggable tier classification policy.
pub trait TierPolicy: Send + Sync {
    /// Classify a proposed task from its title, description, and the
    /// planner's suggested tier.
    fn resolve(
        &self,
        title: &str,
        description: &str,
        suggested: Option<AutonomyTier>,
    ) -> AutonomyTier;
}

/// The default keyword policy.
///
/// Rules, in order:
/// 1. A suggested T2 is honored unconditionally.
/// 2. Any T2 keyword in title or description forces T2.
/// 3. Any T1 keyword promotes to T1.
/// 4. A suggested T1 is honored.
/// 5. Otherwise T0.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordTierPolicy;

impl TierPolicy for KeywordTierPolicy {
    fn resolve(
        &self,
        title: &str,
        description: &str,
        suggested: Option<AutonomyTier>,
    ) -> AutonomyTier {
        if suggested == Some(AutonomyTier::T2) {
            return AutonomyTier::T2;
        }

        let haystack = format!("{title} {description}").to_lowercase();

        if T2_KEYWORDS.iter().any(|kw| haystack.contains(kw)) {
            return AutonomyTier::T2;
        }
        if T1_KEYWORDS.iter().any(|kw| haystack.contains(kw)) {
            return AutonomyTier::T1;
        }
        if suggested == Some(AutonomyTier::T1) {
            return AutonomyTier::T1;
        }
        AutonomyTier::T0
    }
}

/// Classify with the default keyword policy.
pub fn resolve_tier(
    title: &str,
    description: &str,
    suggested: Option<AutonomyTier>,
) -> AutonomyTier {
    KeywordTierPolicy.resolve(title, description, suggested)
}
