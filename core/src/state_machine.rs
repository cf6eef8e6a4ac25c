//! Engine loop state machine — explicit states and legal transition guards.
//!
//! The orchestrator drives its loop through ten states. Every transition is
//! validated against the table in [`can_transition`] and recorded, so a run
//! can be replayed from the transition log alone.
//!
//! Five of the states correspond one-to-one with pipeline phases; the
//! mapping is a bijection over those five ([`Phase::loop_state`] /
//! [`LoopState::phase`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The five pipeline phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Scan,
    Plan,
    Build,
    ShipCheck,
    Eval,
}

impl Phase {
    /// Fixed execution order of a cycle.
    pub const ALL: [Phase; 5] = [
        Phase::Scan,
        Phase::Plan,
        Phase::Build,
        Phase::ShipCheck,
        Phase::Eval,
    ];

    /// The loop state the engine occupies while this phase runs.
    pub fn loop_state(self) -> LoopState {
        match self {
            Phase::Scan => LoopState::Scanning,
            Phase::Plan => LoopState::Planning,
            Phase::Build => LoopState::Building,
            Phase::ShipCheck => LoopState::ShipChecking,
            Phase::Eval => LoopState::Evaluating,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Scan => "scan",
            Phase::Plan => "plan",
            Phase::Build => "build",
            Phase::ShipCheck => "ship_check",
            Phase::Eval => "eval",
        };
        write!(f, "{s}")
    }
}

/// The ten states of the engine loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    Scanning,
    Planning,
    Building,
    ShipChecking,
    Evaluating,
    Paused,
    Error,
    AwaitingApproval,
    BudgetExceeded,
}

impl LoopState {
    /// The phase associated with this state, if it is a phase state.
    pub fn phase(self) -> Option<Phase> {
        match self {
            LoopState::Scanning => Some(Phase::Scan),
            LoopState::Planning => Some(Phase::Plan),
            LoopState::Building => Some(Phase::Build),
            LoopState::ShipChecking => Some(Phase::ShipCheck),
            LoopState::Evaluating => Some(Phase::Eval),
            _ => None,
        }
    }
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LoopState::Idle => "idle",
            LoopState::Scanning => "scanning",
            LoopState::Planning => "planning",
            LoopState::Building => "building",
            LoopState::ShipChecking => "ship_checking",
            LoopState::Evaluating => "evaluating",
            LoopState::Paused => "paused",
            LoopState::Error => "error",
            LoopState::AwaitingApproval => "awaiting_approval",
            LoopState::BudgetExceeded => "budget_exceeded",
        };
        write!(f, "{s}")
    }
}

/// Legal transitions of the engine loop.
///
/// ```text
/// idle              → scanning | paused
/// scanning          → planning | error | paused | budget_exceeded
/// planning          → building | error | paused | budget_exceeded
/// building          → ship_checking | error | paused | budget_exceeded | awaiting_approval
/// ship_checking     → evaluating | error | paused | budget_exceeded
/// evaluating        → idle | error | paused
/// paused            → idle | scanning | planning | building | ship_checking | evaluating
/// error             → idle | scanning | paused
/// awaiting_approval → building | paused | error
/// budget_exceeded   → idle | paused
/// ```
pub fn can_transition(from: LoopState, to: LoopState) -> bool {
    use LoopState::*;

    matches!(
        (from, to),
        (Idle, Scanning)
            | (Idle, Paused)
            | (Scanning, Planning)
            | (Scanning, Error)
            | (Scanning, Paused)
            | (Scanning, BudgetExceeded)
            | (Planning, Building)
            | (Planning, Error)
            | (Planning, Paused)
            | (Planning, BudgetExceeded)
            | (Building, ShipChecking)
            | (Building, Error)
            | (Building, Paused)
            | (Building, BudgetExceeded)
            | (Building, AwaitingApproval)
            | (ShipChecking, Evaluating)
            | (ShipChecking, Error)
            | (ShipChecking, Paused)
            | (ShipChecking, BudgetExceeded)
            | (Evaluating, Idle)
            | (Evaluating, Error)
            | (Evaluating, Paused)
            | (Paused, Idle)
            | (Paused, Scanning)
            | (Paused, Planning)
            | (Paused, Building)
            | (Paused, ShipChecking)
            | (Paused, Evaluating)
            | (Error, Idle)
            | (Error, Scanning)
            | (Error, Paused)
            | (AwaitingApproval, Building)
            | (AwaitingApproval, Paused)
            | (AwaitingApproval, Error)
            | (BudgetExceeded, Idle)
            | (BudgetExceeded, Paused)
    )
}

/// A single recorded state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: LoopState,
    pub to: LoopState,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone, thiserror::Error)]
#[error("illegal state transition: {from} → {to}")]
pub struct IllegalTransition {
    pub from: LoopState,
    pub to: LoopState,
}

/// Tracks the current loop state, enforces legal transitions, and keeps a
/// complete transition log for diagnostics.
#[derive(Debug)]
pub struct EngineStateMachine {
    current: LoopState,
    transitions: Vec<TransitionRecord>,
}

impl EngineStateMachine {
    /// Start at `idle`.
    pub fn new() -> Self {
        Self::starting_at(LoopState::Idle)
    }

    /// Start at an arbitrary state (used when restoring a persisted engine).
    pub fn starting_at(state: LoopState) -> Self {
        Self {
            current: state,
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> LoopState {
        self.current
    }

    /// Attempt to advance to `to`, recording the transition on success.
    pub fn advance(
        &mut self,
        to: LoopState,
        reason: Option<&str>,
    ) -> Result<(), IllegalTransition> {
        if !can_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        tracing::debug!(from = %self.current, to = %to, "state transition");
        self.transitions.push(TransitionRecord {
            from: self.current,
            to,
            at: Utc::now(),
            reason: reason.map(String::from),
        });
        self.current = to;
        Ok(())
    }

    /// Whether `to` is reachable from the current state.
    pub fn can_advance(&self, to: LoopState) -> bool {
        can_transition(self.current, to)
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }
}

impl Default for EngineStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [LoopState; 10] = [
        LoopState::Idle,
        LoopState::Scanning,
        LoopState::Planning,
        LoopState::Building,
        LoopState::ShipChecking,
        LoopState::Evaluating,
        LoopState::Paused,
        LoopState::Error,
        LoopState::AwaitingApproval,
        LoopState::BudgetExceeded,
    ];

    /// Successors as declared in the transition table, used to check closure:
    /// every listed pair is legal, every unlisted pair is not.
    fn successors(from: LoopState) -> Vec<LoopState> {
        use LoopState::*;
        match from {
            Idle => vec![Scanning, Paused],
            Scanning => vec![Planning, Error, Paused, BudgetExceeded],
            Planning => vec![Building, Error, Paused, BudgetExceeded],
            Building => vec![ShipChecking, Error, Paused, BudgetExceeded, AwaitingApproval],
            ShipChecking => vec![Evaluating, Error, Paused, BudgetExceeded],
            Evaluating => vec![Idle, Error, Paused],
            Paused => vec![Idle, Scanning, Planning, Building, ShipChecking, Evaluating],
            Error => vec![Idle, Scanning, Paused],
            AwaitingApproval => vec![Building, Paused, Error],
            BudgetExceeded => vec![Idle, Paused],
        }
    }

    #[test]
    fn transition_table_is_closed() {
        for from in ALL_STATES {
            let legal = successors(from);
            for to in ALL_STATES {
                assert_eq!(
                    can_transition(from, to),
                    legal.contains(&to),
                    "{from} → {to}"
                );
            }
        }
    }

    #[test]
    fn no_self_transitions() {
        for state in ALL_STATES {
            assert!(!can_transition(state, state), "{state} → {state}");
        }
    }

    #[test]
    fn phase_state_bijection() {
        for phase in Phase::ALL {
            assert_eq!(phase.loop_state().phase(), Some(phase));
        }
        // Non-phase states map to no phase.
        for state in [
            LoopState::Idle,
            LoopState::Paused,
            LoopState::Error,
            LoopState::AwaitingApproval,
            LoopState::BudgetExceeded,
        ] {
            assert_eq!(state.phase(), None);
        }
    }

    #[test]
    fn happy_path_cycle() {
        let mut sm = EngineStateMachine::new();
        for phase in Phase::ALL {
            sm.advance(phase.loop_state(), None).unwrap();
        }
        sm.advance(LoopState::Idle, Some("cycle complete")).unwrap();
        assert_eq!(sm.current(), LoopState::Idle);
        assert_eq!(sm.transitions().len(), 6);
    }

    #[test]
    fn failed_phase_routes_through_error_to_idle() {
        let mut sm = EngineStateMachine::new();
        sm.advance(LoopState::Scanning, None).unwrap();
        sm.advance(LoopState::Planning, None).unwrap();
        sm.advance(LoopState::Error, Some("budget blocked")).unwrap();
        sm.advance(LoopState::Idle, None).unwrap();
        assert_eq!(sm.current(), LoopState::Idle);
    }

    #[test]
    fn illegal_transition_is_rejected_and_not_recorded() {
        let mut sm = EngineStateMachine::new();
        let err = sm.advance(LoopState::Building, None).unwrap_err();
        assert_eq!(err.from, LoopState::Idle);
        assert_eq!(err.to, LoopState::Building);
        assert_eq!(sm.current(), LoopState::Idle);
        assert!(sm.transitions().is_empty());
    }

    #[test]
    fn pause_and_resume_paths() {
        let mut sm = EngineStateMachine::new();
        sm.advance(LoopState::Paused, None).unwrap();
        sm.advance(LoopState::Idle, None).unwrap();
        sm.advance(LoopState::Scanning, None).unwrap();
        sm.advance(LoopState::Paused, Some("operator pause")).unwrap();
        // Paused may re-enter any phase state directly.
        sm.advance(LoopState::Scanning, None).unwrap();
        assert_eq!(sm.current(), LoopState::Scanning);
    }

    #[test]
    fn transition_record_serde_roundtrip() {
        let record = TransitionRecord {
            from: LoopState::ShipChecking,
            to: LoopState::Evaluating,
            at: Utc::now(),
            reason: Some("checks done".into()),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("ship_checking"));
        let restored: TransitionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.from, LoopState::ShipChecking);
        assert_eq!(restored.to, LoopState::Evaluating);
    }

    #[test]
    fn display_names_are_snake_case() {
        assert_eq!(LoopState::ShipChecking.to_string(), "ship_checking");
        assert_eq!(LoopState::AwaitingApproval.to_string(), "awaiting_approval");
        assert_eq!(LoopState::BudgetExceeded.to_string(), "budget_exceeded");
        assert_eq!(Phase::ShipCheck.to_string(), "ship_check");
    }
}
