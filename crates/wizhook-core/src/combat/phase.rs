use serde::{Deserialize, Serialize};
use strum::{Display, FromRepr, IntoStaticStr};

/// Raw duel phase as stored in the duel structure.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    FromRepr,
    IntoStaticStr,
)]
#[repr(i32)]
pub enum DuelPhase {
    Starting = 0,
    PrePlanning = 1,
    Planning = 2,
    PreExecution = 3,
    Execution = 4,
    Resolution = 5,
    Victory = 6,
    Ended = 7,
    Max = 10,
}

impl DuelPhase {
    pub fn from_i32(value: i32) -> Option<Self> {
        Self::from_repr(value)
    }

    /// The coarse phase, `None` once the duel is over.
    pub fn combat_phase(self) -> Option<CombatPhase> {
        match self {
            DuelPhase::Planning => Some(CombatPhase::Planning),
            DuelPhase::PreExecution | DuelPhase::Execution | DuelPhase::Resolution => {
                Some(CombatPhase::Executing)
            }
            DuelPhase::Starting | DuelPhase::PrePlanning | DuelPhase::Victory => {
                Some(CombatPhase::Waiting)
            }
            DuelPhase::Ended | DuelPhase::Max => None,
        }
    }
}

/// What automation can do right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum CombatPhase {
    /// Cards can be selected.
    Planning,
    /// Spells are playing out.
    Executing,
    /// Between rounds, or before the first one.
    Waiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CombatState {
    #[default]
    NotInCombat,
    Active { round: u32, phase: CombatPhase },
}

impl CombatState {
    pub fn is_active(&self) -> bool {
        matches!(self, CombatState::Active { .. })
    }

    pub fn round(&self) -> Option<u32> {
        match *self {
            CombatState::Active { round, .. } => Some(round),
            CombatState::NotInCombat => None,
        }
    }

    pub fn phase(&self) -> Option<CombatPhase> {
        match *self {
            CombatState::Active { phase, .. } => Some(phase),
            CombatState::NotInCombat => None,
        }
    }
}

impl std::fmt::Display for CombatState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CombatState::NotInCombat => write!(f, "not in combat"),
            CombatState::Active { round, phase } => write!(f, "round {} ({})", round, phase),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_i32() {
        assert_eq!(DuelPhase::from_i32(2), Some(DuelPhase::Planning));
        assert_eq!(DuelPhase::from_i32(10), Some(DuelPhase::Max));
        assert_eq!(DuelPhase::from_i32(8), None);
        assert_eq!(DuelPhase::from_i32(-1), None);
    }

    #[test]
    fn test_combat_phase_mapping() {
        assert_eq!(DuelPhase::Planning.combat_phase(), Some(CombatPhase::Planning));
        assert_eq!(DuelPhase::Execution.combat_phase(), Some(CombatPhase::Executing));
        assert_eq!(DuelPhase::Resolution.combat_phase(), Some(CombatPhase::Executing));
        assert_eq!(DuelPhase::PrePlanning.combat_phase(), Some(CombatPhase::Waiting));
        assert_eq!(DuelPhase::Ended.combat_phase(), None);
    }

    #[test]
    fn test_state_display() {
        let state = CombatState::Active {
            round: 3,
            phase: CombatPhase::Planning,
        };
        assert_eq!(state.to_string(), "round 3 (Planning)");
        assert_eq!(state.round(), Some(3));
        assert!(!CombatState::NotInCombat.is_active());
    }
}
