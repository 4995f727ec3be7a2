use tracing::{info, warn};

use crate::combat::{CombatState, DuelReading};

/// Combat state tracker
///
/// ## State Transition Rules
///
/// Valid transitions:
/// - NotInCombat -> Active (duel appears)
/// - Active -> NotInCombat (duel ends)
/// - A different duel structure (a new duel), whatever its round and phase
/// - Active(round n) -> Active(round m), m > n (next round)
/// - Active(round n) -> Active(round m), m < n (a new duel started)
/// - Within a round of the same duel, the duel phase only moves forward
///
/// Invalid transitions (blocked):
/// - A duel phase going backwards within the same round of the same duel (torn read)
pub struct CombatTracker {
    last: Option<DuelReading>,
}

impl CombatTracker {
    pub fn new() -> Self {
        Self { last: None }
    }

    pub fn is_valid_transition(from: Option<&DuelReading>, to: Option<&DuelReading>) -> bool {
        match (from, to) {
            (Some(from), Some(to)) => {
                from.address != to.address || from.round != to.round || to.phase >= from.phase
            }
            _ => true,
        }
    }

    /// Feed one duel reading; `None` means no duel.
    pub fn detect(&mut self, reading: Option<&DuelReading>) -> CombatState {
        if !Self::is_valid_transition(self.last.as_ref(), reading) {
            warn!(
                "Invalid combat transition detected: {:?} -> {:?}, keeping {:?}",
                self.last, reading, self.last
            );
            return self.last_state();
        }

        match (&self.last, reading) {
            (None, Some(to)) => info!("Combat started (round {})", to.round),
            (Some(_), None) => info!("Combat ended"),
            (Some(from), Some(to)) if from.address != to.address => {
                info!("New combat detected at {:#x} (round {})", to.address, to.round)
            }
            (Some(from), Some(to)) if to.round < from.round => {
                info!("New combat detected (round {} -> {})", from.round, to.round)
            }
            _ => {}
        }

        self.last = reading.copied();
        self.last_state()
    }

    pub fn reset(&mut self) {
        self.last = None;
    }

    pub fn last_state(&self) -> CombatState {
        match self.last {
            Some(reading) => CombatState::Active {
                round: reading.round,
                phase: reading.combat_phase(),
            },
            None => CombatState::NotInCombat,
        }
    }
}

impl Default for CombatTracker {
    fn default() -> Self {
        Self::new()
    }
}
