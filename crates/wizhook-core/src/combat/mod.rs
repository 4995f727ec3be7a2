//! Combat automation over the resolved object graph.
//!
//! - `CombatSnapshot` - a consistent, round-stamped view of the duel
//! - `CombatTracker` - duel phase transitions
//! - `CombatEngine` - waits, validated casts and the per-round loop
//! - `CombatStrategy` - per-round decisions

mod card;
mod engine;
mod input;
mod member;
mod phase;
mod snapshot;
mod state;
mod strategy;

#[doc(hidden)]
pub mod mock;

pub use card::{AOE_TYPE, CardId, CombatCard, ENCHANTMENT_TYPE, Rank};
pub use engine::{CastTarget, CombatAction, CombatEngine, plan_cast};
pub use input::{CombatButton, InputEvent, InputSink, RecordingInput, Rect, WindowRef};
pub use member::{CombatMember, MemberId, PipKind, Pips};
pub use phase::{CombatPhase, CombatState, DuelPhase};
pub use snapshot::{CombatSnapshot, DuelReading, HAND_WINDOW, hand_visible, read_duel};
pub use state::CombatTracker;
pub use strategy::{
    CardPredicate, CardSelector, CastRule, CombatStrategy, PassStrategy, ScriptedStrategy,
    TargetSelector,
};
