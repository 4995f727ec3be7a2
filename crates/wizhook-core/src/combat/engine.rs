//! Combat waits, actions and the per-round loop.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::combat::{
    CardId, CombatButton, CombatPhase, CombatSnapshot, CombatState, CombatStrategy, CombatTracker,
    InputEvent, InputSink, MemberId, WindowRef, hand_visible, read_duel,
};
use crate::config::{AutomationConfig, FallbackAction};
use crate::error::{Error, Result};
use crate::graph::is_visible;
use crate::hook::HookKind;
use crate::process::ProcessMemory;
use crate::session::Session;
use crate::wait::{CancelToken, Pacer, PollConfig, SystemPacer, poll_until};

const DONE_WINDOW: &str = "DoneWindow";

/// Who a cast is aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CastTarget {
    /// Untargeted spells (auras, area spells).
    None,
    Client,
    Member(MemberId),
    /// Another card in the hand, for enchantments.
    Card(CardId),
}

/// One decision for a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CombatAction {
    Cast { card: CardId, target: CastTarget },
    Discard(CardId),
    Pass,
    Flee,
    Draw,
}

impl From<FallbackAction> for CombatAction {
    fn from(action: FallbackAction) -> Self {
        match action {
            FallbackAction::Pass => CombatAction::Pass,
            FallbackAction::Flee => CombatAction::Flee,
        }
    }
}

impl std::fmt::Display for CombatAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CombatAction::Cast { card, target } => write!(f, "cast {} at {:?}", card, target),
            CombatAction::Discard(card) => write!(f, "discard {}", card),
            CombatAction::Pass => write!(f, "pass"),
            CombatAction::Flee => write!(f, "flee"),
            CombatAction::Draw => write!(f, "draw"),
        }
    }
}

/// Errors that reject one action without ending the round.
fn is_rejection(error: &Error) -> bool {
    matches!(
        error,
        Error::CardNotFound(_)
            | Error::MemberNotFound(_)
            | Error::CardAlreadyEnchanted(_)
            | Error::NotEnoughMana { .. }
            | Error::NotEnoughPips { .. }
    )
}

fn member_window(snapshot: &CombatSnapshot, id: Option<MemberId>) -> Result<WindowRef> {
    let member = match id {
        Some(id) => snapshot.member(id),
        None => snapshot.client_member(),
    };
    let member = member.ok_or_else(|| {
        Error::MemberNotFound(id.map_or_else(|| "client".to_string(), |id| id.to_string()))
    })?;
    member
        .window
        .ok_or_else(|| Error::MemberNotFound(format!("{} has no target window", member.label())))
}

/// Resolve a cast against `snapshot` into the clicks that perform it.
///
/// Every check happens here, before any input is sent.
pub fn plan_cast(snapshot: &CombatSnapshot, card: CardId, target: CastTarget) -> Result<Vec<InputEvent>> {
    let card = snapshot
        .card(card)
        .ok_or_else(|| Error::CardNotFound(card.to_string()))?;

    let target = match target {
        CastTarget::None => None,
        CastTarget::Client => Some(member_window(snapshot, None)?),
        CastTarget::Member(id) => Some(member_window(snapshot, Some(id))?),
        CastTarget::Card(id) => {
            let target = snapshot
                .card(id)
                .ok_or_else(|| Error::CardNotFound(id.to_string()))?;
            if target.is_enchanted() {
                return Err(Error::CardAlreadyEnchanted(target.label()));
            }
            Some(target.window.ok_or_else(|| {
                Error::CardNotFound(format!("{} is not on screen", target.label()))
            })?)
        }
    };

    snapshot.check_resources(card)?;
    let window = match card.window {
        Some(window) if !card.grayed => window,
        _ => return Err(Error::CardNotFound(format!("{} is not castable", card.label()))),
    };

    let mut events = vec![InputEvent::Click(window)];
    events.extend(target.map(InputEvent::Click));
    Ok(events)
}

/// Drives one session through combat.
///
/// Decisions are made on snapshots; every action re-samples the duel and
/// checks the cards and members it uses before sending input.
pub struct CombatEngine<'a, P: ProcessMemory> {
    session: &'a Session<P>,
    input: Arc<dyn InputSink>,
    pacer: Arc<dyn Pacer>,
    cancel: CancelToken,
    config: AutomationConfig,
    tracker: CombatTracker,
}

impl<'a, P: ProcessMemory> CombatEngine<'a, P> {
    pub fn new(session: &'a Session<P>, input: Arc<dyn InputSink>) -> Self {
        Self {
            session,
            input,
            pacer: Arc::new(SystemPacer::new()),
            cancel: CancelToken::new(),
            config: AutomationConfig::default(),
            tracker: CombatTracker::new(),
        }
    }

    pub fn with_config(mut self, config: AutomationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_pacer(mut self, pacer: Arc<dyn Pacer>) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn session(&self) -> &'a Session<P> {
        self.session
    }

    pub fn config(&self) -> &AutomationConfig {
        &self.config
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Poll the duel once.
    pub fn state(&mut self) -> Result<CombatState> {
        let reading = read_duel(self.session)?;
        Ok(self.tracker.detect(reading.as_ref()))
    }

    pub fn in_combat(&mut self) -> Result<bool> {
        Ok(self.state()?.is_active())
    }

    /// A fresh snapshot, `None` when not in combat.
    pub fn sample(&self) -> Result<Option<CombatSnapshot>> {
        CombatSnapshot::take(self.session, self.config.snapshot_attempts)
    }

    fn wait<T, F>(&mut self, what: &'static str, config: PollConfig, mut check: F) -> Result<T>
    where
        F: FnMut(&mut Self) -> Result<Option<T>>,
    {
        let pacer = Arc::clone(&self.pacer);
        let cancel = self.cancel.clone();
        poll_until(what, &config, pacer.as_ref(), &cancel, || check(self))
    }

    pub fn wait_for_combat(&mut self) -> Result<CombatState> {
        let config = self.config.combat_wait();
        self.wait("combat", config, |engine| {
            let state = engine.state()?;
            Ok(state.is_active().then_some(state))
        })
    }

    /// Returns the round; fails `NotInCombat` if the duel ends first.
    pub fn wait_for_planning_phase(&mut self) -> Result<u32> {
        let config = self.config.planning_wait();
        self.wait("planning phase", config, |engine| match engine.state()? {
            CombatState::NotInCombat => Err(Error::NotInCombat),
            CombatState::Active {
                round,
                phase: CombatPhase::Planning,
            } => Ok(Some(round)),
            CombatState::Active { .. } => Ok(None),
        })
    }

    pub fn wait_for_hand_visible(&mut self) -> Result<()> {
        let config = self.config.planning_wait();
        self.wait("hand", config, |engine| {
            if !engine.in_combat()? {
                return Err(Error::NotInCombat);
            }
            Ok(hand_visible(engine.session)?.then_some(()))
        })
    }

    /// Wait until the round differs from `current` or combat ends.
    pub fn wait_until_next_round(&mut self, current: u32) -> Result<CombatState> {
        let config = self.config.round_wait();
        self.wait("next round", config, |engine| {
            let state = engine.state()?;
            Ok(match state {
                CombatState::Active { round, .. } if round == current => None,
                _ => Some(state),
            })
        })
    }

    fn post(&self, events: Vec<InputEvent>) -> Result<()> {
        for event in events {
            self.input.post(event)?;
        }
        Ok(())
    }

    pub fn cast(&mut self, card: CardId, target: CastTarget) -> Result<()> {
        let snapshot = self.sample()?.ok_or(Error::NotInCombat)?;
        let events = plan_cast(&snapshot, card, target)?;
        info!("Casting {} at {:?}", card, target);
        self.post(events)
    }

    pub fn discard(&mut self, card: CardId) -> Result<()> {
        let snapshot = self.sample()?.ok_or(Error::NotInCombat)?;
        let card = snapshot
            .card(card)
            .ok_or_else(|| Error::CardNotFound(card.to_string()))?;
        let window = card
            .window
            .ok_or_else(|| Error::CardNotFound(format!("{} is not on screen", card.label())))?;
        info!("Discarding {}", card.label());
        self.post(vec![InputEvent::RightClick(window)])
    }

    /// The window behind `button`. Defeated players get separate buttons.
    pub fn button_window(&self, button: CombatButton) -> Result<Option<WindowRef>> {
        let Some(root) = self.session.optional_base(HookKind::RootWindow)? else {
            return Ok(None);
        };
        let graph = self.session.graph();
        let done = graph
            .windows_with_name(root, DONE_WINDOW)?
            .into_iter()
            .find(is_visible);

        let (scope, name) = match (button, &done) {
            (CombatButton::Pass, Some(done)) => (done.address, "DefeatedPassButton"),
            (CombatButton::Flee, Some(done)) => (done.address, "DefeatedFleeButton"),
            (CombatButton::Pass, None) => (root, "Focus"),
            (CombatButton::Flee, None) => (root, "Flee"),
            (CombatButton::Draw, _) => (root, "Draw"),
        };
        graph
            .windows_with_name(scope, name)?
            .first()
            .map(WindowRef::from_record)
            .transpose()
    }

    fn press(&mut self, button: CombatButton) -> Result<()> {
        if !self.in_combat()? {
            return Err(Error::NotInCombat);
        }
        let event = match self.button_window(button)? {
            Some(window) => InputEvent::Click(window),
            None => {
                debug!("No window for {}, sending the button itself", button);
                InputEvent::Button(button)
            }
        };
        info!("Pressing {}", button);
        self.post(vec![event])
    }

    pub fn pass(&mut self) -> Result<()> {
        self.press(CombatButton::Pass)
    }

    pub fn flee(&mut self) -> Result<()> {
        self.press(CombatButton::Flee)
    }

    pub fn draw(&mut self) -> Result<()> {
        self.press(CombatButton::Draw)
    }

    pub fn execute(&mut self, action: &CombatAction) -> Result<()> {
        match *action {
            CombatAction::Cast { card, target } => self.cast(card, target),
            CombatAction::Discard(card) => self.discard(card),
            CombatAction::Pass => self.pass(),
            CombatAction::Flee => self.flee(),
            CombatAction::Draw => self.draw(),
        }
    }

    /// Play one round: wait for planning, decide on a snapshot, act, then wait
    /// for the round to change.
    ///
    /// Returns `false` when combat ended before an action was taken. A
    /// rejected action is replaced by the configured fallback.
    pub fn handle_round(&mut self, strategy: &mut dyn CombatStrategy) -> Result<bool> {
        let round = match self.wait_for_planning_phase() {
            Ok(round) => round,
            Err(Error::NotInCombat) => return Ok(false),
            Err(e) => return Err(e),
        };
        if self.session.hooks().is_active(HookKind::RootWindow) {
            match self.wait_for_hand_visible() {
                Ok(()) => {}
                Err(Error::NotInCombat) => return Ok(false),
                Err(e) => return Err(e),
            }
        }
        let Some(snapshot) = self.sample()? else {
            return Ok(false);
        };

        let action = strategy.decide(&snapshot);
        debug!("Round {}: {}", round, action);
        let result = match self.execute(&action) {
            Err(e) if is_rejection(&e) => {
                let fallback = CombatAction::from(self.config.fallback);
                warn!("Could not {} ({}), falling back to {}", action, e, fallback);
                self.execute(&fallback)
            }
            other => other,
        };
        match result {
            Ok(()) => {}
            Err(Error::NotInCombat) => return Ok(false),
            Err(e) => return Err(e),
        }

        self.wait_until_next_round(round)?;
        Ok(true)
    }

    /// Wait for combat and play rounds until it ends. Returns the number of
    /// rounds played.
    pub fn handle_combat(&mut self, strategy: &mut dyn CombatStrategy) -> Result<u32> {
        let state = self.wait_for_combat()?;
        info!("Entered combat: {}", state);

        let mut rounds = 0;
        while self.handle_round(strategy)? {
            rounds += 1;
        }
        info!("Combat finished after {} rounds", rounds);
        Ok(rounds)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::combat::mock::{MockCard, MockCombat, MockCombatWorld, MockMember};
    use crate::combat::{DuelPhase, PassStrategy, RecordingInput};
    use crate::wait::ManualPacer;

    fn world() -> MockCombat {
        MockCombat::new()
            .member(MockMember::player(10, "Aria").pips(2, 1, 0).mana(30))
            .member(MockMember::monster(20, "Krokopatra"))
            .card(MockCard::new(1, 100, "Fire Cat").rank(1))
            .card(MockCard::new(2, 200, "Sharpened Blade").enchantment())
            .card(MockCard::new(3, 300, "Colossus").rank(9))
            .card(MockCard::new(4, 400, "Frost Beetle").enchanted(200))
            .card(MockCard::new(5, 500, "Lightning Bats").grayed())
    }

    fn engine<'a>(
        world: &'a MockCombatWorld,
        pacer: Arc<ManualPacer>,
    ) -> (Arc<RecordingInput>, CombatEngine<'a, crate::process::MockProcess>) {
        let input = Arc::new(RecordingInput::new());
        let config = AutomationConfig {
            poll_interval_ms: 100,
            combat_timeout_secs: Some(10),
            ..Default::default()
        };
        let engine = CombatEngine::new(&world.session, input.clone())
            .with_pacer(pacer)
            .with_config(config);
        (input, engine)
    }

    fn clicked(events: &[InputEvent]) -> Vec<u64> {
        events
            .iter()
            .map(|event| match event {
                InputEvent::Click(w) | InputEvent::RightClick(w) | InputEvent::Hover(w) => w.address,
                InputEvent::Button(_) => 0,
            })
            .collect()
    }

    #[test]
    fn test_cast_at_member() {
        let world = world().build().unwrap();
        let (input, mut engine) = engine(&world, Arc::new(ManualPacer::new()));
        let writes = world.process.write_count();

        engine
            .cast(world.cards[0], CastTarget::Member(world.members[1]))
            .unwrap();
        assert_eq!(
            clicked(&input.events()),
            vec![world.card_window(0).unwrap(), world.member_window(1).unwrap()]
        );
        assert_eq!(world.process.write_count(), writes);
    }

    #[test]
    fn test_enchant_card() {
        let world = world().build().unwrap();
        let (input, mut engine) = engine(&world, Arc::new(ManualPacer::new()));

        engine
            .cast(world.cards[1], CastTarget::Card(world.cards[0]))
            .unwrap();
        assert_eq!(
            clicked(&input.events()),
            vec![world.card_window(1).unwrap(), world.card_window(0).unwrap()]
        );

        input.clear();
        assert!(matches!(
            engine.cast(world.cards[1], CastTarget::Card(world.cards[3])),
            Err(Error::CardAlreadyEnchanted(_))
        ));
        assert!(input.events().is_empty());
    }

    #[test]
    fn test_stale_card_is_not_cast() {
        let world = world().build().unwrap();
        let (input, mut engine) = engine(&world, Arc::new(ManualPacer::new()));
        let decided = engine.sample().unwrap().unwrap();
        assert!(decided.card(world.cards[0]).is_some());

        world.remove_card(0);
        let writes = world.process.write_count();
        assert!(matches!(
            engine.cast(world.cards[0], CastTarget::None),
            Err(Error::CardNotFound(_))
        ));
        assert!(input.events().is_empty());
        assert_eq!(world.process.write_count(), writes);
    }

    #[test]
    fn test_resource_and_visibility_checks() {
        let world = world().build().unwrap();
        let (input, mut engine) = engine(&world, Arc::new(ManualPacer::new()));

        assert!(matches!(
            engine.cast(world.cards[2], CastTarget::None),
            Err(Error::NotEnoughPips { required: 9, available: 4 })
        ));
        assert!(matches!(
            engine.cast(world.cards[4], CastTarget::None),
            Err(Error::CardNotFound(_))
        ));
        assert!(matches!(
            engine.cast(world.cards[0], CastTarget::Member(MemberId { owner_id: 1, template_id: 1 })),
            Err(Error::MemberNotFound(_))
        ));
        assert!(input.events().is_empty());
    }

    #[test]
    fn test_not_in_combat() {
        let world = world().in_duel(false).build().unwrap();
        let (input, mut engine) = engine(&world, Arc::new(ManualPacer::new()));
        assert!(matches!(
            engine.cast(world.cards[0], CastTarget::None),
            Err(Error::NotInCombat)
        ));
        assert!(matches!(engine.pass(), Err(Error::NotInCombat)));
        assert!(input.events().is_empty());
    }

    #[test]
    fn test_discard_and_buttons() {
        let world = world().build().unwrap();
        let (input, mut engine) = engine(&world, Arc::new(ManualPacer::new()));

        engine.discard(world.cards[2]).unwrap();
        engine.pass().unwrap();
        engine.flee().unwrap();
        engine.draw().unwrap();
        let events = input.events();
        assert!(matches!(events[0], InputEvent::RightClick(w) if Some(w.address) == world.card_window(2)));
        assert_eq!(
            clicked(&events[1..]),
            vec![
                world.button("Focus").unwrap(),
                world.button("Flee").unwrap(),
                world.button("Draw").unwrap()
            ]
        );
    }

    #[test]
    fn test_defeated_buttons() {
        let world = world().done_window(true).build().unwrap();
        let (input, mut engine) = engine(&world, Arc::new(ManualPacer::new()));
        engine.pass().unwrap();
        engine.flee().unwrap();
        assert_eq!(
            clicked(&input.events()),
            vec![
                world.button("DefeatedPassButton").unwrap(),
                world.button("DefeatedFleeButton").unwrap()
            ]
        );
    }

    #[test]
    fn test_wait_for_combat_resolves_when_duel_appears() {
        let world = world().in_duel(false).build().unwrap();
        let control = world.control.clone();
        let pacer = Arc::new(ManualPacer::with_tick(move |tick| {
            if tick == 2 {
                control.set_in_duel(true);
            }
        }));
        let (_, mut engine) = engine(&world, Arc::clone(&pacer));

        let state = engine.wait_for_combat().unwrap();
        assert_eq!(
            state,
            CombatState::Active {
                round: 1,
                phase: CombatPhase::Planning
            }
        );
        assert_eq!(pacer.ticks(), 2);
    }

    #[test]
    fn test_wait_for_planning_times_out() {
        let world = world().phase(DuelPhase::Execution).build().unwrap();
        let pacer = Arc::new(ManualPacer::new());
        let (_, engine) = engine(&world, Arc::clone(&pacer));
        let mut engine = engine.with_config(AutomationConfig {
            poll_interval_ms: 500,
            planning_timeout_secs: Some(2),
            ..Default::default()
        });

        match engine.wait_for_planning_phase() {
            Err(Error::Timeout { what, waited }) => {
                assert_eq!(what, "planning phase");
                assert_eq!(waited, Duration::from_secs(2));
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(pacer.ticks(), 4);
    }

    #[test]
    fn test_wait_is_cancellable() {
        let world = world().in_duel(false).build().unwrap();
        let cancel = CancelToken::new();
        let remote = cancel.clone();
        let pacer = Arc::new(ManualPacer::with_tick(move |tick| {
            if tick == 3 {
                remote.cancel();
            }
        }));
        let (input, engine) = engine(&world, pacer);
        let mut engine = engine.with_cancel(cancel);

        assert!(matches!(engine.wait_for_combat(), Err(Error::Cancelled("combat"))));
        assert!(input.events().is_empty());
    }

    #[test]
    fn test_wait_until_next_round() {
        let world = world().build().unwrap();
        let control = world.control.clone();
        let pacer = Arc::new(ManualPacer::with_tick(move |tick| match tick {
            1 => control.set_phase(DuelPhase::Execution),
            3 => {
                control.set_round(2);
                control.set_phase(DuelPhase::Planning);
            }
            _ => {}
        }));
        let (_, mut engine) = engine(&world, Arc::clone(&pacer));

        let state = engine.wait_until_next_round(1).unwrap();
        assert_eq!(state.round(), Some(2));
        assert_eq!(pacer.ticks(), 3);
    }

    #[test]
    fn test_handle_combat_until_duel_ends() {
        let world = world().build().unwrap();
        let control = world.control.clone();
        let pacer = Arc::new(ManualPacer::with_tick(move |tick| match tick {
            1 => control.set_round(2),
            2 => control.set_in_duel(false),
            _ => {}
        }));
        let (input, mut engine) = engine(&world, pacer);

        let rounds = engine.handle_combat(&mut PassStrategy).unwrap();
        assert_eq!(rounds, 2);
        let focus = world.button("Focus").unwrap();
        assert_eq!(clicked(&input.events()), vec![focus, focus]);
    }
}
