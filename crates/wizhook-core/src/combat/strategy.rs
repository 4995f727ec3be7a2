//! Per-round decision making over snapshots.

use std::fmt;
use std::sync::Arc;

use crate::combat::{CastTarget, CombatAction, CombatCard, CombatSnapshot};
use crate::config::{AutomationConfig, FallbackAction};

pub trait CombatStrategy: Send {
    /// Pick this round's action. Only the snapshot is consulted, never live
    /// memory.
    fn decide(&mut self, snapshot: &CombatSnapshot) -> CombatAction;
}

/// Passes every round.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassStrategy;

impl CombatStrategy for PassStrategy {
    fn decide(&mut self, _snapshot: &CombatSnapshot) -> CombatAction {
        CombatAction::Pass
    }
}

pub type CardPredicate = Arc<dyn Fn(&CombatCard) -> bool + Send + Sync>;

#[derive(Clone)]
pub enum CardSelector {
    /// Name or display name, ignoring case.
    Named(String),
    TypeName(String),
    Enchanted,
    Unenchanted,
    All(Vec<CardSelector>),
    Predicate(CardPredicate),
}

impl CardSelector {
    pub fn named(name: &str) -> Self {
        CardSelector::Named(name.to_string())
    }

    pub fn type_name(type_name: &str) -> Self {
        CardSelector::TypeName(type_name.to_string())
    }

    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&CombatCard) -> bool + Send + Sync + 'static,
    {
        CardSelector::Predicate(Arc::new(f))
    }

    pub fn matches(&self, card: &CombatCard) -> bool {
        match self {
            CardSelector::Named(name) => {
                card.name.eq_ignore_ascii_case(name) || card.display_name.eq_ignore_ascii_case(name)
            }
            CardSelector::TypeName(type_name) => card.type_name.eq_ignore_ascii_case(type_name),
            CardSelector::Enchanted => card.is_enchanted(),
            CardSelector::Unenchanted => !card.is_enchanted(),
            CardSelector::All(selectors) => selectors.iter().all(|s| s.matches(card)),
            CardSelector::Predicate(f) => f(card),
        }
    }
}

impl fmt::Debug for CardSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardSelector::Named(name) => f.debug_tuple("Named").field(name).finish(),
            CardSelector::TypeName(name) => f.debug_tuple("TypeName").field(name).finish(),
            CardSelector::Enchanted => write!(f, "Enchanted"),
            CardSelector::Unenchanted => write!(f, "Unenchanted"),
            CardSelector::All(selectors) => f.debug_tuple("All").field(selectors).finish(),
            CardSelector::Predicate(_) => write!(f, "Predicate(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum TargetSelector {
    None,
    Client,
    FirstMonster,
    /// Living monster with the least health.
    WeakestMonster,
    Boss,
    MemberWithTemplate(u64),
    /// Another unenchanted card in the hand.
    Card(CardSelector),
}

impl TargetSelector {
    fn resolve(&self, snapshot: &CombatSnapshot, card: &CombatCard) -> Option<CastTarget> {
        let member = |m: &crate::combat::CombatMember| CastTarget::Member(m.id);
        match self {
            TargetSelector::None => Some(CastTarget::None),
            TargetSelector::Client => snapshot.client_member().map(|_| CastTarget::Client),
            TargetSelector::FirstMonster => snapshot.monsters().find(|m| !m.is_dead()).map(member),
            TargetSelector::WeakestMonster => snapshot
                .monsters()
                .filter(|m| !m.is_dead())
                .min_by_key(|m| m.health)
                .map(member),
            TargetSelector::Boss => snapshot
                .members
                .iter()
                .find(|m| m.is_boss && !m.is_dead())
                .map(member),
            TargetSelector::MemberWithTemplate(template_id) => {
                snapshot.member_with_template(*template_id).map(member)
            }
            TargetSelector::Card(selector) => snapshot
                .hand
                .iter()
                .find(|c| {
                    c.id != card.id && !c.is_enchanted() && c.window.is_some() && selector.matches(c)
                })
                .map(|c| CastTarget::Card(c.id)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CastRule {
    pub card: CardSelector,
    pub target: TargetSelector,
}

impl CastRule {
    pub fn new(card: CardSelector, target: TargetSelector) -> Self {
        Self { card, target }
    }
}

/// Ordered cast rules.
///
/// The first rule with a castable, affordable card and a resolvable target
/// wins. With no match, a full hand is thinned by discarding a card that
/// cannot be cast (when enabled), and otherwise the fallback is played.
#[derive(Debug, Clone, Default)]
pub struct ScriptedStrategy {
    rules: Vec<CastRule>,
    fallback: FallbackAction,
    discard_when_full: bool,
}

impl ScriptedStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &AutomationConfig) -> Self {
        Self {
            rules: Vec::new(),
            fallback: config.fallback,
            discard_when_full: config.discard_when_full,
        }
    }

    pub fn rule(mut self, card: CardSelector, target: TargetSelector) -> Self {
        self.rules.push(CastRule::new(card, target));
        self
    }

    pub fn with_fallback(mut self, fallback: FallbackAction) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn discard_when_full(mut self, enabled: bool) -> Self {
        self.discard_when_full = enabled;
        self
    }

    pub fn rules(&self) -> &[CastRule] {
        &self.rules
    }
}

impl CombatStrategy for ScriptedStrategy {
    fn decide(&mut self, snapshot: &CombatSnapshot) -> CombatAction {
        for rule in &self.rules {
            for card in snapshot
                .hand
                .iter()
                .filter(|c| rule.card.matches(c) && snapshot.can_cast(c))
            {
                if let Some(target) = rule.target.resolve(snapshot, card) {
                    return CombatAction::Cast {
                        card: card.id,
                        target,
                    };
                }
            }
        }

        if self.discard_when_full
            && snapshot.is_hand_full()
            && let Some(card) = snapshot
                .hand
                .iter()
                .find(|c| c.window.is_some() && !snapshot.can_cast(c))
        {
            return CombatAction::Discard(card.id);
        }

        self.fallback.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combat::mock::{MockCard, MockCombat, MockMember};
    use crate::combat::{CardId, MemberId};

    fn snapshot(combat: MockCombat) -> CombatSnapshot {
        let world = combat.build().unwrap();
        CombatSnapshot::take(&world.session, 3).unwrap().unwrap()
    }

    fn arena() -> MockCombat {
        MockCombat::new()
            .member(MockMember::player(10, "Aria").pips(4, 0, 0).max_hand_size(4))
            .member(MockMember::monster(20, "Rat").health(500))
            .member(MockMember::monster(30, "Troll").health(200).boss())
    }

    fn card(spell_id: u32) -> CardId {
        CardId {
            spell_id,
            template_id: spell_id * 100,
        }
    }

    #[test]
    fn test_enchant_before_damage() {
        let snapshot = snapshot(
            arena()
                .card(MockCard::new(1, 100, "Fire Cat").rank(1))
                .card(MockCard::new(2, 200, "Sharpened Blade").enchantment()),
        );
        let mut strategy = ScriptedStrategy::new()
            .rule(
                CardSelector::type_name("enchantment"),
                TargetSelector::Card(CardSelector::named("fire cat")),
            )
            .rule(CardSelector::named("Fire Cat"), TargetSelector::WeakestMonster);

        assert_eq!(
            strategy.decide(&snapshot),
            CombatAction::Cast {
                card: card(2),
                target: CastTarget::Card(card(1)),
            }
        );
    }

    #[test]
    fn test_enchanted_card_falls_through_to_damage() {
        let snapshot = snapshot(
            arena()
                .card(MockCard::new(1, 100, "Fire Cat").rank(1).enchanted(200))
                .card(MockCard::new(2, 200, "Sharpened Blade").enchantment()),
        );
        let mut strategy = ScriptedStrategy::new()
            .rule(
                CardSelector::type_name("Enchantment"),
                TargetSelector::Card(CardSelector::named("Fire Cat")),
            )
            .rule(
                CardSelector::All(vec![CardSelector::named("Fire Cat"), CardSelector::Enchanted]),
                TargetSelector::WeakestMonster,
            );

        // The troll has less health than the rat.
        assert_eq!(
            strategy.decide(&snapshot),
            CombatAction::Cast {
                card: card(1),
                target: CastTarget::Member(MemberId {
                    owner_id: 1002,
                    template_id: 30
                }),
            }
        );
    }

    #[test]
    fn test_unaffordable_cards_use_fallback() {
        let snapshot = snapshot(arena().card(MockCard::new(1, 100, "Colossus").rank(9)));
        let mut strategy = ScriptedStrategy::new()
            .rule(CardSelector::predicate(|c| c.rank.regular > 0), TargetSelector::Boss)
            .with_fallback(FallbackAction::Flee);
        assert_eq!(strategy.decide(&snapshot), CombatAction::Flee);
    }

    #[test]
    fn test_discard_when_full() {
        let snapshot = snapshot(
            arena()
                .card(MockCard::new(1, 100, "Fire Cat").rank(1))
                .card(MockCard::new(2, 200, "Colossus").rank(9))
                .card(MockCard::new(3, 300, "Storm Lord").rank(7))
                .card(MockCard::new(4, 400, "Frost Giant").rank(7)),
        );
        let mut strategy = ScriptedStrategy::new()
            .rule(CardSelector::named("Meteor"), TargetSelector::None)
            .discard_when_full(true);
        assert_eq!(strategy.decide(&snapshot), CombatAction::Discard(card(2)));

        let mut keep = ScriptedStrategy::new();
        assert_eq!(keep.decide(&snapshot), CombatAction::Pass);
    }

    #[test]
    fn test_from_config() {
        let config = AutomationConfig {
            fallback: FallbackAction::Flee,
            discard_when_full: true,
            ..Default::default()
        };
        let strategy = ScriptedStrategy::from_config(&config);
        assert!(strategy.rules().is_empty());
        assert!(strategy.discard_when_full);
        assert_eq!(strategy.fallback, FallbackAction::Flee);
    }

    #[test]
    fn test_pass_strategy() {
        let snapshot = snapshot(arena());
        assert_eq!(PassStrategy.decide(&snapshot), CombatAction::Pass);
    }
}
