//! Point-in-time combat state assembled from live memory.

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::debug;

use crate::combat::{CardId, CombatCard, CombatMember, CombatPhase, DuelPhase, MemberId, WindowRef};
use crate::error::{Error, Result};
use crate::graph::{EntityRecord, GraphReader, ListShape, is_visible};
use crate::hook::HookKind;
use crate::memory::layouts;
use crate::process::ProcessMemory;
use crate::session::Session;

/// Name of the window holding the hand.
pub const HAND_WINDOW: &str = "Hand";
const COMBATANT_WINDOW: &str = "CombatantControl";
const NAME_WINDOW: &str = "Name";
const HEALTH_WINDOW: &str = "Health";

/// What the duel structure says right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuelReading {
    pub address: u64,
    pub round: u32,
    pub phase: DuelPhase,
}

impl DuelReading {
    pub fn combat_phase(&self) -> CombatPhase {
        self.phase.combat_phase().unwrap_or(CombatPhase::Waiting)
    }
}

/// Read the duel's round and phase.
///
/// No duel, an unreadable duel, an unknown phase value and a finished duel all
/// read as `None`. Only a closed process is an error.
pub fn read_duel<P: ProcessMemory>(session: &Session<P>) -> Result<Option<DuelReading>> {
    let Some(duel) = session.optional_base(HookKind::Duel)? else {
        return Ok(None);
    };
    let layout = session.layouts().get(layouts::DUEL)?;
    let memory = session.memory();

    let fields = memory
        .read_field(duel, layout, "round_number")
        .and_then(|round| Ok((round, memory.read_field(duel, layout, "duel_phase")?)));
    let (round, phase) = match fields {
        Ok(fields) => fields,
        Err(Error::ProcessClosed) => return Err(Error::ProcessClosed),
        Err(e) => {
            debug!("Duel at {:#x} unreadable: {}", duel, e);
            return Ok(None);
        }
    };

    let raw = phase.as_i64().unwrap_or(-1);
    let Some(phase) = i32::try_from(raw).ok().and_then(DuelPhase::from_i32) else {
        debug!("Unknown duel phase {} at {:#x}", raw, duel);
        return Ok(None);
    };
    if phase.combat_phase().is_none() {
        return Ok(None);
    }

    Ok(Some(DuelReading {
        address: duel,
        round: round.as_i64().unwrap_or(0).clamp(0, u32::MAX as i64) as u32,
        phase,
    }))
}

/// Whether the hand window is on screen. `false` without a root window.
pub fn hand_visible<P: ProcessMemory>(session: &Session<P>) -> Result<bool> {
    let Some(root) = session.optional_base(HookKind::RootWindow)? else {
        return Ok(false);
    };
    Ok(session
        .graph()
        .windows_with_name(root, HAND_WINDOW)?
        .iter()
        .any(is_visible))
}

/// Immutable view of one combat round.
#[derive(Debug, Clone, Serialize)]
pub struct CombatSnapshot {
    pub round: u32,
    pub duel_phase: DuelPhase,
    pub phase: CombatPhase,
    pub members: Vec<CombatMember>,
    /// The client's hand, in hand order.
    pub hand: Vec<CombatCard>,
    pub taken_at: DateTime<Local>,
}

impl CombatSnapshot {
    /// Sample the duel until two round readings agree around the member and
    /// hand reads.
    ///
    /// `None` when not in combat; `SnapshotUnstable` when the round kept
    /// changing for `attempts` samples.
    pub fn take<P: ProcessMemory>(session: &Session<P>, attempts: u32) -> Result<Option<Self>> {
        let attempts = attempts.max(1);
        for attempt in 1..=attempts {
            let Some(before) = read_duel(session)? else {
                return Ok(None);
            };
            let snapshot = Self::assemble(session, &before)?;
            match read_duel(session)? {
                None => return Ok(None),
                Some(after) if after.address == before.address && after.round == before.round => {
                    return Ok(Some(snapshot));
                }
                Some(after) => debug!(
                    "Round changed from {} to {} while sampling (attempt {}/{})",
                    before.round, after.round, attempt, attempts
                ),
            }
        }
        Err(Error::SnapshotUnstable { attempts })
    }

    fn assemble<P: ProcessMemory>(session: &Session<P>, duel: &DuelReading) -> Result<Self> {
        let graph = session.graph();
        let client_id = match session.optional_base(HookKind::Client)? {
            Some(client) => {
                let layout = session.layouts().get(layouts::CLIENT_OBJECT)?;
                session
                    .memory()
                    .read_field(client, layout, "global_id")?
                    .as_u64()
            }
            None => None,
        };
        let root = session.optional_base(HookKind::RootWindow)?;

        let mut members = read_members(&graph, duel.address, client_id)?;
        if let Some(root) = root {
            attach_member_windows(&graph, root, &mut members)?;
        }

        let mut hand = match members.iter().find(|m| m.is_client).and_then(|m| m.hand) {
            Some(hand) => read_hand(&graph, hand)?,
            None => Vec::new(),
        };
        if let Some(root) = root {
            attach_card_windows(&graph, root, &mut hand)?;
        }

        Ok(Self {
            round: duel.round,
            duel_phase: duel.phase,
            phase: duel.combat_phase(),
            members,
            hand,
            taken_at: Local::now(),
        })
    }

    pub fn client_member(&self) -> Option<&CombatMember> {
        self.members.iter().find(|m| m.is_client)
    }

    pub fn member(&self, id: MemberId) -> Option<&CombatMember> {
        self.members.iter().find(|m| m.id == id)
    }

    pub fn monsters(&self) -> impl Iterator<Item = &CombatMember> {
        self.members.iter().filter(|m| m.is_monster())
    }

    pub fn players(&self) -> impl Iterator<Item = &CombatMember> {
        self.members.iter().filter(|m| m.is_player)
    }

    pub fn member_with_template(&self, template_id: u64) -> Option<&CombatMember> {
        self.members.iter().find(|m| m.id.template_id == template_id)
    }

    /// First member whose name contains `name`, ignoring case.
    pub fn member_named(&self, name: &str) -> Option<&CombatMember> {
        let needle = name.to_lowercase();
        self.members.iter().find(|m| {
            m.name
                .as_deref()
                .is_some_and(|n| n.to_lowercase().contains(&needle))
        })
    }

    pub fn card(&self, id: CardId) -> Option<&CombatCard> {
        self.hand.iter().find(|c| c.id == id)
    }

    /// Cards whose name or display name equals `name`, ignoring case.
    pub fn cards_named<'s>(&'s self, name: &'s str) -> impl Iterator<Item = &'s CombatCard> + 's {
        self.hand.iter().filter(move |c| {
            c.name.eq_ignore_ascii_case(name) || c.display_name.eq_ignore_ascii_case(name)
        })
    }

    pub fn cards_with<'s, F>(&'s self, predicate: F) -> impl Iterator<Item = &'s CombatCard> + 's
    where
        F: Fn(&CombatCard) -> bool + 's,
    {
        self.hand.iter().filter(move |c| predicate(c))
    }

    pub fn enchants(&self) -> impl Iterator<Item = &CombatCard> {
        self.hand.iter().filter(|c| c.is_enchantment())
    }

    pub fn aoes(&self) -> impl Iterator<Item = &CombatCard> {
        self.hand.iter().filter(|c| c.is_aoe())
    }

    pub fn is_hand_full(&self) -> bool {
        self.client_member()
            .is_some_and(|client| client.max_hand_size > 0 && self.hand.len() >= client.max_hand_size as usize)
    }

    /// Check the client can pay for `card`.
    ///
    /// Mana is compared against the regular rank; unknown mana is not
    /// checked. Pips count power pips double, and shadow ranks need shadow
    /// pips.
    pub fn check_resources(&self, card: &CombatCard) -> Result<()> {
        let client = self
            .client_member()
            .ok_or_else(|| Error::MemberNotFound("client".to_string()))?;

        if let Some(mana) = client.mana {
            let available = mana.max(0) as u32;
            if available < card.rank.regular {
                return Err(Error::NotEnoughMana {
                    required: card.rank.regular,
                    available,
                });
            }
        }
        if client.pips.total() < card.rank.regular {
            return Err(Error::NotEnoughPips {
                required: card.rank.regular,
                available: client.pips.total(),
            });
        }
        if client.pips.shadow < card.rank.shadow {
            return Err(Error::NotEnoughPips {
                required: card.rank.shadow,
                available: client.pips.shadow,
            });
        }
        Ok(())
    }

    /// On screen, not greyed out and affordable.
    pub fn can_cast(&self, card: &CombatCard) -> bool {
        card.is_castable() && self.check_resources(card).is_ok()
    }
}

fn read_members<P: ProcessMemory>(
    graph: &GraphReader<'_, P>,
    duel: u64,
    client_id: Option<u64>,
) -> Result<Vec<CombatMember>> {
    let offset = graph
        .layouts()
        .get(layouts::DUEL)?
        .field("participant_list")?
        .offset;

    let mut members = Vec::new();
    for address in graph.walk(duel, ListShape::SharedVector { offset }) {
        let participant = graph.record(address?, layouts::COMBAT_PARTICIPANT)?;
        let stats = participant
            .pointer("game_stats")?
            .map(|stats| graph.record(stats, layouts::GAME_STATS))
            .transpose()?;
        members.push(CombatMember::from_records(&participant, stats.as_ref(), client_id)?);
    }
    Ok(members)
}

fn first_window<P: ProcessMemory>(
    graph: &GraphReader<'_, P>,
    root: u64,
    name: &str,
) -> Result<Option<EntityRecord>> {
    Ok(graph.windows_with_name(root, name)?.into_iter().next())
}

/// Fill in names and target windows from each member's combatant control.
fn attach_member_windows<P: ProcessMemory>(
    graph: &GraphReader<'_, P>,
    root: u64,
    members: &mut [CombatMember],
) -> Result<()> {
    for control in graph.windows_with_name(root, COMBATANT_WINDOW)? {
        let Some(participant) = control.pointer("combat_participant")? else {
            continue;
        };
        let Some(member) = members.iter_mut().find(|m| m.address == participant) else {
            continue;
        };

        member.name = first_window(graph, control.address, NAME_WINDOW)?
            .and_then(|w| w.text("maybe_text").ok().map(str::to_string))
            .filter(|name| !name.is_empty());
        member.window = first_window(graph, control.address, HEALTH_WINDOW)?
            .map(|w| WindowRef::from_record(&w))
            .transpose()?;
    }
    Ok(())
}

fn read_hand<P: ProcessMemory>(graph: &GraphReader<'_, P>, hand: u64) -> Result<Vec<CombatCard>> {
    let offset = graph
        .layouts()
        .get(layouts::HAND)?
        .field("spell_list")?
        .offset;

    let mut cards = Vec::new();
    for address in graph.walk(hand, ListShape::SharedLinkedList { offset }) {
        let spell = graph.record(address?, layouts::GRAPHICAL_SPELL)?;
        let template = spell
            .pointer("spell_template")?
            .map(|template| graph.record(template, layouts::SPELL_TEMPLATE))
            .transpose()?;
        cards.push(CombatCard::from_records(&spell, template.as_ref())?);
    }
    Ok(cards)
}

/// Pair visible card windows with hand cards. Windows are matched in order,
/// each to the first unpaired card with the same ids.
fn attach_card_windows<P: ProcessMemory>(
    graph: &GraphReader<'_, P>,
    root: u64,
    hand: &mut [CombatCard],
) -> Result<()> {
    if hand.is_empty() {
        return Ok(());
    }
    let windows = graph.windows_with_predicate(root, |w| {
        is_visible(w) && w.pointer("graphical_spell").is_ok_and(|p| p.is_some())
    })?;

    for window in windows {
        let Some(spell) = window.pointer("graphical_spell")? else {
            continue;
        };
        let spell = graph.record(spell, layouts::GRAPHICAL_SPELL)?;
        let id = CardId {
            spell_id: spell.u32("spell_id")?,
            template_id: spell.u32("template_id")?,
        };
        if let Some(card) = hand.iter_mut().find(|c| c.id == id && c.window.is_none()) {
            card.window = Some(WindowRef::from_record(&window)?);
            card.grayed = window.bool("spell_grayed")?;
        }
    }
    Ok(())
}
