//! Synthetic duel laid out in a `MockProcess`, for combat tests.
//!
//! `MockCombat` describes the duel (members, hand, window tree) and `build`
//! writes it with the built-in layouts, attaches a session and activates the
//! client, duel and root window hooks.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::combat::{CardId, DuelPhase, MemberId};
use crate::error::Result;
use crate::hook::{HookKind, HookSignature, ResolveStep, SignatureSet};
use crate::memory::builtin_layouts;
use crate::process::{MockMemoryBuilder, MockProcess};
use crate::session::Session;

const CODE: u64 = 0x40_0000;
const SLOTS: u64 = 0x60_0000;
const CLIENT: u64 = 0x70_0000;
const DUEL: u64 = 0x80_0000;
const PARTICIPANTS: u64 = 0x81_0000;
const HAND: u64 = 0x90_0000;
const HAND_NODES: u64 = 0x91_0000;
const MEMBERS: u64 = 0x1000_0000;
const CARDS: u64 = 0x2000_0000;
const WINDOWS: u64 = 0x3000_0000;

const STRIDE: u64 = 0x1000;
const NODE_STRIDE: u64 = 0x20;
const WINDOW_SIZE: usize = 0xC00;
const CHILDREN_ARRAY: u64 = 0x800;
const TEXT_HEAP: u64 = 0xA00;

const HOOKS: [(HookKind, u8, u64); 4] = [
    (HookKind::Client, 1, SLOTS),
    (HookKind::Duel, 2, SLOTS + 0x08),
    (HookKind::RootWindow, 3, SLOTS + 0x10),
    (HookKind::MouselessCursor, 4, SLOTS + 0x20),
];

#[derive(Debug, Clone)]
pub struct MockMember {
    pub template_id: u64,
    pub name: String,
    pub is_player: bool,
    pub is_minion: bool,
    pub is_boss: bool,
    pub health: i32,
    pub mana: Option<i32>,
    pub pips: (u8, u8, u8),
    pub max_hand_size: i32,
}

impl MockMember {
    pub fn player(template_id: u64, name: &str) -> Self {
        Self {
            template_id,
            name: name.to_string(),
            is_player: true,
            is_minion: false,
            is_boss: false,
            health: 1000,
            mana: Some(100),
            pips: (0, 0, 0),
            max_hand_size: 7,
        }
    }

    pub fn monster(template_id: u64, name: &str) -> Self {
        Self {
            is_player: false,
            ..Self::player(template_id, name)
        }
    }

    pub fn minion(mut self) -> Self {
        self.is_minion = true;
        self
    }

    pub fn boss(mut self) -> Self {
        self.is_boss = true;
        self
    }

    pub fn health(mut self, health: i32) -> Self {
        self.health = health;
        self
    }

    pub fn mana(mut self, mana: i32) -> Self {
        self.mana = Some(mana);
        self
    }

    /// No game stats: mana is unknown.
    pub fn no_stats(mut self) -> Self {
        self.mana = None;
        self
    }

    pub fn pips(mut self, normal: u8, power: u8, shadow: u8) -> Self {
        self.pips = (normal, power, shadow);
        self
    }

    pub fn max_hand_size(mut self, size: i32) -> Self {
        self.max_hand_size = size;
        self
    }
}

#[derive(Debug, Clone)]
pub struct MockCard {
    pub id: CardId,
    pub name: String,
    pub type_name: String,
    pub regular_rank: u8,
    pub shadow_rank: u8,
    pub enchantment: u32,
    pub grayed: bool,
    pub on_screen: bool,
}

impl MockCard {
    pub fn new(spell_id: u32, template_id: u32, name: &str) -> Self {
        Self {
            id: CardId {
                spell_id,
                template_id,
            },
            name: name.to_string(),
            type_name: "Damage".to_string(),
            regular_rank: 0,
            shadow_rank: 0,
            enchantment: 0,
            grayed: false,
            on_screen: true,
        }
    }

    pub fn rank(mut self, rank: u8) -> Self {
        self.regular_rank = rank;
        self
    }

    pub fn shadow_rank(mut self, rank: u8) -> Self {
        self.shadow_rank = rank;
        self
    }

    pub fn kind(mut self, type_name: &str) -> Self {
        self.type_name = type_name.to_string();
        self
    }

    pub fn enchantment(self) -> Self {
        self.kind(crate::combat::ENCHANTMENT_TYPE)
    }

    pub fn aoe(self) -> Self {
        self.kind(crate::combat::AOE_TYPE)
    }

    pub fn enchanted(mut self, enchantment: u32) -> Self {
        self.enchantment = enchantment;
        self
    }

    pub fn grayed(mut self) -> Self {
        self.grayed = true;
        self
    }

    /// No window in the hand.
    pub fn hidden(mut self) -> Self {
        self.on_screen = false;
        self
    }
}

#[derive(Debug, Default)]
struct MockWindow {
    name: String,
    parent: u64,
    visible: bool,
    children: Vec<u64>,
    text: String,
    graphical_spell: u64,
    grayed: bool,
    participant: u64,
}

/// Description of a duel. The first player member is the client.
#[derive(Debug, Clone)]
pub struct MockCombat {
    round: i32,
    phase: DuelPhase,
    in_duel: bool,
    hand_visible: bool,
    done_window: bool,
    members: Vec<MockMember>,
    cards: Vec<MockCard>,
}

impl Default for MockCombat {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCombat {
    pub fn new() -> Self {
        Self {
            round: 1,
            phase: DuelPhase::Planning,
            in_duel: true,
            hand_visible: true,
            done_window: false,
            members: Vec::new(),
            cards: Vec::new(),
        }
    }

    pub fn round(mut self, round: i32) -> Self {
        self.round = round;
        self
    }

    pub fn phase(mut self, phase: DuelPhase) -> Self {
        self.phase = phase;
        self
    }

    /// Whether the duel hook slot points at the duel.
    pub fn in_duel(mut self, in_duel: bool) -> Self {
        self.in_duel = in_duel;
        self
    }

    pub fn hand_visible(mut self, visible: bool) -> Self {
        self.hand_visible = visible;
        self
    }

    /// Show the defeated-state window with its own pass and flee buttons.
    pub fn done_window(mut self, shown: bool) -> Self {
        self.done_window = shown;
        self
    }

    pub fn member(mut self, member: MockMember) -> Self {
        self.members.push(member);
        self
    }

    pub fn card(mut self, card: MockCard) -> Self {
        self.cards.push(card);
        self
    }

    pub fn build(self) -> Result<MockCombatWorld> {
        let client_index = self.members.iter().position(|m| m.is_player);
        let member_address = |i: usize| MEMBERS + i as u64 * STRIDE;
        let card_address = |i: usize| CARDS + i as u64 * STRIDE;
        let owner_id = |i: usize| 1000 + i as u64;

        let mut b = MockMemoryBuilder::new().pid(4242);
        b = b.code(CODE, &code());
        b = b.region(SLOTS, 0x40);
        b = b.region(CLIENT, 0x200);
        if let Some(client) = client_index {
            b = b.write_u64(CLIENT + 72, owner_id(client));
        }

        // Duel and participant vector.
        b = b
            .region(DUEL, 0x100)
            .region(PARTICIPANTS, 0x200)
            .write_i32(DUEL + 188, self.round)
            .write_i32(DUEL + 192, self.phase as i32);
        if !self.members.is_empty() {
            b = b
                .write_u64(DUEL + 80, PARTICIPANTS)
                .write_u64(DUEL + 88, PARTICIPANTS + 16 * self.members.len() as u64);
        }
        for (i, member) in self.members.iter().enumerate() {
            let at = member_address(i);
            b = b
                .write_u64(PARTICIPANTS + 16 * i as u64, at)
                .region(at, 0x400)
                .write_u64(at + 112, owner_id(i))
                .write_u64(at + 120, member.template_id)
                .write_bool(at + 128, member.is_player)
                .write_i32(at + 144, if member.is_player { 0 } else { 1 })
                .write_u8(at + 152, member.pips.0)
                .write_u8(at + 153, member.pips.1)
                .write_u8(at + 154, member.pips.2)
                .write_i32(at + 236, member.health)
                .write_i32(at + 240, member.health)
                .write_i32(at + 248, member.max_hand_size)
                .write_bool(at + 396, member.is_minion)
                .write_bool(at + 638, member.is_boss);
            if Some(i) == client_index {
                b = b.write_u64(at + 256, HAND);
            }
            if let Some(mana) = member.mana {
                let stats = at + 0x800;
                b = b
                    .write_u64(at + 312, stats)
                    .region(stats, 0x100)
                    .write_i32(stats + 80, member.health)
                    .write_i32(stats + 84, mana)
                    .write_i32(stats + 108, member.health)
                    .write_i32(stats + 128, mana);
            }
        }

        // Hand: std::list of shared pointers, sentinel first.
        b = b
            .region(HAND, 0x100)
            .region(HAND_NODES, 0x1000)
            .write_u64(HAND + 72, HAND_NODES)
            .write_i32(HAND + 80, self.cards.len() as i32);
        let node = |i: usize| HAND_NODES + (i as u64 + 1) * NODE_STRIDE;
        b = b.write_u64(
            HAND_NODES,
            if self.cards.is_empty() { HAND_NODES } else { node(0) },
        );
        for (i, card) in self.cards.iter().enumerate() {
            let next = if i + 1 < self.cards.len() { node(i + 1) } else { HAND_NODES };
            let at = card_address(i);
            let template = at + 0x400;
            b = b
                .write_u64(node(i), next)
                .write_u64(node(i) + 16, at)
                .region(at, 0x200)
                .write_u32(at + 80, card.enchantment)
                .write_u64(at + 120, template)
                .write_u32(at + 128, card.id.template_id)
                .write_u8(at + 248, card.regular_rank)
                .write_u8(at + 249, card.shadow_rank)
                .write_u32(at + 272, card.id.spell_id)
                .region(template, 0x400);
            b = utf8_text(b, template + 96, template + 0x200, &card.name);
            b = utf8_text(b, template + 136, template + 0x280, &card.name);
            b = utf8_text(b, template + 312, template + 0x300, &card.type_name);
        }

        // Window tree.
        let mut windows: Vec<MockWindow> = Vec::new();
        let mut add = |window: MockWindow| -> u64 {
            let address = WINDOWS + windows.len() as u64 * STRIDE;
            if window.parent != 0 {
                let parent = ((window.parent - WINDOWS) / STRIDE) as usize;
                windows[parent].children.push(address);
            }
            windows.push(window);
            address
        };
        let root = add(MockWindow {
            name: "WorldView".to_string(),
            visible: true,
            ..Default::default()
        });
        let hand_window = add(MockWindow {
            name: "Hand".to_string(),
            parent: root,
            visible: self.hand_visible,
            ..Default::default()
        });
        let mut card_windows = Vec::new();
        for (i, card) in self.cards.iter().enumerate() {
            card_windows.push(card.on_screen.then(|| {
                add(MockWindow {
                    name: "SpellCheckBox".to_string(),
                    parent: hand_window,
                    visible: true,
                    graphical_spell: card_address(i),
                    grayed: card.grayed,
                    ..Default::default()
                })
            }));
        }
        let mut member_windows = Vec::new();
        for (i, member) in self.members.iter().enumerate() {
            let control = add(MockWindow {
                name: "CombatantControl".to_string(),
                parent: root,
                visible: true,
                participant: member_address(i),
                ..Default::default()
            });
            add(MockWindow {
                name: "Name".to_string(),
                parent: control,
                visible: true,
                text: member.name.clone(),
                ..Default::default()
            });
            member_windows.push(add(MockWindow {
                name: "Health".to_string(),
                parent: control,
                visible: true,
                ..Default::default()
            }));
        }
        let mut buttons = BTreeMap::new();
        for name in ["Focus", "Flee", "Draw"] {
            let button = add(MockWindow {
                name: name.to_string(),
                parent: root,
                visible: true,
                ..Default::default()
            });
            buttons.insert(name, button);
        }
        let done = add(MockWindow {
            name: "DoneWindow".to_string(),
            parent: root,
            visible: self.done_window,
            ..Default::default()
        });
        for name in ["DefeatedPassButton", "DefeatedFleeButton"] {
            let button = add(MockWindow {
                name: name.to_string(),
                parent: done,
                visible: true,
                ..Default::default()
            });
            buttons.insert(name, button);
        }

        for (k, window) in windows.iter().enumerate() {
            b = write_window(b, WINDOWS + k as u64 * STRIDE, k as i32, window);
        }

        b = b
            .write_u64(SLOTS, CLIENT)
            .write_u64(SLOTS + 0x08, if self.in_duel { DUEL } else { 0 })
            .write_u64(SLOTS + 0x10, root);

        let process = Arc::new(b.build());
        let session = Session::attach(Arc::clone(&process), signatures(), Arc::new(builtin_layouts()))?;
        for kind in [HookKind::Client, HookKind::Duel, HookKind::RootWindow] {
            session.activate(kind)?;
        }

        Ok(MockCombatWorld {
            members: (0..self.members.len())
                .map(|i| MemberId {
                    owner_id: owner_id(i),
                    template_id: self.members[i].template_id,
                })
                .collect(),
            cards: self.cards.iter().map(|c| c.id).collect(),
            card_windows,
            member_windows,
            buttons,
            duel: DUEL,
            control: DuelControl {
                process: Arc::clone(&process),
            },
            process,
            session,
        })
    }
}

fn code() -> Vec<u8> {
    let mut code = vec![0u8; 0x60];
    for (_, marker, _) in HOOKS {
        let at = marker as usize * 0x10;
        code[at..at + 4].copy_from_slice(&[0x57, 0x5A, 0x48, marker]);
    }
    code
}

fn signatures() -> SignatureSet {
    SignatureSet {
        version: "mock".to_string(),
        hooks: HOOKS
            .iter()
            .map(|&(hook, marker, slot)| {
                let at = CODE + marker as u64 * 0x10;
                HookSignature {
                    hook,
                    pattern: format!("57 5A 48 {:02X}", marker),
                    offset: 0,
                    module: None,
                    symbol: None,
                    steps: vec![ResolveStep::Add {
                        value: slot as i64 - at as i64,
                    }],
                    detour: None,
                }
            })
            .collect(),
    }
}

fn msvc_text(
    b: MockMemoryBuilder,
    at: u64,
    heap: u64,
    bytes: &[u8],
    count: usize,
) -> MockMemoryBuilder {
    if count == 0 {
        return b;
    }
    let b = if bytes.len() < 16 {
        b.write_bytes(at, bytes)
    } else {
        b.write_bytes(heap, bytes).write_u64(at, heap)
    };
    b.write_u64(at + 16, count as u64)
        .write_u64(at + 24, count.max(15) as u64)
}

fn utf8_text(b: MockMemoryBuilder, at: u64, heap: u64, text: &str) -> MockMemoryBuilder {
    msvc_text(b, at, heap, text.as_bytes(), text.len())
}

fn wide_text(b: MockMemoryBuilder, at: u64, heap: u64, text: &str) -> MockMemoryBuilder {
    let units: Vec<u16> = text.encode_utf16().collect();
    let bytes: Vec<u8> = units.iter().flat_map(|u| u.to_le_bytes()).collect();
    msvc_text(b, at, heap, &bytes, units.len())
}

fn write_window(b: MockMemoryBuilder, at: u64, index: i32, window: &MockWindow) -> MockMemoryBuilder {
    let left = index * 60;
    let mut b = b
        .region(at, WINDOW_SIZE)
        .write_u64(at + 136, window.parent)
        .write_u32(at + 156, window.visible as u32)
        .write_i32(at + 160, left)
        .write_i32(at + 164, 500)
        .write_i32(at + 168, left + 50)
        .write_i32(at + 172, 540)
        .write_u64(at + 952, window.graphical_spell)
        .write_bool(at + 1024, window.grayed)
        .write_u64(at + 1656, window.participant);
    b = utf8_text(b, at + 80, at + TEXT_HEAP, &window.name);
    b = wide_text(b, at + 584, at + TEXT_HEAP + 0x100, &window.text);
    if !window.children.is_empty() {
        let array = at + CHILDREN_ARRAY;
        b = b
            .write_u64(at + 112, array)
            .write_u64(at + 120, array + 16 * window.children.len() as u64);
        for (i, &child) in window.children.iter().enumerate() {
            b = b.write_u64(array + 16 * i as u64, child);
        }
    }
    b
}

/// Cloneable handle for changing the duel from another thread or a pacer hook.
#[derive(Debug, Clone)]
pub struct DuelControl {
    process: Arc<MockProcess>,
}

impl DuelControl {
    pub fn set_in_duel(&self, in_duel: bool) {
        self.process
            .poke_u64(SLOTS + 0x08, if in_duel { DUEL } else { 0 });
    }

    pub fn set_round(&self, round: i32) {
        self.process.poke_i32(DUEL + 188, round);
    }

    pub fn set_phase(&self, phase: DuelPhase) {
        self.process.poke_i32(DUEL + 192, phase as i32);
    }
}

pub struct MockCombatWorld {
    pub process: Arc<MockProcess>,
    pub session: Session<MockProcess>,
    pub duel: u64,
    pub control: DuelControl,
    pub members: Vec<MemberId>,
    pub cards: Vec<CardId>,
    card_windows: Vec<Option<u64>>,
    member_windows: Vec<u64>,
    buttons: BTreeMap<&'static str, u64>,
}

impl MockCombatWorld {
    pub fn card_window(&self, index: usize) -> Option<u64> {
        self.card_windows.get(index).copied().flatten()
    }

    /// The member's health bar window.
    pub fn member_window(&self, index: usize) -> Option<u64> {
        self.member_windows.get(index).copied()
    }

    pub fn button(&self, name: &str) -> Option<u64> {
        self.buttons.get(name).copied()
    }

    /// Unlink a card from the hand list and hide its window, as the client
    /// does when a card is played.
    pub fn remove_card(&self, index: usize) {
        let target = HAND_NODES + (index as u64 + 1) * NODE_STRIDE;
        let mut node = HAND_NODES;
        for _ in 0..=self.cards.len() {
            let Some(next) = self.process.peek_u64(node) else {
                return;
            };
            if next == target {
                if let Some(after) = self.process.peek_u64(target) {
                    self.process.poke_u64(node, after);
                }
                let size = self.process.peek(HAND + 80, 4).map_or(0, |b| {
                    i32::from_le_bytes([b[0], b[1], b[2], b[3]])
                });
                self.process.poke_i32(HAND + 80, size - 1);
                break;
            }
            node = next;
        }
        if let Some(window) = self.card_window(index) {
            self.process.poke_u32(window + 156, 0);
        }
    }

    /// Point the last hand node back at the first and inflate the size.
    pub fn corrupt_hand_links(&self) {
        if self.cards.is_empty() {
            return;
        }
        let first = HAND_NODES + NODE_STRIDE;
        let last = HAND_NODES + self.cards.len() as u64 * NODE_STRIDE;
        self.process.poke_u64(last, first);
        self.process.poke_i32(HAND + 80, 50);
    }
}
