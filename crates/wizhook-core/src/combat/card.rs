use serde::{Deserialize, Serialize};

use crate::combat::WindowRef;
use crate::error::Result;
use crate::graph::EntityRecord;

/// Spell template type of enchantment cards.
pub const ENCHANTMENT_TYPE: &str = "Enchantment";

/// Spell template type of area spells.
pub const AOE_TYPE: &str = "AOE";

/// Identifies a card across snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CardId {
    pub spell_id: u32,
    pub template_id: u32,
}

impl std::fmt::Display for CardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "card {}/{}", self.spell_id, self.template_id)
    }
}

/// Pip cost of a card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rank {
    pub regular: u32,
    pub shadow: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombatCard {
    pub address: u64,
    pub id: CardId,
    pub name: String,
    pub display_name: String,
    pub type_name: String,
    pub rank: Rank,
    pub accuracy: u32,
    /// Template id of the enchantment applied to this card, 0 when none.
    pub enchantment: u32,
    pub treasure_card: bool,
    pub item_card: bool,
    pub side_board: bool,
    pub cloaked: bool,
    /// The card's window in the hand, when it is on screen.
    pub window: Option<WindowRef>,
    /// The client greys out cards it will not accept.
    pub grayed: bool,
}

impl CombatCard {
    /// Decode a graphical spell and its template. A card without a template
    /// has empty names.
    pub fn from_records(spell: &EntityRecord, template: Option<&EntityRecord>) -> Result<Self> {
        let text = |name: &str| -> Result<String> {
            match template {
                Some(template) => Ok(template.text(name)?.to_string()),
                None => Ok(String::new()),
            }
        };
        let small = |name: &str| -> Result<u32> { Ok(spell.u64(name)? as u32) };

        Ok(Self {
            address: spell.address,
            id: CardId {
                spell_id: spell.u32("spell_id")?,
                template_id: spell.u32("template_id")?,
            },
            name: text("name")?,
            display_name: text("display_name")?,
            type_name: text("type_name")?,
            rank: Rank {
                regular: small("regular_rank")?,
                shadow: small("shadow_rank")?,
            },
            accuracy: small("accuracy")?,
            enchantment: spell.u32("enchantment")?,
            treasure_card: spell.bool("treasure_card")?,
            item_card: spell.bool("item_card")?,
            side_board: spell.bool("side_board")?,
            cloaked: spell.bool("cloaked")?,
            window: None,
            grayed: false,
        })
    }

    pub fn is_enchanted(&self) -> bool {
        self.enchantment != 0
    }

    pub fn is_enchantment(&self) -> bool {
        self.type_name == ENCHANTMENT_TYPE
    }

    pub fn is_aoe(&self) -> bool {
        self.type_name == AOE_TYPE
    }

    /// On screen and not greyed out; resources are checked separately.
    pub fn is_castable(&self) -> bool {
        self.window.is_some() && !self.grayed
    }

    pub fn label(&self) -> String {
        if self.name.is_empty() {
            self.id.to_string()
        } else {
            format!("{} ({})", self.name, self.id)
        }
    }
}
