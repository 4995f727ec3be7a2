//! Structure layouts: named fields at fixed offsets.
//!
//! Layouts are data. The built-in set matches the current client build and can
//! be overridden from a JSON file when a patch moves fields.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::memory::ValueKind;

/// Names of the built-in layouts.
pub mod layouts {
    pub const CLIENT_OBJECT: &str = "client_object";
    pub const OBJECT_TEMPLATE: &str = "object_template";
    pub const DUEL: &str = "duel";
    pub const COMBAT_PARTICIPANT: &str = "combat_participant";
    pub const GAME_STATS: &str = "game_stats";
    pub const HAND: &str = "hand";
    pub const GRAPHICAL_SPELL: &str = "graphical_spell";
    pub const SPELL_TEMPLATE: &str = "spell_template";
    pub const WINDOW: &str = "window";
    pub const ACTOR_BODY: &str = "actor_body";
    pub const QUEST_POSITION: &str = "quest_position";
    pub const RENDER_CONTEXT: &str = "render_context";
    pub const MOUSE_POSITION: &str = "mouse_position";
}

/// A field's offset from the structure base and its type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRule {
    pub offset: u64,
    pub kind: ValueKind,
}

impl FieldRule {
    pub fn new(offset: u64, kind: ValueKind) -> Self {
        Self { offset, kind }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructLayout {
    pub name: String,
    pub fields: BTreeMap<String, FieldRule>,
}

impl StructLayout {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: &str, offset: u64, kind: ValueKind) -> Self {
        self.fields
            .insert(name.to_string(), FieldRule::new(offset, kind));
        self
    }

    pub fn field(&self, name: &str) -> Result<&FieldRule> {
        self.fields.get(name).ok_or_else(|| {
            Error::InvalidLayout(format!("layout `{}` has no field `{}`", self.name, name))
        })
    }

    /// Bytes from the base covering every field.
    pub fn span(&self) -> usize {
        self.fields
            .values()
            .map(|f| f.offset as usize + f.kind.footprint())
            .max()
            .unwrap_or(0)
    }
}

/// A versioned collection of layouts, shared read-only by every session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutSet {
    pub version: String,
    pub layouts: Vec<StructLayout>,
}

impl LayoutSet {
    pub fn get(&self, name: &str) -> Result<&StructLayout> {
        self.layouts
            .iter()
            .find(|l| l.name == name)
            .ok_or_else(|| Error::InvalidLayout(format!("unknown layout `{}`", name)))
    }

    /// Replace layouts with the same name and append new ones.
    pub fn merge(&mut self, other: LayoutSet) {
        for layout in other.layouts {
            match self.layouts.iter_mut().find(|l| l.name == layout.name) {
                Some(existing) => *existing = layout,
                None => self.layouts.push(layout),
            }
        }
        self.version = other.version;
    }
}

pub fn load_layouts<P: AsRef<Path>>(path: P) -> Result<LayoutSet> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

pub fn save_layouts<P: AsRef<Path>>(path: P, layouts: &LayoutSet) -> Result<()> {
    let content = serde_json::to_string_pretty(layouts)?;
    fs::write(path, content)?;
    Ok(())
}

/// Layouts for the current client build.
pub fn builtin_layouts() -> LayoutSet {
    use ValueKind::*;

    let text = ValueKind::msvc_string();
    let wide = ValueKind::msvc_wstring();

    LayoutSet {
        version: "builtin".to_string(),
        layouts: vec![
            StructLayout::new(layouts::CLIENT_OBJECT)
                .with_field("global_id", 72, U64)
                .with_field("object_template", 88, Pointer)
                .with_field("parent", 208, Pointer)
                .with_field("client_zone", 304, Pointer)
                .with_field("children", 384, Pointer),
            StructLayout::new(layouts::OBJECT_TEMPLATE).with_field("object_name", 96, text),
            StructLayout::new(layouts::DUEL)
                .with_field("duel_id", 72, U64)
                .with_field("participant_list", 80, Pointer)
                .with_field("planning_timer", 144, F32)
                .with_field("round_number", 188, I32)
                .with_field("duel_phase", 192, I32),
            StructLayout::new(layouts::COMBAT_PARTICIPANT)
                .with_field("owner_id", 112, U64)
                .with_field("template_id", 120, U64)
                .with_field("is_player", 128, Bool)
                .with_field("team_id", 144, I32)
                .with_field("num_pips", 152, U8)
                .with_field("num_power_pips", 153, U8)
                .with_field("num_shadow_pips", 154, U8)
                .with_field("stunned", 180, I32)
                .with_field("player_health", 236, I32)
                .with_field("max_player_health", 240, I32)
                .with_field("max_hand_size", 248, I32)
                .with_field("hand", 256, Pointer)
                .with_field("game_stats", 312, Pointer)
                .with_field("is_minion", 396, Bool)
                .with_field("boss_mob", 638, Bool),
            StructLayout::new(layouts::GAME_STATS)
                .with_field("base_hitpoints", 80, I32)
                .with_field("base_mana", 84, I32)
                .with_field("current_hitpoints", 108, I32)
                .with_field("current_mana", 128, I32),
            StructLayout::new(layouts::HAND)
                .with_field("spell_list", 72, Pointer)
                .with_field("spell_count", 80, I32),
            StructLayout::new(layouts::GRAPHICAL_SPELL)
                .with_field("enchantment_is_item", 76, Bool)
                .with_field("enchantment", 80, U32)
                .with_field("spell_template", 120, Pointer)
                .with_field("template_id", 128, U32)
                .with_field("accuracy", 132, U8)
                .with_field("regular_rank", 248, U8)
                .with_field("shadow_rank", 249, U8)
                .with_field("cloaked", 264, Bool)
                .with_field("treasure_card", 265, Bool)
                .with_field("battle_card", 266, Bool)
                .with_field("item_card", 267, Bool)
                .with_field("side_board", 268, Bool)
                .with_field("spell_id", 272, U32)
                .with_field("pve", 328, Bool),
            StructLayout::new(layouts::SPELL_TEMPLATE)
                .with_field("name", 96, text)
                .with_field("display_name", 136, text)
                .with_field("type_name", 312, text),
            StructLayout::new(layouts::WINDOW)
                .with_field("name", 80, text)
                .with_field("children", 112, Pointer)
                .with_field("parent", 136, Pointer)
                .with_field("flags", 156, U32)
                .with_field("rect_left", 160, I32)
                .with_field("rect_top", 164, I32)
                .with_field("rect_right", 168, I32)
                .with_field("rect_bottom", 172, I32)
                .with_field("maybe_text", 584, wide)
                .with_field("graphical_spell", 952, Pointer)
                .with_field("spell_grayed", 1024, Bool)
                .with_field("combat_participant", 1656, Pointer),
            StructLayout::new(layouts::ACTOR_BODY)
                .with_field("position_x", 88, F32)
                .with_field("position_y", 92, F32)
                .with_field("position_z", 96, F32)
                .with_field("pitch", 100, F32)
                .with_field("roll", 104, F32)
                .with_field("yaw", 108, F32),
            StructLayout::new(layouts::QUEST_POSITION)
                .with_field("x", 0, F32)
                .with_field("y", 4, F32)
                .with_field("z", 8, F32),
            StructLayout::new(layouts::RENDER_CONTEXT).with_field("ui_scale", 152, F32),
            StructLayout::new(layouts::MOUSE_POSITION)
                .with_field("x", 0, I32)
                .with_field("y", 4, I32),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_builtin_layouts_are_unique() {
        let set = builtin_layouts();
        let mut names: Vec<&str> = set.layouts.iter().map(|l| l.name.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), set.layouts.len());
    }

    #[test]
    fn test_duel_layout() {
        let set = builtin_layouts();
        let duel = set.get(layouts::DUEL).unwrap();
        assert_eq!(duel.field("duel_phase").unwrap().offset, 192);
        assert_eq!(duel.field("round_number").unwrap().kind, ValueKind::I32);
        assert!(matches!(
            duel.field("missing"),
            Err(Error::InvalidLayout(_))
        ));
    }

    #[test]
    fn test_span_covers_strings() {
        let layout = StructLayout::new("t")
            .with_field("id", 0, ValueKind::U32)
            .with_field("name", 8, ValueKind::msvc_string());
        assert_eq!(layout.span(), 40);
    }

    #[test]
    fn test_unknown_layout() {
        assert!(builtin_layouts().get("nope").is_err());
    }

    #[test]
    fn test_save_load_and_merge() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("layouts.json");

        let patch = LayoutSet {
            version: "2026-10-01".to_string(),
            layouts: vec![StructLayout::new(layouts::DUEL).with_field("round_number", 200, ValueKind::I32)],
        };
        save_layouts(&path, &patch).unwrap();
        let loaded = load_layouts(&path).unwrap();
        assert_eq!(loaded, patch);

        let mut set = builtin_layouts();
        let count = set.layouts.len();
        set.merge(loaded);
        assert_eq!(set.layouts.len(), count);
        assert_eq!(set.version, "2026-10-01");
        assert_eq!(
            set.get(layouts::DUEL).unwrap().field("round_number").unwrap().offset,
            200
        );
    }
}
