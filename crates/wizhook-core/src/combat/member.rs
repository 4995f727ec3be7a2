use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, IntoStaticStr};

use crate::combat::WindowRef;
use crate::error::Result;
use crate::graph::EntityRecord;

/// Identifies a combatant across snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberId {
    pub owner_id: u64,
    pub template_id: u64,
}

impl std::fmt::Display for MemberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "member {}/{}", self.owner_id, self.template_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Pips {
    pub normal: u32,
    pub power: u32,
    pub shadow: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, IntoStaticStr, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PipKind {
    Normal,
    Power,
    Shadow,
}

impl Pips {
    pub fn count(&self, kind: PipKind) -> u32 {
        match kind {
            PipKind::Normal => self.normal,
            PipKind::Power => self.power,
            PipKind::Shadow => self.shadow,
        }
    }

    /// Pip value available for regular ranks; a power pip counts as two.
    pub fn total(&self) -> u32 {
        self.normal + 2 * self.power
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombatMember {
    pub address: u64,
    pub id: MemberId,
    pub name: Option<String>,
    pub team_id: i32,
    pub is_client: bool,
    pub is_player: bool,
    pub is_minion: bool,
    pub is_boss: bool,
    pub stunned: bool,
    pub health: i32,
    pub max_health: i32,
    /// `None` when the participant has no game stats.
    pub mana: Option<i32>,
    pub max_mana: Option<i32>,
    pub pips: Pips,
    pub max_hand_size: u32,
    /// Hand structure; only the client's is read.
    pub hand: Option<u64>,
    /// Health bar window, clicked to target this member.
    pub window: Option<WindowRef>,
}

impl CombatMember {
    /// Decode a participant and its game stats.
    ///
    /// Health falls back to the participant's own field when the stats
    /// pointer is null.
    pub fn from_records(
        participant: &EntityRecord,
        stats: Option<&EntityRecord>,
        client_id: Option<u64>,
    ) -> Result<Self> {
        let owner_id = participant.u64("owner_id")?;
        let count = |name: &str| -> Result<u32> { Ok(participant.u64(name)? as u32) };

        let (health, mana, max_mana) = match stats {
            Some(stats) => (
                stats.i64("current_hitpoints")? as i32,
                Some(stats.i64("current_mana")? as i32),
                Some(stats.i64("base_mana")? as i32),
            ),
            None => (participant.i64("player_health")? as i32, None, None),
        };

        Ok(Self {
            address: participant.address,
            id: MemberId {
                owner_id,
                template_id: participant.u64("template_id")?,
            },
            name: None,
            team_id: participant.i64("team_id")? as i32,
            is_client: client_id == Some(owner_id),
            is_player: participant.bool("is_player")?,
            is_minion: participant.bool("is_minion")?,
            is_boss: participant.bool("boss_mob")?,
            stunned: participant.i64("stunned")? != 0,
            health,
            max_health: participant.i64("max_player_health")? as i32,
            mana,
            max_mana,
            pips: Pips {
                normal: count("num_pips")?,
                power: count("num_power_pips")?,
                shadow: count("num_shadow_pips")?,
            },
            max_hand_size: participant.i64("max_hand_size")?.max(0) as u32,
            hand: participant.pointer("hand")?,
            window: None,
        })
    }

    pub fn is_monster(&self) -> bool {
        !self.is_player && !self.is_minion
    }

    pub fn is_dead(&self) -> bool {
        self.health <= 0
    }

    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.id.to_string(),
        }
    }
}
