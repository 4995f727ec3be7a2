use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::error::{Error, Result};
use crate::memory::layouts;

/// The client structures a hook gives access to.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumIter,
    EnumString,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum HookKind {
    Client,
    Duel,
    Player,
    PlayerStat,
    Quest,
    RenderContext,
    RootWindow,
    MouselessCursor,
}

/// How the hook slot relates to the structure it exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseAccess {
    /// The slot holds a pointer to the structure; null means "not present".
    Pointer,
    /// The structure lives in the slot itself.
    Inline,
}

impl HookKind {
    pub fn name(self) -> &'static str {
        self.into()
    }

    pub fn from_name(name: &str) -> Result<Self> {
        name.parse()
            .map_err(|_| Error::UnknownHook(name.to_string()))
    }

    /// Layout of the structure behind the hook.
    pub fn layout(self) -> &'static str {
        match self {
            HookKind::Client => layouts::CLIENT_OBJECT,
            HookKind::Duel => layouts::DUEL,
            HookKind::Player => layouts::ACTOR_BODY,
            HookKind::PlayerStat => layouts::GAME_STATS,
            HookKind::Quest => layouts::QUEST_POSITION,
            HookKind::RenderContext => layouts::RENDER_CONTEXT,
            HookKind::RootWindow => layouts::WINDOW,
            HookKind::MouselessCursor => layouts::MOUSE_POSITION,
        }
    }

    pub fn base_access(self) -> BaseAccess {
        match self {
            HookKind::MouselessCursor => BaseAccess::Inline,
            _ => BaseAccess::Pointer,
        }
    }

    /// Whether `activate_all` includes this hook. The mouseless cursor changes
    /// how the client handles input, so it is only activated on request.
    pub fn activated_by_default(self) -> bool {
        !matches!(self, HookKind::MouselessCursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_names_round_trip() {
        for kind in HookKind::iter() {
            assert_eq!(HookKind::from_name(kind.name()).unwrap(), kind);
        }
        assert_eq!(HookKind::PlayerStat.to_string(), "player_stat");
    }

    #[test]
    fn test_unknown_name() {
        assert!(matches!(
            HookKind::from_name("backpack"),
            Err(Error::UnknownHook(name)) if name == "backpack"
        ));
    }

    #[test]
    fn test_default_activation_excludes_mouseless() {
        let defaults: Vec<HookKind> = HookKind::iter()
            .filter(|k| k.activated_by_default())
            .collect();
        assert_eq!(defaults.len(), 7);
        assert!(!defaults.contains(&HookKind::MouselessCursor));
    }

    #[test]
    fn test_every_layout_is_builtin() {
        let set = crate::memory::builtin_layouts();
        for kind in HookKind::iter() {
            assert!(set.get(kind.layout()).is_ok(), "{}", kind);
        }
    }
}
