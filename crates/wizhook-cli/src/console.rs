//! Console output formatting with colored display

use std::fmt::Write as _;

use owo_colors::OwoColorize;
use wizhook_core::combat::{CombatMember, CombatPhase, CombatSnapshot, CombatState};
use wizhook_core::hook::HookState;

pub fn format_state(state: &CombatState) -> String {
    match state {
        CombatState::NotInCombat => "not in combat".dimmed().to_string(),
        CombatState::Active { round, phase } => {
            format!("{} {}", format!("round {}", round).bold(), format_phase(*phase))
        }
    }
}

fn format_phase(phase: CombatPhase) -> String {
    match phase {
        CombatPhase::Planning => phase.green().to_string(),
        CombatPhase::Executing => phase.yellow().to_string(),
        CombatPhase::Waiting => phase.dimmed().to_string(),
    }
}

pub fn format_hook_state(state: HookState) -> String {
    match state {
        HookState::Active => state.green().to_string(),
        HookState::Failed => state.red().to_string(),
        HookState::Activating => state.yellow().to_string(),
        HookState::Inactive => state.dimmed().to_string(),
    }
}

fn format_health(member: &CombatMember) -> String {
    let text = format!("{}/{}", member.health, member.max_health);
    if member.is_dead() {
        text.red().to_string()
    } else if member.health * 4 < member.max_health {
        text.yellow().to_string()
    } else {
        text
    }
}

fn format_member(member: &CombatMember) -> String {
    let mut tags = Vec::new();
    if member.is_client {
        tags.push("you");
    }
    if member.is_boss {
        tags.push("boss");
    }
    if member.is_minion {
        tags.push("minion");
    }
    if member.stunned {
        tags.push("stunned");
    }

    let name = if member.is_monster() {
        member.label().red().to_string()
    } else {
        member.label().cyan().to_string()
    };
    let mana = member
        .mana
        .map(|mana| format!("  mana {}", mana))
        .unwrap_or_default();
    let tags = if tags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", tags.join(", ")).dimmed().to_string()
    };
    format!(
        "{}{}  hp {}{}  pips {}+{}p+{}s",
        name,
        tags,
        format_health(member),
        mana,
        member.pips.normal,
        member.pips.power,
        member.pips.shadow
    )
}

/// Multi-line view of a snapshot: the duel state, members by team, then the
/// hand with castable cards highlighted.
pub fn format_snapshot(snapshot: &CombatSnapshot) -> String {
    let mut output = String::new();
    let border = "━".repeat(50);

    let _ = writeln!(output, "{}", border.dimmed());
    let _ = writeln!(
        output,
        "  {}  ({})",
        format_state(&CombatState::Active {
            round: snapshot.round,
            phase: snapshot.phase,
        }),
        snapshot.duel_phase
    );
    let _ = writeln!(output, "{}", border.dimmed());

    for member in &snapshot.members {
        let _ = writeln!(output, "  {}", format_member(member));
    }

    let _ = writeln!(output);
    if snapshot.hand.is_empty() {
        let _ = writeln!(output, "  {}", "no cards in hand".dimmed());
    }
    for card in &snapshot.hand {
        let rank = if card.rank.shadow > 0 {
            format!("{}+{}s", card.rank.regular, card.rank.shadow)
        } else {
            card.rank.regular.to_string()
        };
        let label = format!("{} [{}] {}", card.label(), rank, card.type_name);
        let line = if snapshot.can_cast(card) {
            label.green().to_string()
        } else {
            label.dimmed().to_string()
        };
        let enchanted = if card.is_enchanted() {
            " *".yellow().to_string()
        } else {
            String::new()
        };
        let _ = writeln!(output, "  {}{}", line, enchanted);
    }
    let _ = write!(output, "{}", border.dimmed());

    output
}
