use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{
    dto::{format_server_time, phase::VisibleSessionPhase},
    state::{
        combat::{Battle, CombatEntity},
        session::{GameSession, Outcome},
        stores::GameSettings,
    },
};

/// Upper bound for a single heal, block or training action.
pub const MAX_ACTION_AMOUNT: u32 = 50;

/// Amount carried by heal, block and training actions.
#[derive(Debug, Clone, Copy, Deserialize, Validate)]
pub struct CombatActionRequest {
    #[validate(range(min = 1, max = MAX_ACTION_AMOUNT))]
    pub amount: u32,
}

/// Stats of a combatant as displayed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CombatSummary {
    pub health: u32,
    pub max_health: u32,
    pub armor: u32,
    pub strength: u32,
    pub dexterity: u32,
    pub damage: u32,
}

impl From<&CombatEntity> for CombatSummary {
    fn from(value: &CombatEntity) -> Self {
        Self {
            health: value.health(),
            max_health: value.max_health(),
            armor: value.armor(),
            strength: value.strength(),
            dexterity: value.dexterity(),
            damage: value.damage(),
        }
    }
}

/// Snapshot of the running game for every mode.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStatus {
    pub phase: VisibleSessionPhase,
    pub round: u32,
    /// RFC 3339 start time, absent while idle.
    pub started_at: Option<String>,
    pub remaining_ms: u64,
    /// Milliseconds left in the intermission, if any.
    pub intermission_remaining_ms: Option<u64>,
    pub outcome: Outcome,
    pub team: CombatSummary,
    pub enemy: CombatSummary,
}

impl GameStatus {
    pub fn build(settings: &GameSettings, session: &GameSession, battle: &Battle, now: u64) -> Self {
        Self {
            phase: VisibleSessionPhase::from(session),
            round: session.round,
            started_at: session
                .started
                .then(|| format_server_time(session.start_timestamp)),
            remaining_ms: session.remaining(now, settings.game_duration_ms()),
            intermission_remaining_ms: session
                .round_end_timestamp
                .filter(|_| session.started)
                .map(|ends| ends.saturating_sub(now)),
            outcome: session.outcome,
            team: CombatSummary::from(&battle.team),
            enemy: CombatSummary::from(&battle.enemy),
        }
    }
}
