use serde::Serialize;

use crate::state::session::GameSession;

/// Session phase exposed to every mode.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VisibleSessionPhase {
    /// No active game.
    Idle,
    /// Team and enemy are fighting.
    Battle,
    /// Enemy cleared, waiting for the next round.
    Intermission,
}

impl From<&GameSession> for VisibleSessionPhase {
    fn from(value: &GameSession) -> Self {
        if !value.started {
            VisibleSessionPhase::Idle
        } else if value.round_end_timestamp.is_some() {
            VisibleSessionPhase::Intermission
        } else {
            VisibleSessionPhase::Battle
        }
    }
}
