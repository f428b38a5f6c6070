use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::state::stores::{GameSettings, HostState};

/// Longest game a host may configure, in minutes.
pub const MAX_GAME_DURATION_MINUTES: u32 = 120;

/// Payload changing the game length.
#[derive(Debug, Clone, Copy, Deserialize, Validate)]
pub struct ChangeGameDurationRequest {
    #[validate(range(min = 1, max = MAX_GAME_DURATION_MINUTES))]
    pub minutes: u32,
}

/// Settings and host flags as shown on the host screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsSummary {
    pub game_duration_minutes: u32,
    pub round_intermission_ms: u64,
    pub enemy_attack_interval_ms: u64,
    pub rounds_to_win: u32,
    pub show_presenter_qr: bool,
    pub controller_connection_id: String,
}

impl From<(&GameSettings, &HostState)> for SettingsSummary {
    fn from((settings, host): (&GameSettings, &HostState)) -> Self {
        Self {
            game_duration_minutes: settings.game_duration,
            round_intermission_ms: settings.round_intermission_ms,
            enemy_attack_interval_ms: settings.enemy_attack_interval_ms,
            rounds_to_win: settings.rounds_to_win,
            show_presenter_qr: host.show_presenter_qr,
            controller_connection_id: host.controller_connection_id.clone(),
        }
    }
}
