//! Schemas and names of the documents shared by every mode.
//!
//! Names carry a schema version suffix; bumping it starts everyone from the
//! initial value instead of migrating stored state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    services::election::ControllerSlot,
    sync::{ClientId, ConnectionId},
};

pub const HOST_STORE: &str = "host/1";
pub const GAME_SETTINGS_STORE: &str = "game-settings/1";
pub const GAME_SESSION_STORE: &str = "game-session/1";
pub const BATTLE_STORE: &str = "battle/1";
pub const PLAYERS_STORE: &str = "players/1";
pub const LOCAL_PLAYER_STORE: &str = "local-player/1";
pub const LOBBIES_STORE: &str = "lobbies/1";
pub const GLOBAL_AWARENESS: &str = "global";

/// Name of the store (and awareness channel) of one lobby.
pub fn lobby_store_name(code: &str) -> String {
    format!("lobby/{code}")
}

/// Host-owned flags plus the global controller assignment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostState {
    pub controller_connection_id: ConnectionId,
    pub show_presenter_qr: bool,
}

impl ControllerSlot for HostState {
    fn controller(&self) -> &str {
        &self.controller_connection_id
    }

    fn set_controller(&mut self, connection_id: ConnectionId) {
        self.controller_connection_id = connection_id;
    }
}

/// Tunables agreed on by every client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSettings {
    /// Game length in minutes.
    pub game_duration: u32,
    pub round_intermission_ms: u64,
    pub enemy_attack_interval_ms: u64,
    /// Extra enemy max health per round already played.
    pub enemy_health_step: u32,
    /// Round whose enemy has to fall for a victory.
    pub rounds_to_win: u32,
}

impl GameSettings {
    pub fn game_duration_ms(&self) -> u64 {
        u64::from(self.game_duration) * 60_000
    }
}

/// Profile of a player, keyed by client id in [`PlayersState`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerProfile {
    pub name: String,
}

/// Registry of every player that ever joined.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayersState {
    pub players: BTreeMap<ClientId, PlayerProfile>,
}

/// Screens a player can be on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlayerView {
    #[default]
    WelcomeMessage,
    Connections,
    SharedState,
}

/// Device-local player state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalPlayer {
    pub name: String,
    pub current_view: PlayerView,
    pub lobby_id: Option<String>,
}

/// Open lobbies, code to creation time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbiesState {
    pub lobbies: BTreeMap<String, u64>,
}

/// State of one lobby.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyState {
    pub host_connection_id: ConnectionId,
    pub start_timestamp: u64,
    pub number_of_button_presses: i64,
}

impl ControllerSlot for LobbyState {
    fn controller(&self) -> &str {
        &self.host_connection_id
    }

    fn set_controller(&mut self, connection_id: ConnectionId) {
        self.host_connection_id = connection_id;
    }
}

/// What kind of client a connection runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMode {
    Host,
    Presenter,
    #[default]
    Player,
}

/// Presence data published on awareness channels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceData {
    pub mode: ClientMode,
    pub name: String,
}
