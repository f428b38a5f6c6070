pub mod combat;
pub mod rules;
pub mod session;
pub mod stores;

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::{
    config::AppConfig,
    error::SyncError,
    services::controller::ControllerHandle,
    sync::{AwarenessChannel, DynamicStores, SharedDocument, StoreLease, SyncClient},
};

use self::{
    combat::Battle,
    session::GameSession,
    stores::{
        BATTLE_STORE, ClientMode, GAME_SESSION_STORE, GAME_SETTINGS_STORE, GLOBAL_AWARENESS,
        GameSettings, HOST_STORE, HostState, LOBBIES_STORE, LOCAL_PLAYER_STORE, LobbiesState,
        LobbyState, LocalPlayer, PLAYERS_STORE, PlayersState, PresenceData,
    },
};

pub type SharedContext = Arc<GameContext>;

/// Lobby the local client is currently in.
pub struct ActiveLobby {
    pub code: String,
    pub store: StoreLease<LobbyState>,
    pub awareness: AwarenessChannel<PresenceData>,
    /// Keeps the lobby host elected while the client stays in the lobby.
    pub host: ControllerHandle,
}

/// Everything one client needs to play: its connection and the handles of
/// every shared document, passed explicitly to services.
pub struct GameContext {
    client: SyncClient,
    mode: ClientMode,
    config: AppConfig,
    host: SharedDocument<HostState>,
    settings: SharedDocument<GameSettings>,
    session: SharedDocument<GameSession>,
    battle: SharedDocument<Battle>,
    players: SharedDocument<PlayersState>,
    local_player: SharedDocument<LocalPlayer>,
    lobbies: SharedDocument<LobbiesState>,
    presence: AwarenessChannel<PresenceData>,
    lobby_stores: DynamicStores,
    lobby: Mutex<Option<ActiveLobby>>,
}

impl GameContext {
    /// Register and join every global document and the global presence channel.
    pub async fn connect(
        client: SyncClient,
        mode: ClientMode,
        config: AppConfig,
    ) -> Result<SharedContext, SyncError> {
        let host = client.store(HOST_STORE, HostState::default(), false)?;
        let settings = client.store(GAME_SETTINGS_STORE, config.game_settings(), false)?;
        let session = client.store(GAME_SESSION_STORE, GameSession::default(), false)?;
        let battle = client.store(BATTLE_STORE, Battle::new(config.team, config.enemy), false)?;
        let players = client.store(PLAYERS_STORE, PlayersState::default(), false)?;
        let lobbies = client.store(LOBBIES_STORE, LobbiesState::default(), false)?;
        let local_player = client.local_store(LOCAL_PLAYER_STORE, LocalPlayer::default())?;

        let name = local_player.get()?.name;
        let presence = client.awareness(GLOBAL_AWARENESS, PresenceData { mode, name }, false)?;

        client.join(&host).await?;
        client.join(&settings).await?;
        client.join(&session).await?;
        client.join(&battle).await?;
        client.join(&players).await?;
        client.join(&lobbies).await?;
        client.join_awareness(&presence).await?;

        info!(
            client_id = %client.client_id(),
            connection_id = %client.connection_id(),
            ?mode,
            "game context connected"
        );

        Ok(Arc::new(Self {
            lobby_stores: DynamicStores::new(client.clone()),
            client,
            mode,
            config,
            host,
            settings,
            session,
            battle,
            players,
            local_player,
            lobbies,
            presence,
            lobby: Mutex::new(None),
        }))
    }

    pub fn client(&self) -> &SyncClient {
        &self.client
    }

    pub fn mode(&self) -> ClientMode {
        self.mode
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn host(&self) -> &SharedDocument<HostState> {
        &self.host
    }

    pub fn settings(&self) -> &SharedDocument<GameSettings> {
        &self.settings
    }

    pub fn session(&self) -> &SharedDocument<GameSession> {
        &self.session
    }

    pub fn battle(&self) -> &SharedDocument<Battle> {
        &self.battle
    }

    pub fn players(&self) -> &SharedDocument<PlayersState> {
        &self.players
    }

    pub fn local_player(&self) -> &SharedDocument<LocalPlayer> {
        &self.local_player
    }

    pub fn lobbies(&self) -> &SharedDocument<LobbiesState> {
        &self.lobbies
    }

    /// Global presence channel.
    pub fn presence(&self) -> &AwarenessChannel<PresenceData> {
        &self.presence
    }

    pub fn lobby_stores(&self) -> &DynamicStores {
        &self.lobby_stores
    }

    /// Lobby the client is in, if any.
    pub fn lobby(&self) -> &Mutex<Option<ActiveLobby>> {
        &self.lobby
    }

    /// Whether every global document is joined. Nothing read from a document
    /// is trustworthy before this holds.
    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
            && self.host.is_connected()
            && self.settings.is_connected()
            && self.session.is_connected()
            && self.battle.is_connected()
            && self.players.is_connected()
            && self.lobbies.is_connected()
            && self.presence.is_connected()
    }

    /// Synchronised server time in milliseconds.
    pub fn server_now(&self) -> u64 {
        self.client.server_timestamp()
    }
}
