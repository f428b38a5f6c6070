use rand::Rng;
use tracing::{debug, info};

use crate::{
    dto::{
        lobby::LobbyStatus,
        validation::{normalize_lobby_code, validate_lobby_code},
    },
    error::ServiceError,
    services::{controller, election::Election},
    state::{
        ActiveLobby, GameContext,
        stores::{LobbyState, PresenceData, lobby_store_name},
    },
    sync::ServerTimer,
};

/// Attempts at drawing a code that is not registered yet.
const MAX_CODE_ATTEMPTS: usize = 32;

/// Draw a random lobby code such as `QZK-042`.
pub fn generate_lobby_code() -> String {
    let mut rng = rand::rng();
    let letters: String = (0..3)
        .map(|_| char::from(rng.random_range(b'A'..=b'Z')))
        .collect();
    let digits: String = (0..3)
        .map(|_| char::from(rng.random_range(b'0'..=b'9')))
        .collect();
    format!("{letters}-{digits}")
}

/// Register a new lobby and enter it. The creator becomes its first host.
pub async fn create_lobby(ctx: &GameContext) -> Result<LobbyStatus, ServiceError> {
    let now = ctx.server_now();
    let code = ctx
        .client()
        .try_transact(ctx.lobbies(), |registry| {
            for _ in 0..MAX_CODE_ATTEMPTS {
                let code = generate_lobby_code();
                if !registry.lobbies.contains_key(&code) {
                    registry.lobbies.insert(code.clone(), now);
                    return Ok(code);
                }
            }
            Err(ServiceError::InvalidState(
                "could not find a free lobby code".into(),
            ))
        })
        .await?;

    info!(%code, "lobby created");
    let initial = LobbyState {
        start_timestamp: now,
        ..LobbyState::default()
    };
    enter_lobby(ctx, code, initial).await
}

/// Join the lobby behind a user-typed code, leaving the current one first.
pub async fn join_lobby(ctx: &GameContext, code: &str) -> Result<LobbyStatus, ServiceError> {
    let code = normalize_lobby_code(code);
    validate_lobby_code(&code)?;

    if !ctx.lobbies().get()?.lobbies.contains_key(&code) {
        return Err(ServiceError::NotFound("Lobby not found.".into()));
    }

    let initial = LobbyState {
        start_timestamp: ctx.server_now(),
        ..LobbyState::default()
    };
    enter_lobby(ctx, code, initial).await
}

async fn enter_lobby(
    ctx: &GameContext,
    code: String,
    initial: LobbyState,
) -> Result<LobbyStatus, ServiceError> {
    let mut slot = ctx.lobby().lock().await;
    if let Some(active) = slot.as_ref().filter(|active| active.code == code) {
        return status_of(ctx, active);
    }
    if let Some(previous) = slot.take() {
        exit_lobby(ctx, previous).await?;
    }

    let name = lobby_store_name(&code);
    let store = ctx.lobby_stores().acquire(&name, initial).await?;

    let presence = PresenceData {
        mode: ctx.mode(),
        name: ctx.local_player().get()?.name,
    };
    let awareness = ctx.client().awareness(&name, presence.clone(), false)?;
    ctx.client().set_awareness_data(&awareness, &presence)?;
    ctx.client().join_awareness(&awareness).await?;

    let election = Election::new(
        ctx.client().clone(),
        store.document().clone(),
        awareness.clone(),
        "lobby",
    );
    // Settle the host right away instead of waiting for the first trigger.
    election.check_quietly().await;
    let timer = ServerTimer::spawn(ctx.client().clone(), ctx.config().server_time_tick);
    let host = controller::spawn(election, timer, Vec::new());

    ctx.client()
        .transact(ctx.local_player(), |local| {
            local.lobby_id = Some(code.clone());
        })
        .await?;

    info!(%code, "lobby joined");
    let active = ActiveLobby {
        code,
        store,
        awareness,
        host,
    };
    let status = status_of(ctx, &active);
    *slot = Some(active);
    status
}

/// Leave the current lobby, if any.
pub async fn leave_lobby(ctx: &GameContext) -> Result<(), ServiceError> {
    let previous = ctx.lobby().lock().await.take();
    match previous {
        Some(active) => exit_lobby(ctx, active).await,
        None => Ok(()),
    }
}

async fn exit_lobby(ctx: &GameContext, active: ActiveLobby) -> Result<(), ServiceError> {
    let ActiveLobby {
        code,
        store,
        awareness,
        host,
    } = active;

    host.stop();
    ctx.client().leave_awareness(&awareness).await?;
    drop(store);

    ctx.client()
        .transact(ctx.local_player(), |local| local.lobby_id = None)
        .await?;

    debug!(%code, "lobby left");
    Ok(())
}

pub async fn increment_button_presses(ctx: &GameContext) -> Result<i64, ServiceError> {
    change_button_presses(ctx, 1).await
}

pub async fn decrement_button_presses(ctx: &GameContext) -> Result<i64, ServiceError> {
    change_button_presses(ctx, -1).await
}

async fn change_button_presses(ctx: &GameContext, delta: i64) -> Result<i64, ServiceError> {
    let slot = ctx.lobby().lock().await;
    let Some(active) = slot.as_ref() else {
        return Err(ServiceError::InvalidState("not in a lobby".into()));
    };

    let presses = ctx
        .client()
        .transact(active.store.document(), |lobby| {
            lobby.number_of_button_presses += delta;
            lobby.number_of_button_presses
        })
        .await?;
    Ok(presses)
}

/// Status of the lobby this client is in.
pub async fn lobby_status(ctx: &GameContext) -> Result<Option<LobbyStatus>, ServiceError> {
    let slot = ctx.lobby().lock().await;
    slot.as_ref().map(|active| status_of(ctx, active)).transpose()
}

fn status_of(ctx: &GameContext, active: &ActiveLobby) -> Result<LobbyStatus, ServiceError> {
    let lobby = active.store.get()?;
    Ok(LobbyStatus {
        code: active.code.clone(),
        is_host: lobby.host_connection_id == *ctx.client().connection_id(),
        host_connection_id: lobby.host_connection_id,
        connection_ids: active.awareness.connection_ids(),
        number_of_button_presses: lobby.number_of_button_presses,
    })
}
