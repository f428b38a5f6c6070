use tracing::{debug, info};
use validator::Validate;

use crate::{
    dto::player::{PlayerStatus, SetPlayerNameRequest},
    error::ServiceError,
    state::{
        GameContext,
        stores::{PlayerProfile, PlayerView, PresenceData},
    },
};

/// Rename the local player.
///
/// The device-local profile and the shared registry change in one
/// transaction, so this client never sees one without the other.
pub async fn set_player_name(
    ctx: &GameContext,
    request: SetPlayerNameRequest,
) -> Result<(), ServiceError> {
    request.validate()?;
    let name = request.trimmed().to_owned();
    let client_id = ctx.client().client_id().clone();

    ctx.client()
        .transact((ctx.local_player(), ctx.players()), |(local, registry)| {
            local.name = name.clone();
            registry
                .players
                .insert(client_id.clone(), PlayerProfile { name: name.clone() });
        })
        .await?;

    let presence = PresenceData {
        mode: ctx.mode(),
        name: name.clone(),
    };
    if let Err(err) = ctx.client().set_awareness_data(ctx.presence(), &presence) {
        debug!(error = %err, "failed to publish player name");
    }

    info!(%client_id, %name, "player renamed");
    Ok(())
}

/// Switch the screen shown on this device.
pub async fn set_current_view(ctx: &GameContext, view: PlayerView) -> Result<(), ServiceError> {
    ctx.client()
        .transact(ctx.local_player(), |local| local.current_view = view)
        .await?;
    Ok(())
}

/// Every registered player, flagged online when one of its connections is
/// present on the global channel.
pub fn players_with_status(ctx: &GameContext) -> Result<Vec<PlayerStatus>, ServiceError> {
    let registry = ctx.players().get()?;
    let online = ctx.presence().client_ids();

    Ok(registry
        .players
        .into_iter()
        .map(|(id, profile)| PlayerStatus {
            is_online: online.contains(&id),
            name: profile.name,
            id,
        })
        .collect())
}
