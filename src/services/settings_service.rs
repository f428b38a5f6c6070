use tracing::info;
use validator::Validate;

use crate::{
    dto::settings::{ChangeGameDurationRequest, SettingsSummary},
    error::ServiceError,
    state::GameContext,
};

/// Change the game length. A running game picks up the new duration on the
/// controller's next tick.
pub async fn change_game_duration(
    ctx: &GameContext,
    request: ChangeGameDurationRequest,
) -> Result<SettingsSummary, ServiceError> {
    request.validate()?;
    ctx.client()
        .transact(ctx.settings(), |settings| {
            settings.game_duration = request.minutes;
        })
        .await?;

    info!(minutes = request.minutes, "game duration changed");
    settings_summary(ctx)
}

/// Flip whether the presenter screen shows the join QR code.
pub async fn toggle_presenter_qr(ctx: &GameContext) -> Result<bool, ServiceError> {
    let shown = ctx
        .client()
        .transact(ctx.host(), |host| {
            host.show_presenter_qr = !host.show_presenter_qr;
            host.show_presenter_qr
        })
        .await?;
    Ok(shown)
}

pub fn settings_summary(ctx: &GameContext) -> Result<SettingsSummary, ServiceError> {
    let settings = ctx.settings().get()?;
    let host = ctx.host().get()?;
    Ok(SettingsSummary::from((&settings, &host)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{services::test_support::context, sync::SyncHub};

    #[tokio::test]
    async fn duration_must_be_positive() {
        let hub = SyncHub::new();
        let ctx = context(&hub, "host").await;

        let err = change_game_duration(&ctx, ChangeGameDurationRequest { minutes: 0 })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));

        let summary = change_game_duration(&ctx, ChangeGameDurationRequest { minutes: 3 })
            .await
            .unwrap();
        assert_eq!(summary.game_duration_minutes, 3);
        assert_eq!(ctx.settings().get().unwrap().game_duration_ms(), 180_000);
    }

    #[tokio::test]
    async fn presenter_qr_toggles() {
        let hub = SyncHub::new();
        let ctx = context(&hub, "host").await;

        assert!(toggle_presenter_qr(&ctx).await.unwrap());
        assert!(!toggle_presenter_qr(&ctx).await.unwrap());
        assert!(!settings_summary(&ctx).unwrap().show_presenter_qr);
    }
}
