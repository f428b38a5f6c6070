use std::sync::Arc;

use futures::{FutureExt, future::BoxFuture};
use tracing::{debug, info};
use validator::Validate;

use crate::{
    dto::game::{CombatActionRequest, GameStatus},
    error::ServiceError,
    services::{
        controller::{self, ControllerHandle, ControllerTask},
        election::Election,
    },
    state::{
        GameContext, SharedContext,
        combat::{Battle, DamageReport, Reward},
        rules::{self, TickEvent},
        session::{GameSession, Outcome, SessionEvent},
    },
    sync::ServerTimer,
};

/// Start a fresh game at the current server time with a fresh battle.
pub async fn start_game(ctx: &GameContext) -> Result<GameStatus, ServiceError> {
    let now = ctx.server_now();
    let config = ctx.config();
    ctx.client()
        .try_transact((ctx.session(), ctx.battle()), |(session, battle)| {
            session.apply(SessionEvent::Start { now })?;
            *battle = Battle::new(config.team, config.enemy);
            Ok::<_, ServiceError>(())
        })
        .await?;

    info!(start_timestamp = now, "game started");
    game_status(ctx)
}

/// Stop the running game. Stopping an idle game changes nothing.
pub async fn stop_game(ctx: &GameContext) -> Result<GameStatus, ServiceError> {
    let stopped = ctx
        .client()
        .try_transact(ctx.session(), |session| {
            let was_running = session.started;
            session.apply(SessionEvent::Stop(Outcome::None))?;
            Ok::<_, ServiceError>(was_running)
        })
        .await?;

    if stopped {
        info!("game stopped");
    }
    game_status(ctx)
}

/// Move straight to the next round, skipping whatever is left of the current one.
pub async fn next_round(ctx: &GameContext) -> Result<GameStatus, ServiceError> {
    let now = ctx.server_now();
    let settings = ctx.settings().get()?;
    let round = ctx
        .client()
        .try_transact((ctx.session(), ctx.battle()), |(session, battle)| {
            if !rules::next_round(&settings, session, battle, now) {
                return Err(ServiceError::InvalidState(
                    "rounds only advance while a game is running".into(),
                ));
            }
            Ok(session.round)
        })
        .await?;

    info!(round, "round advanced");
    game_status(ctx)
}

/// Evaluate the controller rules once. Only the elected controller calls this.
pub async fn controller_tick(
    ctx: &GameContext,
    now: u64,
) -> Result<Option<TickEvent>, ServiceError> {
    if !ctx.is_connected() {
        return Ok(None);
    }
    let settings = ctx.settings().get()?;
    let event = ctx
        .client()
        .transact((ctx.session(), ctx.battle()), |(session, battle)| {
            rules::controller_tick(&settings, session, battle, now)
        })
        .await?;

    match event {
        Some(TickEvent::EnemyAttack(report)) => {
            debug!(absorbed = report.absorbed, dealt = report.dealt, "enemy attacked");
        }
        Some(event) => info!(?event, now, "controller advanced the game"),
        None => {}
    }
    Ok(event)
}

/// Controller task driving the game rules on every heartbeat.
pub struct GameTick {
    ctx: SharedContext,
}

impl GameTick {
    pub fn new(ctx: SharedContext) -> Self {
        Self { ctx }
    }
}

impl ControllerTask for GameTick {
    fn name(&self) -> &'static str {
        "game-tick"
    }

    fn tick(&self, now: u64) -> BoxFuture<'_, Result<(), ServiceError>> {
        async move {
            controller_tick(&self.ctx, now).await?;
            Ok(())
        }
        .boxed()
    }
}

/// Elect the global controller over the host store's connections and run the
/// game rules whenever this client holds the role.
pub fn spawn_global_controller(ctx: &SharedContext) -> ControllerHandle {
    let election = Election::new(
        ctx.client().clone(),
        ctx.host().clone(),
        ctx.host().clone(),
        "global",
    );
    let timer = ServerTimer::spawn(ctx.client().clone(), ctx.config().server_time_tick);
    let tasks: Vec<Arc<dyn ControllerTask>> = vec![Arc::new(GameTick::new(ctx.clone()))];
    controller::spawn(election, timer, tasks)
}

/// Team strikes the enemy.
pub async fn attack(ctx: &GameContext) -> Result<DamageReport, ServiceError> {
    let report = in_battle(ctx, |battle| {
        if battle.enemy.is_defeated() {
            return Err(ServiceError::InvalidState("the enemy is already down".into()));
        }
        Ok(battle.team_attack())
    })
    .await?;

    debug!(dealt = report.dealt, absorbed = report.absorbed, "team attacked");
    Ok(report)
}

/// Heal the team, returning the health actually restored.
pub async fn heal(ctx: &GameContext, request: CombatActionRequest) -> Result<u32, ServiceError> {
    request.validate()?;
    in_battle(ctx, |battle| Ok(battle.team.heal(request.amount))).await
}

/// Raise the team's armor until the next round.
pub async fn block(ctx: &GameContext, request: CombatActionRequest) -> Result<u32, ServiceError> {
    request.validate()?;
    in_battle(ctx, |battle| {
        battle.team.add_armor(request.amount);
        Ok(battle.team.armor())
    })
    .await
}

/// Train strength for this round; returns the new damage.
pub async fn train_strength(
    ctx: &GameContext,
    request: CombatActionRequest,
) -> Result<u32, ServiceError> {
    request.validate()?;
    in_battle(ctx, |battle| {
        battle.team.add_strength(request.amount);
        Ok(battle.team.damage())
    })
    .await
}

/// Train dexterity for this round; returns the new armor.
pub async fn train_dexterity(
    ctx: &GameContext,
    request: CombatActionRequest,
) -> Result<u32, ServiceError> {
    request.validate()?;
    in_battle(ctx, |battle| {
        battle.team.add_dexterity(request.amount);
        Ok(battle.team.armor())
    })
    .await
}

/// Pick the reward for the round just cleared. The first pick wins.
pub async fn choose_reward(ctx: &GameContext, reward: Reward) -> Result<(), ServiceError> {
    ctx.client()
        .try_transact((ctx.session(), ctx.battle()), |(session, battle)| {
            if !session.in_intermission() {
                return Err(ServiceError::InvalidState(
                    "rewards can only be chosen between rounds".into(),
                ));
            }
            if !battle.claim_reward(session.round, reward) {
                return Err(ServiceError::InvalidState(
                    "a reward was already chosen for this round".into(),
                ));
            }
            Ok(())
        })
        .await?;

    info!(?reward, "reward chosen");
    Ok(())
}

/// Current game snapshot as seen by this client.
pub fn game_status(ctx: &GameContext) -> Result<GameStatus, ServiceError> {
    let settings = ctx.settings().get()?;
    let session = ctx.session().get()?;
    let battle = ctx.battle().get()?;
    Ok(GameStatus::build(
        &settings,
        &session,
        &battle,
        ctx.server_now(),
    ))
}

/// Run a player action against the battle while a round is being fought.
async fn in_battle<F, R>(ctx: &GameContext, action: F) -> Result<R, ServiceError>
where
    F: FnOnce(&mut Battle) -> Result<R, ServiceError>,
{
    ctx.client()
        .try_transact((ctx.session(), ctx.battle()), |(session, battle)| {
            ensure_fighting(session)?;
            action(battle)
        })
        .await
}

fn ensure_fighting(session: &GameSession) -> Result<(), ServiceError> {
    if !session.started {
        return Err(ServiceError::InvalidState("no game is running".into()));
    }
    if session.in_intermission() {
        return Err(ServiceError::InvalidState(
            "the round is over, wait for the next one".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{services::test_support::context, sync::SyncHub};

    fn amount(amount: u32) -> CombatActionRequest {
        CombatActionRequest { amount }
    }

    #[tokio::test]
    async fn actions_require_a_running_game() {
        let hub = SyncHub::new();
        let ctx = context(&hub, "host").await;

        let err = attack(&ctx).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));

        start_game(&ctx).await.unwrap();
        let report = attack(&ctx).await.unwrap();
        assert_eq!(report.dealt, ctx.config().team.base_damage);
    }

    #[tokio::test]
    async fn out_of_range_amounts_are_rejected() {
        let hub = SyncHub::new();
        let ctx = context(&hub, "host").await;
        start_game(&ctx).await.unwrap();

        assert!(matches!(
            heal(&ctx, amount(0)).await,
            Err(ServiceError::InvalidInput(_))
        ));
        assert!(matches!(
            block(&ctx, amount(51)).await,
            Err(ServiceError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn training_keeps_derived_stats_in_sync() {
        let hub = SyncHub::new();
        let ctx = context(&hub, "host").await;
        start_game(&ctx).await.unwrap();

        let damage = train_strength(&ctx, amount(5)).await.unwrap();
        assert_eq!(damage, ctx.config().team.base_damage + 5);

        let armor = train_dexterity(&ctx, amount(3)).await.unwrap();
        assert_eq!(armor, ctx.config().team.base_armor + 3);

        let battle = ctx.battle().get().unwrap();
        assert_eq!(battle.team.damage(), damage);
        assert_eq!(battle.team.armor(), armor);
    }

    #[tokio::test]
    async fn start_while_running_is_rejected_and_stop_is_idempotent() {
        let hub = SyncHub::new();
        let ctx = context(&hub, "host").await;

        start_game(&ctx).await.unwrap();
        assert!(matches!(
            start_game(&ctx).await,
            Err(ServiceError::InvalidState(_))
        ));

        stop_game(&ctx).await.unwrap();
        let before = ctx.session().get().unwrap();
        stop_game(&ctx).await.unwrap();
        assert_eq!(ctx.session().get().unwrap(), before);
        assert!(!before.started);
        assert_eq!(before.start_timestamp, 0);
    }

    #[tokio::test]
    async fn rewards_only_between_rounds_and_once() {
        let hub = SyncHub::new();
        let ctx = context(&hub, "host").await;
        start_game(&ctx).await.unwrap();

        assert!(choose_reward(&ctx, Reward::Heal).await.is_err());

        ctx.client()
            .transact(ctx.session(), |session| {
                session.round_end_timestamp = Some(u64::MAX)
            })
            .await
            .unwrap();

        choose_reward(&ctx, Reward::Armor).await.unwrap();
        assert!(choose_reward(&ctx, Reward::Heal).await.is_err());
        assert_eq!(
            ctx.battle().get().unwrap().pending_reward,
            Some(Reward::Armor)
        );
    }

    #[tokio::test]
    async fn tick_stops_an_expired_game() {
        let hub = SyncHub::new();
        let ctx = context(&hub, "host").await;
        start_game(&ctx).await.unwrap();

        let start = ctx.session().get().unwrap().start_timestamp;
        let duration = ctx.settings().get().unwrap().game_duration_ms();

        let event = controller_tick(&ctx, start + duration + 1).await.unwrap();
        assert_eq!(event, Some(TickEvent::Expired));
        assert!(!ctx.session().get().unwrap().started);

        let again = controller_tick(&ctx, start + duration + 2).await.unwrap();
        assert_eq!(again, None);
    }
}
