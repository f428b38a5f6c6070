//! party-sync demo binary: a host, a presenter and a handful of simulated
//! players share one in-process hub and play a game to the end.

use std::time::Duration;

use anyhow::Context;
use party_sync::{
    config::AppConfig,
    dto::{game::CombatActionRequest, player::SetPlayerNameRequest},
    error::ServiceError,
    services::{controller::ControllerHandle, game_service, player_service},
    state::{GameContext, SharedContext, combat::Reward, stores::ClientMode},
    sync::{ClientOptions, SharedHub, SyncClient, SyncHub},
};
use rand::Rng;
use tokio::{task::JoinSet, time::sleep};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const PLAYER_NAMES: [&str; 8] = [
    "Ada", "Brutus", "Cleo", "Dorian", "Elke", "Faro", "Gus", "Hana",
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let hub = SyncHub::new();

    let host = connect(&hub, "host", ClientMode::Host, &config)
        .await
        .context("connecting the host")?;
    let presenter = connect(&hub, "presenter", ClientMode::Presenter, &config)
        .await
        .context("connecting the presenter")?;

    let mut players = Vec::with_capacity(config.simulated_clients);
    for index in 0..config.simulated_clients {
        let client_id = format!("player-{index}");
        let player = connect(&hub, &client_id, ClientMode::Player, &config)
            .await
            .with_context(|| format!("connecting {client_id}"))?;
        let name = PLAYER_NAMES[index % PLAYER_NAMES.len()].to_owned();
        player_service::set_player_name(&player, SetPlayerNameRequest { name })
            .await
            .with_context(|| format!("naming {client_id}"))?;
        players.push(player);
    }

    let contexts: Vec<SharedContext> = [host.clone(), presenter.clone()]
        .into_iter()
        .chain(players.iter().cloned())
        .collect();
    let controllers: Vec<ControllerHandle> = contexts
        .iter()
        .map(game_service::spawn_global_controller)
        .collect();

    game_service::start_game(&host)
        .await
        .context("starting the game")?;

    let mut actions = JoinSet::new();
    for player in &players {
        actions.spawn(play(player.clone()));
    }

    tokio::select! {
        _ = sleep(config.simulation) => info!("simulation time is up"),
        _ = wait_for_game_end(&host) => info!("game ended"),
        _ = shutdown_signal() => info!("interrupted"),
    }

    actions.abort_all();
    drop(controllers);
    // Let the last patches reach every replica.
    sleep(Duration::from_millis(100)).await;

    report(&contexts)?;
    Ok(())
}

async fn connect(
    hub: &SharedHub,
    client_id: &str,
    mode: ClientMode,
    config: &AppConfig,
) -> Result<SharedContext, ServiceError> {
    let options = ClientOptions {
        local_store_dir: config
            .local_store_dir
            .as_ref()
            .map(|dir| dir.join(client_id)),
        ..ClientOptions::default()
    };
    let client = SyncClient::connect_with(hub, client_id, options);
    Ok(GameContext::connect(client, mode, config.clone()).await?)
}

/// Attack most of the time, heal or train now and then.
async fn play(ctx: SharedContext) {
    loop {
        let (pause, roll, amount) = {
            let mut rng = rand::rng();
            (
                rng.random_range(300..1_200u64),
                rng.random_range(0..10u8),
                rng.random_range(1..=10u32),
            )
        };
        sleep(Duration::from_millis(pause)).await;

        let request = CombatActionRequest { amount };
        let result = match roll {
            0..=5 => game_service::attack(&ctx).await.map(|_| ()),
            6 => game_service::heal(&ctx, request).await.map(|_| ()),
            7 => game_service::block(&ctx, request).await.map(|_| ()),
            8 => game_service::train_strength(&ctx, request).await.map(|_| ()),
            _ => game_service::choose_reward(&ctx, random_reward()).await,
        };
        if let Err(err) = result {
            debug!(client_id = %ctx.client().client_id(), error = %err, "action skipped");
        }
    }
}

fn random_reward() -> Reward {
    match rand::rng().random_range(0..3u8) {
        0 => Reward::Heal,
        1 => Reward::Armor,
        _ => Reward::Skip,
    }
}

async fn wait_for_game_end(host: &SharedContext) {
    let mut changes = host.session().changes();
    loop {
        let stopped = host
            .session()
            .get()
            .map(|session| !session.started)
            .unwrap_or(false);
        if stopped {
            return;
        }
        if changes.changed().await.is_err() {
            return;
        }
    }
}

/// Log the final state of every client and whether they agree.
fn report(contexts: &[SharedContext]) -> anyhow::Result<()> {
    let reference = game_service::game_status(&contexts[0]).context("reading final state")?;
    info!(
        round = reference.round,
        outcome = ?reference.outcome,
        team_health = reference.team.health,
        enemy_health = reference.enemy.health,
        "final state"
    );

    for ctx in contexts {
        let battle = ctx.battle().get()?;
        let session = ctx.session().get()?;
        let converged = battle == contexts[0].battle().get()?
            && session == contexts[0].session().get()?;
        if converged {
            debug!(client_id = %ctx.client().client_id(), "replica converged");
        } else {
            warn!(client_id = %ctx.client().client_id(), "replica diverged");
        }
    }

    for player in player_service::players_with_status(&contexts[0])? {
        info!(id = %player.id, name = %player.name, online = player.is_online, "player");
    }
    Ok(())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,party_sync=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C.
async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}
