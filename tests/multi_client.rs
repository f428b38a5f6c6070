use std::time::Duration;

use futures::future::join_all;
use party_sync::{
    config::AppConfig,
    dto::{player::SetPlayerNameRequest, settings::ChangeGameDurationRequest},
    services::{
        election::{Election, elect},
        game_service, lobby_service, player_service, settings_service,
    },
    state::{GameContext, SharedContext, stores::ClientMode},
    sync::{ServerClock, SharedHub, SyncHub},
};
use tokio::time::{sleep, timeout};

async fn player(hub: &SharedHub, client_id: &str) -> SharedContext {
    GameContext::connect(hub.connect(client_id), ClientMode::Player, AppConfig::default())
        .await
        .unwrap()
}

/// Poll `check` until it holds, failing the test after a few seconds.
async fn eventually(mut check: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !check() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never held");
}

#[tokio::test]
async fn replicas_converge_on_disjoint_writes() {
    let hub = SyncHub::new();
    let mut clients = Vec::new();
    for index in 0..4 {
        clients.push(player(&hub, &format!("device-{index}")).await);
    }

    join_all(clients.iter().enumerate().map(|(index, ctx)| async move {
        for round in 0..10 {
            ctx.client()
                .transact(ctx.players(), |registry| {
                    registry
                        .players
                        .entry(format!("device-{index}"))
                        .or_default()
                        .name = format!("p{index}-{round}");
                })
                .await
                .unwrap();
        }
    }))
    .await;

    eventually(|| {
        let reference = clients[0].players().get().unwrap();
        reference.players.len() == 4
            && reference.players.values().all(|p| p.name.ends_with("-9"))
            && clients
                .iter()
                .all(|ctx| ctx.players().get().unwrap() == reference)
    })
    .await;
}

#[tokio::test]
async fn global_controller_settles_and_fails_over() {
    let hub = SyncHub::new();
    let mut clients = Vec::new();
    for index in 0..3 {
        clients.push(player(&hub, &format!("device-{index}")).await);
    }
    let elections: Vec<_> = clients
        .iter()
        .map(|ctx| {
            Election::new(
                ctx.client().clone(),
                ctx.host().clone(),
                ctx.host().clone(),
                "global",
            )
        })
        .collect();

    eventually(|| clients.iter().all(|ctx| ctx.host().connections().connection_ids.len() == 3))
        .await;
    let live = clients[0].host().connections().connection_ids;
    let expected = elect(&live);

    for election in &elections {
        election.check().await.unwrap();
    }
    eventually(|| elections.iter().all(|e| e.current() == expected)).await;
    assert_eq!(
        elections.iter().filter(|e| e.is_controller()).count(),
        1,
        "exactly one controller"
    );

    // A settled election is left alone.
    for election in &elections {
        assert_eq!(election.check().await.unwrap(), None);
    }

    let leader = clients
        .iter()
        .position(|ctx| *ctx.client().connection_id() == expected)
        .unwrap();
    clients[leader].client().disconnect();

    let survivors: Vec<usize> = (0..clients.len()).filter(|i| *i != leader).collect();
    eventually(|| {
        survivors
            .iter()
            .all(|i| !clients[*i].host().connections().connection_ids.contains(&expected))
    })
    .await;

    let remaining = clients[survivors[0]].host().connections().connection_ids;
    let successor = elect(&remaining);
    assert_ne!(successor, expected);
    for i in &survivors {
        elections[*i].check().await.unwrap();
    }
    eventually(|| survivors.iter().all(|i| elections[*i].current() == successor)).await;
}

#[tokio::test(start_paused = true)]
async fn controller_stops_the_game_once_time_runs_out() {
    // No enemy attacks, so only the clock can end this game.
    let config = AppConfig {
        enemy_attack_interval_ms: 3_600_000,
        ..AppConfig::default()
    };
    let hub = SyncHub::with_clock(ServerClock::starting_at(0));
    let host = GameContext::connect(hub.connect("host"), ClientMode::Host, config.clone())
        .await
        .unwrap();
    let watcher = GameContext::connect(hub.connect("device-1"), ClientMode::Player, config)
        .await
        .unwrap();

    settings_service::change_game_duration(&host, ChangeGameDurationRequest { minutes: 1 })
        .await
        .unwrap();
    let _controllers = [
        game_service::spawn_global_controller(&host),
        game_service::spawn_global_controller(&watcher),
    ];

    game_service::start_game(&host).await.unwrap();
    let session = host.session().get().unwrap();
    assert!(session.started);
    assert!(session.start_timestamp < 1_000);
    eventually(|| watcher.session().get().unwrap().started).await;

    sleep(Duration::from_millis(59_000)).await;
    assert!(host.session().get().unwrap().started);

    sleep(Duration::from_millis(3_000)).await;
    eventually(|| {
        [&host, &watcher].iter().all(|ctx| {
            let session = ctx.session().get().unwrap();
            !session.started && session.start_timestamp == 0
        })
    })
    .await;
}

#[tokio::test]
async fn player_name_updates_local_and_shared_stores_together() {
    let hub = SyncHub::new();
    let ada = player(&hub, "device-ada").await;
    let other = player(&hub, "device-other").await;

    player_service::set_player_name(
        &ada,
        SetPlayerNameRequest {
            name: " Ada ".into(),
        },
    )
    .await
    .unwrap();

    assert_eq!(ada.local_player().get().unwrap().name, "Ada");
    eventually(|| {
        other
            .players()
            .get()
            .unwrap()
            .players
            .get("device-ada")
            .is_some_and(|profile| profile.name == "Ada")
    })
    .await;
    assert_eq!(other.local_player().get().unwrap().name, "");

    eventually(|| {
        player_service::players_with_status(&other)
            .unwrap()
            .iter()
            .any(|p| p.id == "device-ada" && p.is_online)
    })
    .await;

    ada.client().disconnect();
    eventually(|| {
        player_service::players_with_status(&other)
            .unwrap()
            .iter()
            .any(|p| p.id == "device-ada" && !p.is_online)
    })
    .await;
}

#[tokio::test]
async fn lobby_members_share_a_counter_and_inherit_the_host_role() {
    let hub = SyncHub::new();
    let creator = player(&hub, "device-1").await;
    let guest = player(&hub, "device-2").await;

    let created = lobby_service::create_lobby(&creator).await.unwrap();
    assert!(created.is_host);

    eventually(|| {
        guest
            .lobbies()
            .get()
            .unwrap()
            .lobbies
            .contains_key(&created.code)
    })
    .await;

    let joined = lobby_service::join_lobby(&guest, &created.code.to_lowercase())
        .await
        .unwrap();
    assert_eq!(joined.code, created.code);
    assert!(!joined.is_host);
    assert_eq!(joined.host_connection_id, *creator.client().connection_id());

    lobby_service::increment_button_presses(&creator).await.unwrap();
    // The guest must see the first press, or its increment overwrites it.
    let mut seen = 0;
    for _ in 0..1_000 {
        seen = lobby_service::lobby_status(&guest)
            .await
            .unwrap()
            .unwrap()
            .number_of_button_presses;
        if seen == 1 {
            break;
        }
        sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(seen, 1, "guest never saw the first press");
    lobby_service::increment_button_presses(&guest).await.unwrap();

    let mut statuses = Vec::new();
    for _ in 0..1_000 {
        statuses = vec![
            lobby_service::lobby_status(&creator).await.unwrap().unwrap(),
            lobby_service::lobby_status(&guest).await.unwrap().unwrap(),
        ];
        if statuses
            .iter()
            .all(|s| s.number_of_button_presses == 2 && s.connection_ids.len() == 2)
        {
            break;
        }
        sleep(Duration::from_millis(5)).await;
    }
    assert!(statuses.iter().all(|s| s.number_of_button_presses == 2));

    lobby_service::leave_lobby(&creator).await.unwrap();

    let mut promoted = false;
    for _ in 0..1_000 {
        if lobby_service::lobby_status(&guest).await.unwrap().unwrap().is_host {
            promoted = true;
            break;
        }
        sleep(Duration::from_millis(5)).await;
    }
    assert!(promoted, "guest never became lobby host");
}
