//! End-to-end pipeline scenarios: file tail → dispatcher → bus.

use aegis_events::{Event, EventBus, EventEnvelope, SubscriptionFilter, Subscription};
use aegis_test_utils::{TempLog, lines};
use logwatcher::config::{ServerEntry, StoreChoice};
use logwatcher::manager::{ManagerConfig, WatcherManager};
use logwatcher::source::SourceConfig;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn manager() -> Arc<WatcherManager> {
    WatcherManager::new(
        EventBus::new(256),
        ManagerConfig {
            dispatcher_queue_size: 100,
            metrics_window: Duration::from_secs(60),
            health_check_interval: None,
        },
    )
}

fn entry_for(log: &TempLog) -> ServerEntry {
    ServerEntry {
        id: Uuid::new_v4(),
        name: "itest".to_owned(),
        source: SourceConfig::Local {
            path: log.path().to_path_buf(),
            read_from_start: true,
        },
        store: StoreChoice::Memory,
    }
}

async fn recv(sub: &Subscription) -> EventEnvelope {
    tokio::time::timeout(Duration::from_secs(5), sub.recv())
        .await
        .expect("timed out waiting for event")
        .expect("subscription cancelled")
}

#[tokio::test]
async fn login_join_succession_binds_the_suffix() {
    let log = TempLog::new();
    let manager = manager();
    let sub = manager.bus().subscribe(SubscriptionFilter::all());
    let entry = entry_for(&log);
    let server_id = entry.id;
    manager.start(entry).await.unwrap();

    log.append_line(&lines::post_login(5, "PC42", "10.0.0.7", "E1", "S1"));
    log.append_line(&lines::join_succeeded(5, "Alpha"));

    let envelope = recv(&sub).await;
    assert_eq!(envelope.server_id, server_id);
    match envelope.event {
        Event::PlayerConnected(c) => {
            assert_eq!(c.eos_id, "E1");
            assert_eq!(c.steam_id, "S1");
            assert_eq!(c.ip, "10.0.0.7");
            assert_eq!(c.player_controller, "PC42");
        }
        other => panic!("expected PlayerConnected, got {other:?}"),
    }
    match recv(&sub).await.event {
        Event::PlayerJoinSucceeded(j) => {
            assert_eq!(j.suffix, "Alpha");
            assert_eq!(j.eos_id, "E1");
            assert_eq!(j.steam_id, "S1");
        }
        other => panic!("expected PlayerJoinSucceeded, got {other:?}"),
    }

    let metrics = manager.metrics(server_id).await.unwrap();
    assert_eq!(metrics.total_matching_lines, 2);
    assert!(metrics.total_lines >= 2);

    manager.stop_all().await;
}

#[tokio::test]
async fn match_boundary_emits_round_ended_then_new_game() {
    let log = TempLog::new();
    let manager = manager();
    let sub = manager.bus().subscribe(SubscriptionFilter::all());
    manager.start(entry_for(&log)).await.unwrap();

    log.append_line(&lines::tickets(1, 1, "USA", "won", 300, "L", "M"));
    log.append_line(&lines::match_winner(2, "USA", "L"));
    log.append_line(&lines::post_match(3));
    log.append_line(&lines::bringing_world(4, "Next", "Next_Main"));

    match recv(&sub).await.event {
        Event::RoundTickets(t) => {
            assert_eq!(t.action, "won");
            assert_eq!(t.tickets, "300");
        }
        other => panic!("unexpected {other:?}"),
    }
    match recv(&sub).await.event {
        Event::RoundEnded(r) => {
            assert_eq!(r.winner.as_deref(), Some("USA"));
            assert_eq!(r.layer.as_deref(), Some("L"));
        }
        other => panic!("unexpected {other:?}"),
    }
    match recv(&sub).await.event {
        Event::RoundEnded(r) => {
            assert_eq!(
                r.winner_tickets.expect("winner tickets").faction,
                "USA"
            );
            assert!(r.loser_tickets.is_none());
        }
        other => panic!("unexpected {other:?}"),
    }
    match recv(&sub).await.event {
        Event::NewGame(g) => {
            assert_eq!(g.dlc, "Game");
            assert_eq!(g.map_classname, "Next");
            assert_eq!(g.layer_classname, "Next_Main");
            assert_eq!(g.winner.as_deref(), Some("USA"));
            assert_eq!(g.layer.as_deref(), Some("L"));
        }
        other => panic!("unexpected {other:?}"),
    }

    manager.stop_all().await;
}

#[tokio::test]
async fn slow_subscriber_keeps_newest_events_and_counts_drops() {
    let log = TempLog::new();
    let manager = manager();
    let sub = manager
        .bus()
        .subscribe(SubscriptionFilter::all().queue_capacity(2));
    manager.start(entry_for(&log)).await.unwrap();

    for i in 0..10 {
        log.append_line(&lines::tick_rate(2, &format!("{i}.0")));
    }

    // Do not read until all ten are published.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while sub.drop_count() < 8 {
        assert!(
            std::time::Instant::now() < deadline,
            "drops never reached 8 (at {})",
            sub.drop_count()
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    match recv(&sub).await.event {
        Event::TickRate(t) => assert_eq!(t.tick_rate, "8.0"),
        other => panic!("unexpected {other:?}"),
    }
    match recv(&sub).await.event {
        Event::TickRate(t) => assert_eq!(t.tick_rate, "9.0"),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(sub.drop_count(), 8);

    manager.stop_all().await;
}

#[tokio::test]
async fn unmatched_and_invalid_lines_publish_nothing() {
    let log = TempLog::new();
    let manager = manager();
    let sub = manager.bus().subscribe(SubscriptionFilter::all());
    manager.start(entry_for(&log)).await.unwrap();

    // A line no parser knows, and a damage line with an INVALID attacker.
    log.append_line("[t][ 1]LogSquad: something unrecognised entirely");
    log.append_line("[t][ 9]LogSquad: Player:Alpha ActualDamage=12.0 from nullptr (Online IDs: EOS: INVALID-0 steam: 765 | Player Controller ID: PC3)caused by BP_Mortar_C");
    log.append_line(&lines::tick_rate(2, "48.0"));

    // The first event through is the tick rate: nothing was published for
    // the two lines before it.
    match recv(&sub).await.event {
        Event::TickRate(t) => assert_eq!(t.tick_rate, "48.0"),
        other => panic!("unexpected {other:?}"),
    }

    manager.stop_all().await;
}

#[tokio::test]
async fn kind_filtered_subscribers_see_only_their_kind() {
    let log = TempLog::new();
    let manager = manager();
    let sub = manager
        .bus()
        .subscribe(SubscriptionFilter::all().kind(aegis_events::EventKind::NewGame));
    manager.start(entry_for(&log)).await.unwrap();

    log.append_line(&lines::tick_rate(2, "40.0"));
    log.append_line(&lines::bringing_world(4, "Narva", "Narva_AAS_v2"));

    match recv(&sub).await.event {
        Event::NewGame(g) => assert_eq!(g.map_classname, "Narva"),
        other => panic!("unexpected {other:?}"),
    }

    manager.stop_all().await;
}
