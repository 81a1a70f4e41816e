//! Watcher manager lifecycle: start/stop, status queries, status HTTP.

use aegis_events::{EventBus, SubscriptionFilter};
use aegis_test_utils::{TempLog, lines};
use logwatcher::config::{ServerEntry, StoreChoice};
use logwatcher::manager::{ManagerConfig, WatcherManager};
use logwatcher::source::SourceConfig;
use logwatcher::status::WatcherStatus;
use logwatcher::status_http;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

fn entry_for(log: &TempLog, name: &str) -> ServerEntry {
    ServerEntry {
        id: Uuid::new_v4(),
        name: name.to_owned(),
        source: SourceConfig::Local {
            path: log.path().to_path_buf(),
            read_from_start: true,
        },
        store: StoreChoice::Memory,
    }
}

async fn wait_for_status(manager: &WatcherManager, id: Uuid, wanted: WatcherStatus) {
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        if manager.status(id).await == Some(wanted) {
            return;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "status never became {wanted:?} (now {:?})",
            manager.status(id).await
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn lifecycle_start_run_stop() {
    let log = TempLog::new();
    let manager = WatcherManager::new(EventBus::default(), ManagerConfig::default());
    let entry = entry_for(&log, "lifecycle");
    let id = entry.id;

    manager.start(entry.clone()).await.unwrap();
    wait_for_status(&manager, id, WatcherStatus::Running).await;
    assert_eq!(manager.list_running().await.len(), 1);

    // Events flow while running.
    let sub = manager.bus().subscribe(SubscriptionFilter::all());
    log.append_line(&lines::tick_rate(2, "50.0"));
    let envelope = tokio::time::timeout(Duration::from_secs(5), sub.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(envelope.server_id, id);

    manager.stop(id).await.unwrap();
    assert!(manager.status(id).await.is_none());
    assert!(manager.list_running().await.is_empty());

    // A stopped server can be started again.
    manager.start(entry).await.unwrap();
    wait_for_status(&manager, id, WatcherStatus::Running).await;
    manager.stop_all().await;
}

#[tokio::test]
async fn two_servers_run_independently() {
    let log_a = TempLog::new();
    let log_b = TempLog::new();
    let manager = WatcherManager::new(EventBus::default(), ManagerConfig::default());
    let entry_a = entry_for(&log_a, "a");
    let entry_b = entry_for(&log_b, "b");
    manager.start(entry_a.clone()).await.unwrap();
    manager.start(entry_b.clone()).await.unwrap();

    let sub = manager
        .bus()
        .subscribe(SubscriptionFilter::all().server(entry_b.id));
    log_a.append_line(&lines::tick_rate(1, "10.0"));
    log_b.append_line(&lines::tick_rate(1, "20.0"));

    let envelope = tokio::time::timeout(Duration::from_secs(5), sub.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(envelope.server_id, entry_b.id);

    // Stopping one leaves the other running.
    manager.stop(entry_a.id).await.unwrap();
    assert_eq!(manager.list_running().await.len(), 1);
    manager.stop_all().await;
}

async fn http_get(addr: std::net::SocketAddr, path: &str) -> String {
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(format!("GET {path} HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n").as_bytes())
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

#[tokio::test]
async fn status_http_reports_watchers_and_metrics() {
    let log = TempLog::new();
    let manager = WatcherManager::new(EventBus::default(), ManagerConfig::default());
    let entry = entry_for(&log, "http-visible");
    let id = entry.id;
    manager.start(entry).await.unwrap();

    let addr = status_http::serve("127.0.0.1:0", Arc::clone(&manager))
        .await
        .unwrap();

    let status = http_get(addr, "/api/v1/status").await;
    assert!(status.starts_with("HTTP/1.1 200"));
    assert!(status.contains("http-visible"));
    assert!(status.contains(&id.to_string()));

    let metrics = http_get(addr, &format!("/api/v1/servers/{id}/metrics")).await;
    assert!(metrics.starts_with("HTTP/1.1 200"));
    assert!(metrics.contains("total_lines"));

    manager.stop_all().await;
}
