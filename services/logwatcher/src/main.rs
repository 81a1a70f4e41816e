// logwatcher: Tails game-server logs, reconstructs typed events, and fans
// them out to in-process subscribers.

use aegis_events::EventBus;
use logwatcher::config;
use logwatcher::manager::{ManagerConfig, WatcherManager};
use logwatcher::status_http;
use std::path::Path;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "logwatcher starting");

    let cfg = {
        let loaded = match std::env::args().nth(1) {
            Some(path) => config::load_config_from_path(Path::new(&path)),
            None => config::load_config(),
        };
        match loaded {
            Ok(cfg) => {
                info!(servers = cfg.servers.len(), "config loaded");
                cfg
            }
            Err(e) => {
                eprintln!("FATAL: failed to load config: {e}");
                std::process::exit(1);
            }
        }
    };

    let bus = EventBus::new(cfg.bus_subscriber_queue_size);
    let manager = WatcherManager::new(
        bus,
        ManagerConfig {
            dispatcher_queue_size: cfg.dispatcher_queue_size,
            metrics_window: cfg.metrics_window,
            health_check_interval: cfg.health_check_interval,
        },
    );

    for server in cfg.servers {
        let name = server.name.clone();
        if let Err(e) = manager.start(server).await {
            error!(server = %name, error = %e, "failed to start watcher");
        }
    }

    if let Some(interval) = cfg.health_check_interval {
        manager.spawn_health_loop(interval);
    }

    if let Some(bind) = &cfg.status_http_bind {
        match status_http::serve(bind, manager.clone()).await {
            Ok(addr) => info!(%addr, "status http listening"),
            Err(e) => error!(error = %e, "status http failed to bind"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "signal handler failed");
    }
    info!("shutting down");
    manager.stop_all().await;
}
