//! Per-server dispatch loop.
//!
//! One dispatcher task per watched server: receive a line, find the first
//! matching parser, run its handler, record metrics.  Handler failures are
//! logged and the line dropped; nothing a single line carries may take the
//! loop down.  Within one server every handler invocation is totally
//! ordered by line receipt.

use crate::metrics::MetricsCollector;
use crate::parser::{HandlerCtx, ParserSet, handlers};
use crate::status::StatusCell;
use crate::store::EventStore;
use aegis_events::EventBus;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};
use uuid::Uuid;

pub struct Dispatcher {
    server_id: Uuid,
    parsers: ParserSet,
    store: Arc<dyn EventStore>,
    bus: EventBus,
    metrics: Arc<MetricsCollector>,
    status: StatusCell,
}

impl Dispatcher {
    pub fn new(
        server_id: Uuid,
        parsers: ParserSet,
        store: Arc<dyn EventStore>,
        bus: EventBus,
        metrics: Arc<MetricsCollector>,
        status: StatusCell,
    ) -> Self {
        Dispatcher {
            server_id,
            parsers,
            store,
            bus,
            metrics,
            status,
        }
    }

    /// Run until shutdown fires or the line channel closes.
    pub async fn run(self, mut lines: mpsc::Receiver<String>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                line = lines.recv() => {
                    match line {
                        None => break,
                        Some(line) => self.dispatch(&line).await,
                    }
                }
            }
        }
        debug!(server_id = %self.server_id, "dispatcher exited");
    }

    /// Process one line.  Public so tests can drive the loop directly.
    pub async fn dispatch(&self, line: &str) {
        self.metrics.record_line();
        let Some((rule, caps)) = self.parsers.find_match(line) else {
            return;
        };
        let started = Instant::now();
        let ctx = HandlerCtx {
            server_id: self.server_id,
            store: self.store.as_ref(),
            bus: &self.bus,
            raw_line: line,
        };
        if let Err(e) = handlers::handle(rule, &ctx, &caps).await {
            warn!(server_id = %self.server_id, error = %e, "handler dropped line");
        }
        self.metrics.record_match(started.elapsed());
    }

    pub fn status(&self) -> &StatusCell {
        &self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use aegis_events::{Event, SubscriptionFilter};

    fn rig() -> (Dispatcher, aegis_events::Subscription, Arc<MemoryStore>) {
        let bus = EventBus::default();
        let sub = bus.subscribe(SubscriptionFilter::all());
        let store = Arc::new(MemoryStore::new());
        let dispatcher = Dispatcher::new(
            Uuid::new_v4(),
            ParserSet::standard(),
            store.clone(),
            bus,
            Arc::new(MetricsCollector::default()),
            StatusCell::new(),
        );
        (dispatcher, sub, store)
    }

    #[tokio::test]
    async fn unmatched_lines_change_nothing() {
        let (dispatcher, sub, store) = rig();
        dispatcher.dispatch("").await;
        dispatcher.dispatch("[t][ 1]LogSquad: something unrecognised").await;
        assert!(sub.try_recv().is_none());
        assert!(store.scan_players().await.unwrap().is_empty());
        let snap = dispatcher.metrics.snapshot();
        assert_eq!(snap.total_lines, 2);
        assert_eq!(snap.total_matching_lines, 0);
    }

    #[tokio::test]
    async fn events_are_published_in_line_order() {
        let (dispatcher, sub, _store) = rig();
        for rate in ["10.0", "20.0", "30.0"] {
            dispatcher
                .dispatch(&format!(
                    "[t][ 2]LogSquad: USQGameState: Server Tick Rate: {rate}"
                ))
                .await;
        }
        for rate in ["10.0", "20.0", "30.0"] {
            match sub.recv().await.unwrap().event {
                Event::TickRate(t) => assert_eq!(t.tick_rate, rate),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn run_drains_queue_and_exits_on_channel_close() {
        let (dispatcher, sub, _store) = rig();
        let (tx, rx) = mpsc::channel(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tx.send("[t][ 2]LogSquad: USQGameState: Server Tick Rate: 44.0".to_owned())
            .await
            .unwrap();
        drop(tx);
        dispatcher.run(rx, shutdown_rx).await;
        assert!(matches!(
            sub.recv().await.unwrap().event,
            Event::TickRate(_)
        ));
    }
}
