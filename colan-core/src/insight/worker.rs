//! The worker run-loop driving reconciliation.
//!
//! Passes run on a fixed interval and on explicit wake signals (e.g. a
//! change notification from the bus). Shutdown is graceful: an in-flight
//! pass finishes before the loop exits.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::config::InsightConfig;
use crate::insight::reconcile::MediaInsight;
use crate::ports::broadcast::StatusBroadcaster;

/// Control handle for a running worker. Cheap to clone and share.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    wake: mpsc::Sender<()>,
    shutdown: watch::Sender<bool>,
}

impl WorkerHandle {
    /// Request an immediate reconciliation pass. Coalesces with any wake
    /// already pending.
    pub fn wake(&self) {
        let _ = self.wake.try_send(());
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

pub struct InsightWorker {
    insight: Arc<MediaInsight>,
    broadcaster: Arc<dyn StatusBroadcaster>,
    interval: Duration,
    wake_rx: mpsc::Receiver<()>,
    shutdown_rx: watch::Receiver<bool>,
}

impl std::fmt::Debug for InsightWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InsightWorker")
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl InsightWorker {
    pub fn new(
        insight: Arc<MediaInsight>,
        broadcaster: Arc<dyn StatusBroadcaster>,
        config: &InsightConfig,
    ) -> (Self, WorkerHandle) {
        let (wake_tx, wake_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = Self {
            insight,
            broadcaster,
            interval: Duration::from_secs(config.reconcile_interval_secs),
            wake_rx,
            shutdown_rx,
        };
        let handle = WorkerHandle {
            wake: wake_tx,
            shutdown: shutdown_tx,
        };
        (worker, handle)
    }

    pub async fn run(mut self) {
        info!(interval = ?self.interval, "insight worker started");
        self.publish("started").await;

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; that gives us a catch-up pass
        // on startup.
        loop {
            tokio::select! {
                _ = ticker.tick() => self.pass().await,
                Some(()) = self.wake_rx.recv() => self.pass().await,
                result = self.shutdown_rx.changed() => {
                    if result.is_err() || *self.shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        self.publish("stopped").await;
        info!("insight worker stopped");
    }

    async fn pass(&self) {
        self.publish("reconciling").await;
        match self.insight.run_once().await {
            Ok(0) => {}
            Ok(processed) => info!(processed, "reconciliation pass triggered jobs"),
            Err(e) => error!("reconciliation pass failed: {e}"),
        }
        self.publish("idle").await;
    }

    async fn publish(&self, status: &str) {
        if let Err(e) = self.broadcaster.publish_status(status).await {
            warn!("worker status broadcast failed: {e}");
        }
    }
}
