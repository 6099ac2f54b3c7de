use super::engine::ContractReviewEngine;
use std::sync::Arc;
use tracing::{info, warn};

/// In-process work queue feeding the bounded review worker pool.
/// Uploads enqueue review ids; each worker task drains the shared
/// receiver, so one slow contract never blocks the others.
pub struct ReviewQueue {
    tx: flume::Sender<i64>,
    rx: flume::Receiver<i64>,
}

impl ReviewQueue {
    pub fn new() -> Self {
        let (tx, rx) = flume::unbounded();
        Self { tx, rx }
    }

    pub fn sender(&self) -> flume::Sender<i64> {
        self.tx.clone()
    }

    /// Spawn `workers` background tasks that process queued reviews until
    /// the queue is closed.
    pub fn spawn_workers(&self, engine: Arc<ContractReviewEngine>, workers: usize) {
        for worker_id in 0..workers.max(1) {
            let rx = self.rx.clone();
            let engine = engine.clone();

            tokio::spawn(async move {
                info!(worker_id, "review worker started");

                while let Ok(review_id) = rx.recv_async().await {
                    info!(worker_id, review_id, "review picked up");
                    engine.process(review_id).await;
                }

                warn!(worker_id, "review queue closed, worker exiting");
            });
        }
    }
}

impl Default for ReviewQueue {
    fn default() -> Self {
        Self::new()
    }
}
