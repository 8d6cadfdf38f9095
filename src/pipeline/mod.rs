//! Order-processing pipeline.
//!
//! Three long-lived task groups connected by bounded channels:
//!
//! ```text
//! ┌────────────┐ claims ┌───────────┐ updates ┌───────────────┐   tx   ┌────────┐
//! │ Dispatcher │───────▶│ Checkers  │────────▶│ Status Writer │───────▶│ Ledger │
//! └────────────┘        └───────────┘         └───────────────┘        └────────┘
//! ```
//!
//! Backpressure is intrinsic: a slow checker pool blocks the dispatcher on
//! send and slows the claim rate. Shutdown flows in the same direction —
//! the dispatcher stops after its cycle and drops the claim channel, the
//! checkers drain and drop the update channel, and the writer performs one
//! final flush when its inbox closes.

pub mod checker;
pub mod dispatcher;
pub mod writer;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::accrual::AccrualClient;
use crate::storage::Repository;
use checker::{Backoff, Checker};
use dispatcher::Dispatcher;
use writer::StatusWriter;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Max orders claimed per dispatch cycle.
    pub claim_limit: i64,
    /// Sleep when a cycle finds no work at all.
    pub idle_sleep: Duration,
    /// Checker pool size.
    pub checkers: usize,
    /// Capacity of both inter-task channels.
    pub queue_capacity: usize,
    /// Status writer flushes when its buffer reaches this size...
    pub flush_capacity: usize,
    /// ...or when this ticker fires, whichever comes first.
    pub flush_interval: Duration,
    /// Deadline for the writer's last flush on shutdown.
    pub final_flush_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            claim_limit: 100,
            idle_sleep: Duration::from_secs(5),
            checkers: 1,
            queue_capacity: 10,
            flush_capacity: 10,
            flush_interval: Duration::from_secs(5),
            final_flush_timeout: Duration::from_secs(5),
        }
    }
}

pub struct Pipeline {
    tasks: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Waits for every pipeline task, including the writer's final flush.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(err) = task.await {
                tracing::error!(error = %err, "pipeline task panicked");
            }
        }
    }
}

/// Spawns the dispatcher, the checker pool, and the status writer.
pub fn spawn(
    store: Arc<dyn Repository>,
    client: Arc<dyn AccrualClient>,
    config: PipelineConfig,
    cancel: CancellationToken,
) -> Pipeline {
    let (claim_tx, claim_rx) = mpsc::channel(config.queue_capacity);
    let (update_tx, update_rx) = mpsc::channel(config.queue_capacity);

    let mut tasks = Vec::with_capacity(config.checkers + 2);

    tasks.push(tokio::spawn(
        Dispatcher::new(store.clone(), claim_tx, &config, cancel.clone()).run(),
    ));

    let claim_rx = Arc::new(tokio::sync::Mutex::new(claim_rx));
    let backoff = Arc::new(Backoff::new());
    for _ in 0..config.checkers.max(1) {
        tasks.push(tokio::spawn(
            Checker::new(
                client.clone(),
                claim_rx.clone(),
                update_tx.clone(),
                backoff.clone(),
                cancel.clone(),
            )
            .run(),
        ));
    }
    // The writer's inbox closes once every checker has exited.
    drop(update_tx);

    tasks.push(tokio::spawn(StatusWriter::new(store, update_rx, &config).run()));

    Pipeline { tasks }
}
