//! Batched terminal writeback.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use super::PipelineConfig;
use crate::storage::{Repository, TerminalUpdate};

pub struct StatusWriter {
    store: Arc<dyn Repository>,
    updates: mpsc::Receiver<TerminalUpdate>,
    capacity: usize,
    interval: Duration,
    final_timeout: Duration,
}

impl StatusWriter {
    pub fn new(
        store: Arc<dyn Repository>,
        updates: mpsc::Receiver<TerminalUpdate>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            store,
            updates,
            capacity: config.flush_capacity,
            interval: config.flush_interval,
            final_timeout: config.final_flush_timeout,
        }
    }

    /// Buffers updates until the batch fills or the ticker fires. A failed
    /// flush keeps the batch for the next attempt; the channel keeps
    /// accepting new items in the meantime. The loop ends when the last
    /// checker drops the channel, which triggers the shutdown flush.
    pub async fn run(mut self) {
        let mut batch: Vec<TerminalUpdate> = Vec::new();
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe = self.updates.recv() => {
                    let Some(update) = maybe else { break };
                    batch.push(update);
                    if batch.len() >= self.capacity {
                        self.flush(&mut batch).await;
                    }
                }
                _ = ticker.tick() => {
                    self.flush(&mut batch).await;
                }
            }
        }

        self.final_flush(batch).await;
    }

    async fn flush(&self, batch: &mut Vec<TerminalUpdate>) {
        if batch.is_empty() {
            return;
        }

        match self.store.apply_terminal_updates(batch).await {
            Ok(()) => {
                tracing::debug!(count = batch.len(), "terminal updates applied");
                batch.clear();
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    pending = batch.len(),
                    "status flush failed; batch retained for retry"
                );
            }
        }
    }

    /// One last flush with its own deadline; the batch may be dropped only
    /// if this attempt fails too.
    async fn final_flush(mut self, mut batch: Vec<TerminalUpdate>) {
        while let Ok(update) = self.updates.try_recv() {
            batch.push(update);
        }
        if batch.is_empty() {
            return;
        }

        match tokio::time::timeout(
            self.final_timeout,
            self.store.apply_terminal_updates(&batch),
        )
        .await
        {
            Ok(Ok(())) => {
                tracing::info!(count = batch.len(), "final status flush complete");
            }
            Ok(Err(err)) => {
                tracing::error!(
                    error = %err,
                    dropped = batch.len(),
                    "final status flush failed; dropping batch"
                );
            }
            Err(_) => {
                tracing::error!(
                    dropped = batch.len(),
                    "final status flush timed out; dropping batch"
                );
            }
        }
    }
}
