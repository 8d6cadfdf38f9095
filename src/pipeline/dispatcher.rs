//! Dispatch cycles over the shared order table.

use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::PipelineConfig;
use crate::storage::{ClaimedOrder, Repository};

pub struct Dispatcher {
    store: Arc<dyn Repository>,
    claims: mpsc::Sender<ClaimedOrder>,
    limit: i64,
    idle_sleep: Duration,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn Repository>,
        claims: mpsc::Sender<ClaimedOrder>,
        config: &PipelineConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            claims,
            limit: config.claim_limit,
            idle_sleep: config.idle_sleep,
            cancel,
        }
    }

    /// Claim-and-emit loop. The cursor walks the table in `uploaded_at`
    /// order for round-robin fairness; a short cycle wraps it around, and
    /// an empty cycle from the top means there is no work at all.
    pub async fn run(self) {
        let mut cursor: Option<DateTime<Utc>> = None;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let claimed = match self.store.claim_orders(self.limit, cursor).await {
                Ok(claimed) => claimed,
                Err(err) => {
                    tracing::warn!(error = %err, "claim cycle failed; retrying next cycle");
                    if self.pause(self.idle_sleep).await {
                        break;
                    }
                    continue;
                }
            };

            let short_cycle = (claimed.len() as i64) < self.limit;
            let idle = claimed.is_empty() && cursor.is_none();

            for claim in claimed {
                cursor = Some(claim.uploaded_at);
                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    sent = self.claims.send(claim) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }

            if short_cycle {
                cursor = None;
            }
            if idle && self.pause(self.idle_sleep).await {
                break;
            }
        }

        tracing::debug!("dispatcher stopped");
    }

    /// Cancellation-aware sleep; true means shutdown was requested.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }
}
