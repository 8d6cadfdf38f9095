//! Checker pool: turns claimed orders into terminal updates.

use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::accrual::{AccrualClient, QueryOutcome};
use crate::storage::{ClaimedOrder, TerminalUpdate};

/// Pool-wide rate-limit gate. Any checker that sees a 429 arms it; every
/// checker waits on it before the next accrual request, so the back-off is
/// global rather than per-worker.
pub struct Backoff {
    until: Mutex<Option<Instant>>,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

impl Backoff {
    pub fn new() -> Self {
        Self {
            until: Mutex::new(None),
        }
    }

    pub fn arm(&self, delay: Duration) {
        let deadline = Instant::now() + delay;
        let mut until = self.until.lock().unwrap_or_else(|p| p.into_inner());
        if until.is_none_or(|current| deadline > current) {
            *until = Some(deadline);
        }
    }

    pub async fn wait(&self) {
        let deadline = *self.until.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(deadline) = deadline {
            if deadline > Instant::now() {
                tokio::time::sleep_until(deadline).await;
            }
        }
    }
}

pub struct Checker {
    client: Arc<dyn AccrualClient>,
    claims: Arc<tokio::sync::Mutex<mpsc::Receiver<ClaimedOrder>>>,
    updates: mpsc::Sender<TerminalUpdate>,
    backoff: Arc<Backoff>,
    cancel: CancellationToken,
}

impl Checker {
    pub fn new(
        client: Arc<dyn AccrualClient>,
        claims: Arc<tokio::sync::Mutex<mpsc::Receiver<ClaimedOrder>>>,
        updates: mpsc::Sender<TerminalUpdate>,
        backoff: Arc<Backoff>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            claims,
            updates,
            backoff,
            cancel,
        }
    }

    pub async fn run(self) {
        loop {
            let claim = {
                let mut claims = self.claims.lock().await;
                tokio::select! {
                    _ = self.cancel.cancelled() => None,
                    claim = claims.recv() => claim,
                }
            };
            let Some(claim) = claim else {
                break;
            };

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = self.backoff.wait() => {}
            }

            match self.client.query(&claim.number).await {
                QueryOutcome::Terminal { status, accrual } => {
                    let update = TerminalUpdate {
                        number: claim.number,
                        status,
                        accrual,
                        processed_at: Utc::now(),
                    };
                    if self.updates.send(update).await.is_err() {
                        break;
                    }
                }
                QueryOutcome::RateLimited { retry_after } => {
                    tracing::info!(
                        order = %claim.number,
                        seconds = retry_after.as_secs(),
                        "accrual service rate-limited; pausing the pool"
                    );
                    self.backoff.arm(retry_after);
                }
                // The order stays PROCESSING and is re-dispatched later.
                QueryOutcome::NotReady | QueryOutcome::TransientFailure => {}
            }
        }

        tracing::debug!("checker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn armed_backoff_delays_waiters() {
        let backoff = Backoff::new();
        backoff.arm(Duration::from_secs(3));

        let before = Instant::now();
        backoff.wait().await;
        assert!(Instant::now() - before >= Duration::from_secs(3));

        // Expired deadline does not delay again.
        let before = Instant::now();
        backoff.wait().await;
        assert_eq!(Instant::now(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn later_deadline_wins() {
        let backoff = Backoff::new();
        backoff.arm(Duration::from_secs(5));
        backoff.arm(Duration::from_secs(1));

        let before = Instant::now();
        backoff.wait().await;
        assert!(Instant::now() - before >= Duration::from_secs(5));
    }
}
