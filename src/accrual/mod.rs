//! Client side of the external accrual calculation service.

pub mod http;

pub use http::HttpAccrualClient;

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::time::Duration;

use crate::storage::OrderStatus;

/// Result of asking the accrual service about one order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    /// The service reached a verdict; `status` is `Processed` or `Invalid`
    /// and `accrual` is zero for `Invalid`.
    Terminal { status: OrderStatus, accrual: Decimal },
    /// No verdict yet (HTTP 204 or a non-terminal status in the body).
    NotReady,
    /// HTTP 429; the caller must not query again for at least `retry_after`.
    RateLimited { retry_after: Duration },
    /// Network, server, or decode failure. The order stays as-is and is
    /// re-dispatched on a later cycle.
    TransientFailure,
}

#[async_trait]
pub trait AccrualClient: Send + Sync {
    async fn query(&self, order_num: &str) -> QueryOutcome;
}
