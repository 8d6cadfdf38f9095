//! Loyalty-points accrual gateway.
//!
//! Authenticated users upload order numbers; the service validates and
//! persists them, then drives each one to a terminal state by polling the
//! external accrual calculation service. Awarded points land on a per-user
//! balance that can be spent through withdrawals.
//!
//! # Modules
//!
//! - [`config`] - environment + CLI configuration
//! - [`logging`] - tracing subscriber setup
//! - [`storage`] - transactional ledger over PostgreSQL (orders, balances,
//!   withdrawals, sessions) plus an in-memory double for tests
//! - [`accrual`] - client for the external accrual service
//! - [`pipeline`] - dispatcher → checker pool → status writer
//! - [`gateway`] - axum HTTP surface

pub mod accrual;
pub mod config;
pub mod gateway;
pub mod logging;
pub mod pipeline;
pub mod storage;

pub use accrual::{AccrualClient, HttpAccrualClient, QueryOutcome};
pub use config::AppConfig;
pub use gateway::AppState;
pub use pipeline::{Pipeline, PipelineConfig};
pub use storage::{MemoryStorage, OrderStatus, PgStorage, Repository};
