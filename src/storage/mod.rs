//! Ledger store: users, sessions, orders, withdrawals.
//!
//! The [`Repository`] trait is the capability set the gateway and the
//! processing pipeline are written against. [`PgStorage`] is the production
//! implementation; [`MemoryStorage`] backs the test suites.

pub mod luhn;
pub mod memory;
pub mod migrations;
pub mod pg;

pub use memory::MemoryStorage;
pub use pg::PgStorage;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Session lifetime granted on register/login.
pub const SESSION_TTL_HOURS: i64 = 10;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("login already taken")]
    DuplicateLogin,

    #[error("wrong login or password")]
    WrongCredentials,

    #[error("invalid or expired session")]
    InvalidSession,

    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("password hashing failed: {0}")]
    PasswordHash(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Order lifecycle. `Processed` and `Invalid` are terminal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema,
)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "order_status", rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Registered,
    Processing,
    Processed,
    Invalid,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Processed | OrderStatus::Invalid)
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub user_id: i64,
    pub expires_at: DateTime<Utc>,
}

/// Outcome of an order upload. Uploading the same number twice is not an
/// error; who owns the existing row decides the HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderPlacement {
    Created,
    AlreadyOwnedBySameUser,
    OwnedByOtherUser,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
pub struct Order {
    pub number: String,
    #[serde(skip)]
    pub user_id: i64,
    pub status: OrderStatus,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "rust_decimal::serde::float_option"
    )]
    #[schema(value_type = Option<f64>)]
    pub accrual: Option<Decimal>,
    pub uploaded_at: DateTime<Utc>,
    #[serde(skip)]
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, sqlx::FromRow, ToSchema)]
pub struct Balance {
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub current: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub withdrawn: Decimal,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
pub struct Withdrawal {
    #[serde(rename = "order")]
    pub order_num: String,
    #[serde(with = "rust_decimal::serde::float")]
    #[schema(value_type = f64)]
    pub sum: Decimal,
    pub processed_at: DateTime<Utc>,
}

/// Row emitted by a dispatch cycle. `status` reflects the row after the
/// claim transaction committed, so it is always `Processing`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ClaimedOrder {
    pub number: String,
    pub status: OrderStatus,
    pub uploaded_at: DateTime<Utc>,
}

/// Terminal verdict produced by a checker, applied by the status writer.
#[derive(Debug, Clone)]
pub struct TerminalUpdate {
    pub number: String,
    pub status: OrderStatus,
    pub accrual: Decimal,
    pub processed_at: DateTime<Utc>,
}

#[async_trait]
pub trait Repository: Send + Sync {
    async fn create_user(&self, login: &str, password: &str) -> Result<i64, StorageError>;

    async fn login_user(&self, login: &str, password: &str) -> Result<Session, StorageError>;

    async fn create_session(&self, user_id: i64) -> Result<Session, StorageError>;

    async fn resolve_session(&self, token: &str) -> Result<i64, StorageError>;

    async fn create_order(
        &self,
        user_id: i64,
        number: &str,
    ) -> Result<OrderPlacement, StorageError>;

    /// Orders of one user, ascending by `uploaded_at`.
    async fn get_orders(&self, user_id: i64) -> Result<Vec<Order>, StorageError>;

    async fn get_balance(&self, user_id: i64) -> Result<Balance, StorageError>;

    /// Debits the balance and records the withdrawal in one transaction.
    async fn create_withdrawal(
        &self,
        user_id: i64,
        order_num: &str,
        sum: Decimal,
    ) -> Result<(), StorageError>;

    /// Withdrawals of one user, ascending by `processed_at`.
    async fn get_withdrawals(&self, user_id: i64) -> Result<Vec<Withdrawal>, StorageError>;

    /// Claims up to `limit` work-eligible orders, bumping `Registered` rows
    /// to `Processing`. Rows locked by a concurrent claimer are skipped.
    async fn claim_orders(
        &self,
        limit: i64,
        uploaded_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<ClaimedOrder>, StorageError>;

    /// Applies a batch of terminal updates atomically, crediting accruals
    /// for rows that become `Processed`. Idempotent: rows already in a
    /// terminal status are left untouched.
    async fn apply_terminal_updates(&self, batch: &[TerminalUpdate]) -> Result<(), StorageError>;

    async fn ping(&self) -> Result<(), StorageError>;
}

pub fn session_ttl() -> Duration {
    Duration::hours(SESSION_TTL_HOURS)
}

/// Fresh opaque session token: 128 random bits, hex-rendered.
pub(crate) fn generate_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

pub(crate) fn hash_password(password: &str) -> Result<String, StorageError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| StorageError::PasswordHash(e.to_string()))
}

pub(crate) fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

/// Collapses a batch to one update per order number, keeping the record
/// with the latest `processed_at`. Input order is preserved otherwise.
pub(crate) fn dedupe_latest(batch: &[TerminalUpdate]) -> Vec<TerminalUpdate> {
    let mut latest: Vec<TerminalUpdate> = Vec::with_capacity(batch.len());
    for update in batch {
        match latest.iter_mut().find(|u| u.number == update.number) {
            Some(existing) => {
                if update.processed_at > existing.processed_at {
                    *existing = update.clone();
                }
            }
            None => latest.push(update.clone()),
        }
    }
    latest
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(number: &str, micros: i64, accrual: i64) -> TerminalUpdate {
        TerminalUpdate {
            number: number.to_string(),
            status: OrderStatus::Processed,
            accrual: Decimal::new(accrual, 2),
            processed_at: DateTime::from_timestamp_micros(micros).unwrap(),
        }
    }

    #[test]
    fn dedupe_keeps_latest_record_per_order() {
        let batch = vec![
            update("1", 10, 100),
            update("2", 20, 200),
            update("1", 30, 300),
            update("1", 25, 250),
        ];

        let deduped = dedupe_latest(&batch);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].number, "1");
        assert_eq!(deduped[0].accrual, Decimal::new(300, 2));
        assert_eq!(deduped[1].number, "2");
    }

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("secret").unwrap();
        assert!(verify_password("secret", &hash));
        assert!(!verify_password("wrong", &hash));
        assert!(!verify_password("secret", "not-a-phc-string"));
    }

    #[test]
    fn token_is_128_bit_hex() {
        let token = generate_token();
        assert_eq!(token.len(), 32);
        assert!(token.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_ne!(token, generate_token());
    }

    #[test]
    fn terminal_statuses() {
        assert!(OrderStatus::Processed.is_terminal());
        assert!(OrderStatus::Invalid.is_terminal());
        assert!(!OrderStatus::Registered.is_terminal());
        assert!(!OrderStatus::Processing.is_terminal());
    }
}
