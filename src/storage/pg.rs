//! PostgreSQL ledger store.
//!
//! All multi-row mutations (withdrawal, claim, terminal writeback) run in a
//! single transaction and every statement executes on the transaction
//! handle. Row locks are taken with `FOR UPDATE`; the claim query adds
//! `SKIP LOCKED` so cooperating gateway instances pick disjoint subsets.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use super::{
    Balance, ClaimedOrder, Order, OrderPlacement, OrderStatus, Repository, Session, StorageError,
    TerminalUpdate, Withdrawal, dedupe_latest, generate_token, hash_password, migrations,
    session_ttl, verify_password,
};

pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    /// Connects, applies pending migrations, and returns the store.
    /// Connection failure here is fatal by design.
    pub async fn connect(database_uri: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_uri)
            .await?;

        migrations::migrate(&pool).await?;
        tracing::info!("postgres connection pool established");

        Ok(Self { pool })
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

#[async_trait]
impl Repository for PgStorage {
    async fn create_user(&self, login: &str, password: &str) -> Result<i64, StorageError> {
        let password_hash = hash_password(password)?;

        let result = sqlx::query_scalar::<_, i64>(
            r#"INSERT INTO "user" (login, password) VALUES ($1, $2) RETURNING id"#,
        )
        .bind(login)
        .bind(&password_hash)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(user_id) => Ok(user_id),
            Err(err) if is_unique_violation(&err) => Err(StorageError::DuplicateLogin),
            Err(err) => Err(err.into()),
        }
    }

    async fn login_user(&self, login: &str, password: &str) -> Result<Session, StorageError> {
        let row = sqlx::query(r#"SELECT id, password FROM "user" WHERE login = $1"#)
            .bind(login)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            tracing::debug!(login, "login attempt for unknown login");
            return Err(StorageError::WrongCredentials);
        };

        let user_id: i64 = row.get("id");
        let password_hash: String = row.get("password");

        if !verify_password(password, &password_hash) {
            tracing::debug!(login, "login attempt with wrong password");
            return Err(StorageError::WrongCredentials);
        }

        self.create_session(user_id).await
    }

    async fn create_session(&self, user_id: i64) -> Result<Session, StorageError> {
        let session = Session {
            token: generate_token(),
            user_id,
            expires_at: Utc::now() + session_ttl(),
        };

        sqlx::query(
            r#"INSERT INTO user_session (user_id, token, created_at, expires_at)
               VALUES ($1, $2, now(), $3)"#,
        )
        .bind(user_id)
        .bind(&session.token)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(session)
    }

    async fn resolve_session(&self, token: &str) -> Result<i64, StorageError> {
        sqlx::query_scalar::<_, i64>(
            "SELECT user_id FROM user_session WHERE token = $1 AND expires_at > now()",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StorageError::InvalidSession)
    }

    async fn create_order(
        &self,
        user_id: i64,
        number: &str,
    ) -> Result<OrderPlacement, StorageError> {
        let result = sqlx::query(
            r#"INSERT INTO "order" (order_num, user_id, status, uploaded_at)
               VALUES ($1, $2, 'REGISTERED', now())"#,
        )
        .bind(number)
        .bind(user_id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(OrderPlacement::Created),
            Err(err) if is_unique_violation(&err) => {
                // Read-after-conflict: the owner of the existing row decides
                // the outcome.
                let owner: i64 =
                    sqlx::query_scalar(r#"SELECT user_id FROM "order" WHERE order_num = $1"#)
                        .bind(number)
                        .fetch_one(&self.pool)
                        .await?;

                if owner == user_id {
                    Ok(OrderPlacement::AlreadyOwnedBySameUser)
                } else {
                    Ok(OrderPlacement::OwnedByOtherUser)
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn get_orders(&self, user_id: i64) -> Result<Vec<Order>, StorageError> {
        let orders = sqlx::query_as::<_, Order>(
            r#"SELECT order_num AS number, user_id, status, accrual, uploaded_at, processed_at
               FROM "order"
               WHERE user_id = $1
               ORDER BY uploaded_at"#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(orders)
    }

    async fn get_balance(&self, user_id: i64) -> Result<Balance, StorageError> {
        let balance = sqlx::query_as::<_, Balance>(
            r#"SELECT balance AS current, withdrawn FROM "user" WHERE id = $1"#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(balance)
    }

    async fn create_withdrawal(
        &self,
        user_id: i64,
        order_num: &str,
        sum: Decimal,
    ) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;

        let balance: Decimal =
            sqlx::query_scalar(r#"SELECT balance FROM "user" WHERE id = $1 FOR UPDATE"#)
                .bind(user_id)
                .fetch_one(&mut *tx)
                .await?;

        if balance < sum {
            tx.rollback().await?;
            return Err(StorageError::InsufficientFunds);
        }

        sqlx::query(
            r#"UPDATE "user" SET balance = balance - $1, withdrawn = withdrawn + $1
               WHERE id = $2"#,
        )
        .bind(sum)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"INSERT INTO withdrawal (order_num, sum, user_id, processed_at)
               VALUES ($1, $2, $3, now())"#,
        )
        .bind(order_num)
        .bind(sum)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_withdrawals(&self, user_id: i64) -> Result<Vec<Withdrawal>, StorageError> {
        let withdrawals = sqlx::query_as::<_, Withdrawal>(
            r#"SELECT order_num, sum, processed_at
               FROM withdrawal
               WHERE user_id = $1
               ORDER BY processed_at"#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(withdrawals)
    }

    async fn claim_orders(
        &self,
        limit: i64,
        uploaded_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<ClaimedOrder>, StorageError> {
        let mut tx = self.pool.begin().await?;

        let mut claimed = sqlx::query_as::<_, ClaimedOrder>(
            r#"SELECT order_num AS number, status, uploaded_at
               FROM "order"
               WHERE status IN ('REGISTERED', 'PROCESSING')
                 AND ($2::timestamptz IS NULL OR uploaded_at > $2)
               ORDER BY uploaded_at
               LIMIT $1
               FOR UPDATE SKIP LOCKED"#,
        )
        .bind(limit)
        .bind(uploaded_after)
        .fetch_all(&mut *tx)
        .await?;

        let fresh: Vec<String> = claimed
            .iter()
            .filter(|c| c.status == OrderStatus::Registered)
            .map(|c| c.number.clone())
            .collect();

        if !fresh.is_empty() {
            sqlx::query(r#"UPDATE "order" SET status = 'PROCESSING' WHERE order_num = ANY($1)"#)
                .bind(&fresh)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        for claim in &mut claimed {
            claim.status = OrderStatus::Processing;
        }

        Ok(claimed)
    }

    async fn apply_terminal_updates(&self, batch: &[TerminalUpdate]) -> Result<(), StorageError> {
        let updates = dedupe_latest(batch);
        if updates.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for update in &updates {
            let accrual = match update.status {
                OrderStatus::Processed => Some(update.accrual),
                _ => None,
            };

            // Terminal rows never change again, so a second application of
            // the same update matches zero rows and credits nothing.
            let result = sqlx::query(
                r#"UPDATE "order"
                   SET status = $2, accrual = $3, processed_at = $4
                   WHERE order_num = $1
                     AND status NOT IN ('PROCESSED', 'INVALID')"#,
            )
            .bind(&update.number)
            .bind(update.status)
            .bind(accrual)
            .bind(update.processed_at)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0
                && update.status == OrderStatus::Processed
                && update.accrual > Decimal::ZERO
            {
                sqlx::query(
                    r#"UPDATE "user" u
                       SET balance = u.balance + $2
                       FROM "order" o
                       WHERE o.order_num = $1 AND o.user_id = u.id"#,
                )
                .bind(&update.number)
                .bind(update.accrual)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
