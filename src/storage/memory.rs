//! In-memory ledger store.
//!
//! Behaves like [`super::PgStorage`] over a single mutex instead of row
//! locks: every operation is atomic, so the transactional contracts hold
//! trivially. The test suites run the gateway and the pipeline against it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{
    Balance, ClaimedOrder, Order, OrderPlacement, OrderStatus, Repository, Session, StorageError,
    TerminalUpdate, Withdrawal, dedupe_latest, generate_token, hash_password, session_ttl,
    verify_password,
};

struct UserRec {
    id: i64,
    login: String,
    password_hash: String,
    balance: Decimal,
    withdrawn: Decimal,
}

struct WithdrawalRec {
    user_id: i64,
    withdrawal: Withdrawal,
}

#[derive(Default)]
struct Inner {
    next_user_id: i64,
    users: Vec<UserRec>,
    sessions: HashMap<String, Session>,
    orders: Vec<Order>,
    withdrawals: Vec<WithdrawalRec>,
}

#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Inner {
    fn new_session(&mut self, user_id: i64) -> Session {
        let session = Session {
            token: generate_token(),
            user_id,
            expires_at: Utc::now() + session_ttl(),
        };
        self.sessions.insert(session.token.clone(), session.clone());
        session
    }
}

#[async_trait]
impl Repository for MemoryStorage {
    async fn create_user(&self, login: &str, password: &str) -> Result<i64, StorageError> {
        let password_hash = hash_password(password)?;

        let mut inner = self.lock();
        if inner.users.iter().any(|u| u.login == login) {
            return Err(StorageError::DuplicateLogin);
        }

        inner.next_user_id += 1;
        let id = inner.next_user_id;
        inner.users.push(UserRec {
            id,
            login: login.to_string(),
            password_hash,
            balance: Decimal::ZERO,
            withdrawn: Decimal::ZERO,
        });

        Ok(id)
    }

    async fn login_user(&self, login: &str, password: &str) -> Result<Session, StorageError> {
        let mut inner = self.lock();
        let Some(user) = inner.users.iter().find(|u| u.login == login) else {
            return Err(StorageError::WrongCredentials);
        };

        if !verify_password(password, &user.password_hash) {
            return Err(StorageError::WrongCredentials);
        }

        let user_id = user.id;
        Ok(inner.new_session(user_id))
    }

    async fn create_session(&self, user_id: i64) -> Result<Session, StorageError> {
        Ok(self.lock().new_session(user_id))
    }

    async fn resolve_session(&self, token: &str) -> Result<i64, StorageError> {
        let inner = self.lock();
        inner
            .sessions
            .get(token)
            .filter(|s| s.expires_at > Utc::now())
            .map(|s| s.user_id)
            .ok_or(StorageError::InvalidSession)
    }

    async fn create_order(
        &self,
        user_id: i64,
        number: &str,
    ) -> Result<OrderPlacement, StorageError> {
        let mut inner = self.lock();

        if let Some(existing) = inner.orders.iter().find(|o| o.number == number) {
            return Ok(if existing.user_id == user_id {
                OrderPlacement::AlreadyOwnedBySameUser
            } else {
                OrderPlacement::OwnedByOtherUser
            });
        }

        inner.orders.push(Order {
            number: number.to_string(),
            user_id,
            status: OrderStatus::Registered,
            accrual: None,
            uploaded_at: Utc::now(),
            processed_at: None,
        });

        Ok(OrderPlacement::Created)
    }

    async fn get_orders(&self, user_id: i64) -> Result<Vec<Order>, StorageError> {
        let inner = self.lock();
        let mut orders: Vec<Order> = inner
            .orders
            .iter()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at));
        Ok(orders)
    }

    async fn get_balance(&self, user_id: i64) -> Result<Balance, StorageError> {
        let inner = self.lock();
        let user = inner
            .users
            .iter()
            .find(|u| u.id == user_id)
            .ok_or(sqlx::Error::RowNotFound)?;

        Ok(Balance {
            current: user.balance,
            withdrawn: user.withdrawn,
        })
    }

    async fn create_withdrawal(
        &self,
        user_id: i64,
        order_num: &str,
        sum: Decimal,
    ) -> Result<(), StorageError> {
        let mut inner = self.lock();
        let user = inner
            .users
            .iter_mut()
            .find(|u| u.id == user_id)
            .ok_or(sqlx::Error::RowNotFound)?;

        if user.balance < sum {
            return Err(StorageError::InsufficientFunds);
        }

        user.balance -= sum;
        user.withdrawn += sum;
        inner.withdrawals.push(WithdrawalRec {
            user_id,
            withdrawal: Withdrawal {
                order_num: order_num.to_string(),
                sum,
                processed_at: Utc::now(),
            },
        });

        Ok(())
    }

    async fn get_withdrawals(&self, user_id: i64) -> Result<Vec<Withdrawal>, StorageError> {
        let inner = self.lock();
        let mut withdrawals: Vec<Withdrawal> = inner
            .withdrawals
            .iter()
            .filter(|w| w.user_id == user_id)
            .map(|w| w.withdrawal.clone())
            .collect();
        withdrawals.sort_by(|a, b| a.processed_at.cmp(&b.processed_at));
        Ok(withdrawals)
    }

    async fn claim_orders(
        &self,
        limit: i64,
        uploaded_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<ClaimedOrder>, StorageError> {
        let mut inner = self.lock();

        let mut eligible: Vec<usize> = inner
            .orders
            .iter()
            .enumerate()
            .filter(|(_, o)| !o.status.is_terminal())
            .filter(|(_, o)| uploaded_after.is_none_or(|after| o.uploaded_at > after))
            .map(|(i, _)| i)
            .collect();
        eligible.sort_by(|&a, &b| {
            let (oa, ob) = (&inner.orders[a], &inner.orders[b]);
            oa.uploaded_at
                .cmp(&ob.uploaded_at)
                .then_with(|| oa.number.cmp(&ob.number))
        });
        eligible.truncate(limit.max(0) as usize);

        let mut claimed = Vec::with_capacity(eligible.len());
        for idx in eligible {
            let order = &mut inner.orders[idx];
            if order.status == OrderStatus::Registered {
                order.status = OrderStatus::Processing;
            }
            claimed.push(ClaimedOrder {
                number: order.number.clone(),
                status: order.status,
                uploaded_at: order.uploaded_at,
            });
        }

        Ok(claimed)
    }

    async fn apply_terminal_updates(&self, batch: &[TerminalUpdate]) -> Result<(), StorageError> {
        let updates = dedupe_latest(batch);
        let mut inner = self.lock();

        for update in updates {
            let Some(idx) = inner.orders.iter().position(|o| o.number == update.number) else {
                continue;
            };
            if inner.orders[idx].status.is_terminal() {
                continue;
            }

            let order = &mut inner.orders[idx];
            order.status = update.status;
            order.processed_at = Some(update.processed_at);
            order.accrual = match update.status {
                OrderStatus::Processed => Some(update.accrual),
                _ => None,
            };
            let owner = order.user_id;

            if update.status == OrderStatus::Processed && update.accrual > Decimal::ZERO {
                if let Some(user) = inner.users.iter_mut().find(|u| u.id == owner) {
                    user.balance += update.accrual;
                }
            }
        }

        Ok(())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points(cents: i64) -> Decimal {
        Decimal::new(cents, 2)
    }

    fn terminal(
        number: &str,
        status: OrderStatus,
        accrual_cents: i64,
        micros_offset: i64,
    ) -> TerminalUpdate {
        TerminalUpdate {
            number: number.to_string(),
            status,
            accrual: points(accrual_cents),
            processed_at: Utc::now() + chrono::Duration::microseconds(micros_offset),
        }
    }

    #[tokio::test]
    async fn duplicate_login_is_rejected() {
        let store = MemoryStorage::new();
        store.create_user("alice", "secret").await.unwrap();
        let err = store.create_user("alice", "other").await.unwrap_err();
        assert!(matches!(err, StorageError::DuplicateLogin));
    }

    #[tokio::test]
    async fn login_distinguishes_nothing_externally() {
        let store = MemoryStorage::new();
        store.create_user("alice", "secret").await.unwrap();

        assert!(matches!(
            store.login_user("alice", "wrong").await.unwrap_err(),
            StorageError::WrongCredentials
        ));
        assert!(matches!(
            store.login_user("bob", "secret").await.unwrap_err(),
            StorageError::WrongCredentials
        ));

        let session = store.login_user("alice", "secret").await.unwrap();
        let user_id = store.resolve_session(&session.token).await.unwrap();
        assert_eq!(user_id, session.user_id);
    }

    #[tokio::test]
    async fn expired_session_is_rejected() {
        let store = MemoryStorage::new();
        let user_id = store.create_user("alice", "secret").await.unwrap();
        let session = store.create_session(user_id).await.unwrap();

        if let Some(s) = store.lock().sessions.get_mut(&session.token) {
            s.expires_at = Utc::now() - chrono::Duration::seconds(1);
        }

        assert!(matches!(
            store.resolve_session(&session.token).await.unwrap_err(),
            StorageError::InvalidSession
        ));
    }

    #[tokio::test]
    async fn order_upload_is_idempotent_per_owner() {
        let store = MemoryStorage::new();
        let alice = store.create_user("alice", "secret").await.unwrap();
        let bob = store.create_user("bob", "secret").await.unwrap();

        assert_eq!(
            store.create_order(alice, "12345678903").await.unwrap(),
            OrderPlacement::Created
        );
        assert_eq!(
            store.create_order(alice, "12345678903").await.unwrap(),
            OrderPlacement::AlreadyOwnedBySameUser
        );
        assert_eq!(
            store.create_order(bob, "12345678903").await.unwrap(),
            OrderPlacement::OwnedByOtherUser
        );

        // First uploader keeps ownership.
        let orders = store.get_orders(alice).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert!(store.get_orders(bob).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_withdrawal_leaves_ledger_untouched() {
        let store = MemoryStorage::new();
        let alice = store.create_user("alice", "secret").await.unwrap();
        store.create_order(alice, "12345678903").await.unwrap();
        store
            .apply_terminal_updates(&[terminal("12345678903", OrderStatus::Processed, 50_000, 0)])
            .await
            .unwrap();

        let err = store
            .create_withdrawal(alice, "2377225624", points(50_001))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InsufficientFunds));

        let balance = store.get_balance(alice).await.unwrap();
        assert_eq!(balance.current, points(50_000));
        assert_eq!(balance.withdrawn, Decimal::ZERO);
        assert!(store.get_withdrawals(alice).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn withdrawal_debits_and_records_atomically() {
        let store = MemoryStorage::new();
        let alice = store.create_user("alice", "secret").await.unwrap();
        store.create_order(alice, "12345678903").await.unwrap();
        store
            .apply_terminal_updates(&[terminal("12345678903", OrderStatus::Processed, 50_000, 0)])
            .await
            .unwrap();

        store
            .create_withdrawal(alice, "2377225624", points(30_000))
            .await
            .unwrap();

        let balance = store.get_balance(alice).await.unwrap();
        assert_eq!(balance.current, points(20_000));
        assert_eq!(balance.withdrawn, points(30_000));
        assert_eq!(store.get_withdrawals(alice).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn claim_bumps_registered_to_processing() {
        let store = MemoryStorage::new();
        let alice = store.create_user("alice", "secret").await.unwrap();
        store.create_order(alice, "12345678903").await.unwrap();
        store.create_order(alice, "2377225624").await.unwrap();

        let claimed = store.claim_orders(10, None).await.unwrap();
        assert_eq!(claimed.len(), 2);
        assert!(claimed.iter().all(|c| c.status == OrderStatus::Processing));

        // A later cycle sees them again until a terminal update lands.
        let again = store.claim_orders(10, None).await.unwrap();
        assert_eq!(again.len(), 2);
    }

    #[tokio::test]
    async fn claim_respects_limit_and_cursor() {
        let store = MemoryStorage::new();
        let alice = store.create_user("alice", "secret").await.unwrap();
        store.create_order(alice, "12345678903").await.unwrap();
        store.create_order(alice, "2377225624").await.unwrap();
        store.create_order(alice, "1234567897").await.unwrap();

        let first = store.claim_orders(2, None).await.unwrap();
        assert_eq!(first.len(), 2);

        let rest = store
            .claim_orders(2, Some(first[1].uploaded_at))
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].number, "1234567897");
    }

    #[tokio::test]
    async fn terminal_updates_are_idempotent_and_final() {
        let store = MemoryStorage::new();
        let alice = store.create_user("alice", "secret").await.unwrap();
        store.create_order(alice, "12345678903").await.unwrap();

        let credit = terminal("12345678903", OrderStatus::Processed, 10_000, 0);

        // Applied any number of times, the credit lands exactly once.
        for _ in 0..10 {
            store.apply_terminal_updates(&[credit.clone()]).await.unwrap();
        }
        assert_eq!(
            store.get_balance(alice).await.unwrap().current,
            points(10_000)
        );

        // No transition out of a terminal status.
        store
            .apply_terminal_updates(&[terminal("12345678903", OrderStatus::Invalid, 0, 1_000)])
            .await
            .unwrap();
        let orders = store.get_orders(alice).await.unwrap();
        assert_eq!(orders[0].status, OrderStatus::Processed);
        assert_eq!(orders[0].accrual, Some(points(10_000)));
    }

    #[tokio::test]
    async fn batch_dedup_applies_latest_record_only() {
        let store = MemoryStorage::new();
        let alice = store.create_user("alice", "secret").await.unwrap();
        store.create_order(alice, "12345678903").await.unwrap();

        store
            .apply_terminal_updates(&[
                terminal("12345678903", OrderStatus::Invalid, 0, 0),
                terminal("12345678903", OrderStatus::Processed, 7_500, 1_000),
            ])
            .await
            .unwrap();

        let orders = store.get_orders(alice).await.unwrap();
        assert_eq!(orders[0].status, OrderStatus::Processed);
        assert_eq!(
            store.get_balance(alice).await.unwrap().current,
            points(7_500)
        );
    }
}
