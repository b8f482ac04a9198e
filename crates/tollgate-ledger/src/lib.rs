//! Ledger store abstraction for tollgate.
//!
//! All persistent state -- balances, reservations, streams, counters, and
//! configuration snapshots -- lives behind the [`LedgerStore`] trait. The
//! billing core never touches the substrate directly, so the backend can be
//! swapped and faked:
//!
//! - [`RedisLedger`] -- the production substrate. Balance mutations and
//!   reservation transitions run as server-side Lua scripts so they are
//!   atomic without client-side locking.
//! - [`MemoryLedger`] -- an in-process fake with the same semantics, used by
//!   the core's tests.
//!
//! Balances are stored as integer micro-USD (10^-5, the ledger quantum);
//! every amount crossing this interface must already be quantized, which
//! keeps substrate-side arithmetic exact.

pub mod memory;
pub mod redis_store;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use tollgate_types::BillingError;

pub use memory::MemoryLedger;
pub use redis_store::RedisLedger;

/// Errors produced by ledger store implementations.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// A debit was larger than the current balance.
    #[error("insufficient balance")]
    InsufficientBalance,

    /// `reservation_put` hit an existing id.
    #[error("reservation already exists: {0}")]
    ReservationExists(String),

    /// The reservation is missing (never created or TTL-expired).
    #[error("reservation not found: {0}")]
    ReservationMissing(String),

    /// A conditional update found the reservation in a different status.
    #[error("reservation {id} is {actual}, expected {expected}")]
    StatusConflict {
        id: String,
        expected: String,
        actual: String,
    },

    /// An amount carried sub-quantum precision or overflowed the ledger range.
    #[error("amount not representable at ledger precision: {0}")]
    Precision(String),

    /// The substrate round-trip failed.
    #[error("substrate error: {0}")]
    Substrate(String),
}

impl From<LedgerError> for BillingError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientBalance => BillingError::InsufficientBalance,
            LedgerError::ReservationExists(id) => {
                BillingError::ReservationConflict(format!("{id} already exists"))
            }
            LedgerError::ReservationMissing(id) => BillingError::ReservationNotFound(id),
            LedgerError::StatusConflict { actual, .. } if actual == "committed" => {
                BillingError::ReservationConflict("already committed".into())
            }
            LedgerError::StatusConflict { id, .. } => BillingError::ReservationNotFound(id),
            LedgerError::Precision(msg) => BillingError::External(msg),
            LedgerError::Substrate(msg) => BillingError::External(msg),
        }
    }
}

impl From<::redis::RedisError> for LedgerError {
    fn from(err: ::redis::RedisError) -> Self {
        LedgerError::Substrate(err.to_string())
    }
}

/// Convenience alias for store operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// The narrow interface over the key/value + streams substrate.
///
/// Amounts are [`Decimal`] at the trait boundary and integer micro-USD
/// inside implementations. Methods that move money return the post-operation
/// balance so callers never need a follow-up read.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Current balance; absent users read as zero.
    async fn get_balance(&self, user_id: &str) -> Result<Decimal>;

    /// Overwrite a balance. Admin/bootstrap only -- racy by design, never on
    /// the billing path.
    async fn set_balance(&self, user_id: &str, amount: Decimal) -> Result<()>;

    /// Atomic compare-and-debit. Fails with
    /// [`LedgerError::InsufficientBalance`] when `current < amount`; on
    /// success returns the new balance.
    async fn cas_debit(&self, user_id: &str, amount: Decimal) -> Result<Decimal>;

    /// Atomic credit; returns the new balance.
    async fn credit(&self, user_id: &str, amount: Decimal) -> Result<Decimal>;

    /// Create a reservation record with a TTL. Fails with
    /// [`LedgerError::ReservationExists`] when the id is taken.
    async fn reservation_put(
        &self,
        id: &str,
        fields: HashMap<String, String>,
        ttl: Duration,
    ) -> Result<()>;

    /// Fetch a reservation's fields, or `None` when missing/expired.
    async fn reservation_get(&self, id: &str) -> Result<Option<HashMap<String, String>>>;

    /// Patch a reservation and extend its TTL, conditional on its current
    /// `status` field equalling `expect_status`. The condition is what makes
    /// the reserved-to-committed flip happen at most once.
    async fn reservation_update(
        &self,
        id: &str,
        patch: HashMap<String, String>,
        new_ttl: Duration,
        expect_status: &str,
    ) -> Result<()>;

    /// Append an entry to an append-only stream.
    async fn stream_append(&self, stream: &str, fields: HashMap<String, String>) -> Result<()>;

    /// Most recent `count` entries of a stream, newest first.
    async fn stream_range(
        &self,
        stream: &str,
        count: usize,
    ) -> Result<Vec<HashMap<String, String>>>;

    /// Increment an integer counter field inside a hash; returns the new value.
    async fn counter_incr(&self, hash: &str, field: &str, delta: i64) -> Result<i64>;

    /// All counter fields of a hash; empty map when the hash is missing.
    async fn counter_get_all(&self, hash: &str) -> Result<HashMap<String, i64>>;

    /// Keys beginning with `prefix`. Admin stats and usage-threshold reads
    /// only; never on the debit path.
    async fn keys_match(&self, prefix: &str) -> Result<Vec<String>>;

    /// Plain KV read, for persisted pricing/exchange snapshots.
    async fn kv_get(&self, key: &str) -> Result<Option<String>>;

    /// Plain KV write.
    async fn kv_set(&self, key: &str, value: &str) -> Result<()>;

    /// Liveness probe of the substrate.
    async fn ping(&self) -> Result<()>;
}

/// Balance key for a user.
pub(crate) fn balance_key(user_id: &str) -> String {
    format!("balance:{user_id}")
}
