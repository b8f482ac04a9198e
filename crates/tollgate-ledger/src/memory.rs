//! In-memory ledger store.
//!
//! Mirrors [`RedisLedger`](crate::RedisLedger) semantics -- atomic CAS debit,
//! create-if-absent reservations, status-guarded updates, TTL expiry -- with
//! a single process-local mutex. Used as the substrate fake in the billing
//! core's tests; also handy for local development without a Redis.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use tollgate_types::money::{from_micros, to_micros};

use crate::{LedgerError, LedgerStore, Result, balance_key};

struct ReservationEntry {
    fields: HashMap<String, String>,
    expires_at: Instant,
}

#[derive(Default)]
struct Inner {
    balances: HashMap<String, i64>,
    reservations: HashMap<String, ReservationEntry>,
    streams: HashMap<String, Vec<HashMap<String, String>>>,
    counters: HashMap<String, HashMap<String, i64>>,
    kv: HashMap<String, String>,
}

/// Process-local [`LedgerStore`] implementation.
#[derive(Default)]
pub struct MemoryLedger {
    inner: Mutex<Inner>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force a reservation's TTL to have elapsed. Test hook for the expiry
    /// path; returns whether the reservation existed.
    pub fn force_expire(&self, id: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.reservations.get_mut(id) {
            Some(entry) => {
                entry.expires_at = Instant::now() - Duration::from_secs(1);
                true
            }
            None => false,
        }
    }

    /// Number of entries in a stream. Test hook.
    pub fn stream_len(&self, stream: &str) -> usize {
        self.inner
            .lock()
            .streams
            .get(stream)
            .map_or(0, Vec::len)
    }

    fn micros(amount: Decimal) -> Result<i64> {
        to_micros(amount).ok_or_else(|| LedgerError::Precision(amount.to_string()))
    }
}

/// Drop the entry when its deadline has passed; returns whether it survives.
fn still_live(inner: &mut Inner, id: &str) -> bool {
    match inner.reservations.get(id) {
        Some(entry) if entry.expires_at <= Instant::now() => {
            inner.reservations.remove(id);
            false
        }
        Some(_) => true,
        None => false,
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn get_balance(&self, user_id: &str) -> Result<Decimal> {
        let inner = self.inner.lock();
        Ok(from_micros(
            inner.balances.get(&balance_key(user_id)).copied().unwrap_or(0),
        ))
    }

    async fn set_balance(&self, user_id: &str, amount: Decimal) -> Result<()> {
        let micros = Self::micros(amount)?;
        self.inner.lock().balances.insert(balance_key(user_id), micros);
        Ok(())
    }

    async fn cas_debit(&self, user_id: &str, amount: Decimal) -> Result<Decimal> {
        let micros = Self::micros(amount)?;
        let mut inner = self.inner.lock();
        let key = balance_key(user_id);
        // A failed debit must not create the key; the Redis script leaves
        // absent balances absent.
        let balance = inner.balances.get(&key).copied().unwrap_or(0);
        if balance < micros {
            return Err(LedgerError::InsufficientBalance);
        }
        inner.balances.insert(key, balance - micros);
        Ok(from_micros(balance - micros))
    }

    async fn credit(&self, user_id: &str, amount: Decimal) -> Result<Decimal> {
        let micros = Self::micros(amount)?;
        let mut inner = self.inner.lock();
        let balance = inner.balances.entry(balance_key(user_id)).or_insert(0);
        *balance += micros;
        Ok(from_micros(*balance))
    }

    async fn reservation_put(
        &self,
        id: &str,
        fields: HashMap<String, String>,
        ttl: Duration,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        if still_live(&mut inner, id) {
            return Err(LedgerError::ReservationExists(id.to_string()));
        }
        inner.reservations.insert(
            id.to_string(),
            ReservationEntry {
                fields,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn reservation_get(&self, id: &str) -> Result<Option<HashMap<String, String>>> {
        let mut inner = self.inner.lock();
        if !still_live(&mut inner, id) {
            return Ok(None);
        }
        Ok(inner.reservations.get(id).map(|e| e.fields.clone()))
    }

    async fn reservation_update(
        &self,
        id: &str,
        patch: HashMap<String, String>,
        new_ttl: Duration,
        expect_status: &str,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        if !still_live(&mut inner, id) {
            return Err(LedgerError::ReservationMissing(id.to_string()));
        }
        let Some(entry) = inner.reservations.get_mut(id) else {
            return Err(LedgerError::ReservationMissing(id.to_string()));
        };
        let actual = entry.fields.get("status").cloned().unwrap_or_default();
        if actual != expect_status {
            return Err(LedgerError::StatusConflict {
                id: id.to_string(),
                expected: expect_status.to_string(),
                actual,
            });
        }
        entry.fields.extend(patch);
        entry.expires_at = Instant::now() + new_ttl;
        Ok(())
    }

    async fn stream_append(&self, stream: &str, fields: HashMap<String, String>) -> Result<()> {
        self.inner
            .lock()
            .streams
            .entry(stream.to_string())
            .or_default()
            .push(fields);
        Ok(())
    }

    async fn stream_range(
        &self,
        stream: &str,
        count: usize,
    ) -> Result<Vec<HashMap<String, String>>> {
        let inner = self.inner.lock();
        let entries = match inner.streams.get(stream) {
            Some(entries) => entries,
            None => return Ok(Vec::new()),
        };
        Ok(entries.iter().rev().take(count).cloned().collect())
    }

    async fn counter_incr(&self, hash: &str, field: &str, delta: i64) -> Result<i64> {
        let mut inner = self.inner.lock();
        let counter = inner
            .counters
            .entry(hash.to_string())
            .or_default()
            .entry(field.to_string())
            .or_insert(0);
        *counter += delta;
        Ok(*counter)
    }

    async fn counter_get_all(&self, hash: &str) -> Result<HashMap<String, i64>> {
        Ok(self
            .inner
            .lock()
            .counters
            .get(hash)
            .cloned()
            .unwrap_or_default())
    }

    async fn keys_match(&self, prefix: &str) -> Result<Vec<String>> {
        let inner = self.inner.lock();
        let mut keys: Vec<String> = inner
            .balances
            .keys()
            .chain(inner.reservations.keys())
            .chain(inner.counters.keys())
            .chain(inner.kv.keys())
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn kv_get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.lock().kv.get(key).cloned())
    }

    async fn kv_set(&self, key: &str, value: &str) -> Result<()> {
        self.inner
            .lock()
            .kv
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn missing_balance_reads_zero() {
        let store = MemoryLedger::new();
        assert_eq!(store.get_balance("nobody").await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn debit_and_credit() {
        let store = MemoryLedger::new();
        store.set_balance("u1a", dec!(10.00)).await.unwrap();

        let after = store.cas_debit("u1a", dec!(0.0125)).await.unwrap();
        assert_eq!(after, dec!(9.9875));

        let after = store.credit("u1a", dec!(0.00055)).await.unwrap();
        assert_eq!(after, dec!(9.98805));
    }

    #[tokio::test]
    async fn debit_rejects_overdraft() {
        let store = MemoryLedger::new();
        store.set_balance("u1a", dec!(0.01)).await.unwrap();

        let err = store.cas_debit("u1a", dec!(0.0125)).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance));
        // balance untouched
        assert_eq!(store.get_balance("u1a").await.unwrap(), dec!(0.01));
    }

    #[tokio::test]
    async fn failed_debit_does_not_create_the_balance_key() {
        let store = MemoryLedger::new();

        let err = store.cas_debit("newcomer", dec!(1.00)).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance));
        assert_eq!(store.keys_match("balance:").await.unwrap(), Vec::<String>::new());
    }

    #[tokio::test]
    async fn sub_quantum_amount_rejected() {
        let store = MemoryLedger::new();
        let err = store.credit("u1a", dec!(0.000001)).await.unwrap_err();
        assert!(matches!(err, LedgerError::Precision(_)));
    }

    #[tokio::test]
    async fn reservation_create_is_exclusive() {
        let store = MemoryLedger::new();
        let fields = HashMap::from([("status".to_string(), "reserved".to_string())]);

        store
            .reservation_put("res:u1a:abc:1", fields.clone(), Duration::from_secs(600))
            .await
            .unwrap();
        let err = store
            .reservation_put("res:u1a:abc:1", fields, Duration::from_secs(600))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::ReservationExists(_)));
    }

    #[tokio::test]
    async fn reservation_update_guards_status() {
        let store = MemoryLedger::new();
        let fields = HashMap::from([("status".to_string(), "reserved".to_string())]);
        store
            .reservation_put("res:u1a:abc:1", fields, Duration::from_secs(600))
            .await
            .unwrap();

        let patch = HashMap::from([("status".to_string(), "committed".to_string())]);
        store
            .reservation_update("res:u1a:abc:1", patch.clone(), Duration::from_secs(86_400), "reserved")
            .await
            .unwrap();

        // second flip loses the guard
        let err = store
            .reservation_update("res:u1a:abc:1", patch, Duration::from_secs(86_400), "reserved")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::StatusConflict { actual, .. } if actual == "committed"
        ));
    }

    #[tokio::test]
    async fn expired_reservation_is_gone() {
        let store = MemoryLedger::new();
        let fields = HashMap::from([("status".to_string(), "reserved".to_string())]);
        store
            .reservation_put("res:u1a:abc:1", fields, Duration::from_secs(600))
            .await
            .unwrap();

        assert!(store.force_expire("res:u1a:abc:1"));
        assert!(store.reservation_get("res:u1a:abc:1").await.unwrap().is_none());

        let patch = HashMap::new();
        let err = store
            .reservation_update("res:u1a:abc:1", patch, Duration::from_secs(1), "reserved")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::ReservationMissing(_)));
    }

    #[tokio::test]
    async fn streams_are_append_only_newest_first() {
        let store = MemoryLedger::new();
        for i in 0..3 {
            store
                .stream_append(
                    "billing:log",
                    HashMap::from([("seq".to_string(), i.to_string())]),
                )
                .await
                .unwrap();
        }
        let entries = store.stream_range("billing:log", 2).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["seq"], "2");
        assert_eq!(entries[1]["seq"], "1");
    }

    #[tokio::test]
    async fn counters_accumulate() {
        let store = MemoryLedger::new();
        assert_eq!(
            store.counter_incr("usage:u1a:model:gpt-4o", "chat", 1500).await.unwrap(),
            1500
        );
        assert_eq!(
            store.counter_incr("usage:u1a:model:gpt-4o", "chat", 500).await.unwrap(),
            2000
        );
        let all = store.counter_get_all("usage:u1a:model:gpt-4o").await.unwrap();
        assert_eq!(all["chat"], 2000);
    }

    #[tokio::test]
    async fn keys_match_filters_by_prefix() {
        let store = MemoryLedger::new();
        store.set_balance("u1a", dec!(1)).await.unwrap();
        store.set_balance("u2b", dec!(2)).await.unwrap();
        store.kv_set("pricing:current", "{}").await.unwrap();

        let keys = store.keys_match("balance:").await.unwrap();
        assert_eq!(keys, vec!["balance:u1a", "balance:u2b"]);
    }

    #[tokio::test]
    async fn keys_match_sees_counter_hashes() {
        let store = MemoryLedger::new();
        store
            .counter_incr("usage:u1a:model:gpt-4o", "chat", 100)
            .await
            .unwrap();
        store
            .counter_incr("usage:u1a:model:text-embedding-3-large", "embed", 50)
            .await
            .unwrap();
        store.counter_incr("usage:daily:2026-08-01", "gpt-4o", 100).await.unwrap();

        let keys = store.keys_match("usage:u1a:model:").await.unwrap();
        assert_eq!(
            keys,
            vec![
                "usage:u1a:model:gpt-4o",
                "usage:u1a:model:text-embedding-3-large",
            ]
        );
    }
}
