//! Redis-backed ledger store.
//!
//! Balances live at `balance:<user>` as integer micro-USD, reservations are
//! hashes keyed by their reservation id, streams use XADD/XREVRANGE, and
//! usage counters are HINCRBY hashes. The three mutations that must not race
//! -- CAS debit, create-if-absent, and the status-guarded commit flip -- run
//! as Lua scripts so the substrate applies them in one step.
//!
//! Deployment note: the instance must run with `noeviction` (or a volatile
//! policy that never touches balance keys); an evicted balance is a silent
//! refund of nothing and a debit of everything.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use rust_decimal::Decimal;
use tracing::debug;

use tollgate_types::money::{from_micros, to_micros};

use crate::{LedgerError, LedgerStore, Result, balance_key};

/// Debit `ARGV[1]` micro-USD from `KEYS[1]` unless it would overdraw.
/// Returns the new balance, or -1 when insufficient.
const DEBIT_SCRIPT: &str = r"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
local amount = tonumber(ARGV[1])
if current < amount then
    return -1
end
return redis.call('DECRBY', KEYS[1], ARGV[1])
";

/// Create the hash at `KEYS[1]` with TTL `ARGV[1]` and field pairs from
/// `ARGV[2..]`. Returns 0 when the key already exists, 1 on create.
const PUT_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return 0
end
for i = 2, #ARGV - 1, 2 do
    redis.call('HSET', KEYS[1], ARGV[i], ARGV[i + 1])
end
redis.call('EXPIRE', KEYS[1], ARGV[1])
return 1
";

/// Patch the hash at `KEYS[1]` and reset its TTL to `ARGV[1]`, but only when
/// its `status` field equals `ARGV[2]`. Field pairs follow in `ARGV[3..]`.
/// Returns 'ok', 'missing', or the actual status on a guard mismatch.
const UPDATE_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return 'missing'
end
local status = redis.call('HGET', KEYS[1], 'status')
if status ~= ARGV[2] then
    return status
end
for i = 3, #ARGV - 1, 2 do
    redis.call('HSET', KEYS[1], ARGV[i], ARGV[i + 1])
end
redis.call('EXPIRE', KEYS[1], ARGV[1])
return 'ok'
";

/// Production [`LedgerStore`] over a Redis substrate.
pub struct RedisLedger {
    conn: ConnectionManager,
    debit: Script,
    put: Script,
    update: Script,
}

impl std::fmt::Debug for RedisLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisLedger").finish_non_exhaustive()
    }
}

impl RedisLedger {
    /// Connect to the substrate. The connection manager reconnects on its
    /// own; individual operations surface transient failures as
    /// [`LedgerError::Substrate`].
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        debug!(url, "connected to ledger substrate");
        Ok(Self {
            conn,
            debit: Script::new(DEBIT_SCRIPT),
            put: Script::new(PUT_SCRIPT),
            update: Script::new(UPDATE_SCRIPT),
        })
    }

    fn micros(amount: Decimal) -> Result<i64> {
        to_micros(amount).ok_or_else(|| LedgerError::Precision(amount.to_string()))
    }
}

#[async_trait]
impl LedgerStore for RedisLedger {
    async fn get_balance(&self, user_id: &str) -> Result<Decimal> {
        let mut conn = self.conn.clone();
        let micros: Option<i64> = conn.get(balance_key(user_id)).await?;
        Ok(from_micros(micros.unwrap_or(0)))
    }

    async fn set_balance(&self, user_id: &str, amount: Decimal) -> Result<()> {
        let micros = Self::micros(amount)?;
        let mut conn = self.conn.clone();
        let _: () = conn.set(balance_key(user_id), micros).await?;
        Ok(())
    }

    async fn cas_debit(&self, user_id: &str, amount: Decimal) -> Result<Decimal> {
        let micros = Self::micros(amount)?;
        let mut conn = self.conn.clone();
        let result: i64 = self
            .debit
            .key(balance_key(user_id))
            .arg(micros)
            .invoke_async(&mut conn)
            .await?;
        if result < 0 {
            return Err(LedgerError::InsufficientBalance);
        }
        Ok(from_micros(result))
    }

    async fn credit(&self, user_id: &str, amount: Decimal) -> Result<Decimal> {
        let micros = Self::micros(amount)?;
        let mut conn = self.conn.clone();
        let result: i64 = conn.incr(balance_key(user_id), micros).await?;
        Ok(from_micros(result))
    }

    async fn reservation_put(
        &self,
        id: &str,
        fields: HashMap<String, String>,
        ttl: Duration,
    ) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut invocation = self.put.key(id);
        invocation.arg(ttl.as_secs().max(1));
        for (field, value) in &fields {
            invocation.arg(field).arg(value);
        }
        let created: i64 = invocation.invoke_async(&mut conn).await?;
        if created == 0 {
            return Err(LedgerError::ReservationExists(id.to_string()));
        }
        Ok(())
    }

    async fn reservation_get(&self, id: &str) -> Result<Option<HashMap<String, String>>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(id).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(fields))
    }

    async fn reservation_update(
        &self,
        id: &str,
        patch: HashMap<String, String>,
        new_ttl: Duration,
        expect_status: &str,
    ) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut invocation = self.update.key(id);
        invocation.arg(new_ttl.as_secs().max(1)).arg(expect_status);
        for (field, value) in &patch {
            invocation.arg(field).arg(value);
        }
        let outcome: String = invocation.invoke_async(&mut conn).await?;
        match outcome.as_str() {
            "ok" => Ok(()),
            "missing" => Err(LedgerError::ReservationMissing(id.to_string())),
            actual => Err(LedgerError::StatusConflict {
                id: id.to_string(),
                expected: expect_status.to_string(),
                actual: actual.to_string(),
            }),
        }
    }

    async fn stream_append(&self, stream: &str, fields: HashMap<String, String>) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream).arg("*");
        for (field, value) in &fields {
            cmd.arg(field).arg(value);
        }
        let _: String = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn stream_range(
        &self,
        stream: &str,
        count: usize,
    ) -> Result<Vec<HashMap<String, String>>> {
        let mut conn = self.conn.clone();
        let reply: redis::streams::StreamRangeReply = redis::cmd("XREVRANGE")
            .arg(stream)
            .arg("+")
            .arg("-")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;
        let mut entries = Vec::with_capacity(reply.ids.len());
        for id in reply.ids {
            let mut fields = HashMap::with_capacity(id.map.len());
            for (field, value) in id.map {
                let value: String = redis::from_redis_value(&value)?;
                fields.insert(field, value);
            }
            entries.push(fields);
        }
        Ok(entries)
    }

    async fn counter_incr(&self, hash: &str, field: &str, delta: i64) -> Result<i64> {
        let mut conn = self.conn.clone();
        Ok(conn.hincr(hash, field, delta).await?)
    }

    async fn counter_get_all(&self, hash: &str) -> Result<HashMap<String, i64>> {
        let mut conn = self.conn.clone();
        Ok(conn.hgetall(hash).await?)
    }

    async fn keys_match(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let pattern = format!("{prefix}*");
        let mut keys = Vec::new();
        let mut iter = conn.scan_match::<_, String>(pattern).await?;
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        Ok(keys)
    }

    async fn kv_get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn kv_set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
