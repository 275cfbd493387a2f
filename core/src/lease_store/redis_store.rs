//! Redis-backed lease store

use std::collections::HashMap;

use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::{AsyncCommands, Client};
use tracing::{debug, info};

use super::{parse_info, Commit, HashBatch, LeaseStore, WriteOp};
use crate::error::LeaseResult;

/// Keys requested per SCAN round trip
const SCAN_COUNT: usize = 200;

/// Shared Redis client
///
/// Plain commands go through a reconnecting `ConnectionManager` that every
/// clone shares. Transactions open a dedicated connection because WATCH
/// state belongs to a connection, not to a client.
#[derive(Clone)]
pub struct RedisLeaseStore {
    client: Client,
    manager: ConnectionManager,
}

/// Connection holding an active WATCH
pub struct RedisWatch {
    con: MultiplexedConnection,
}

impl RedisLeaseStore {
    pub async fn connect(url: &str) -> LeaseResult<Self> {
        info!("Connecting to lease store");
        let client = Client::open(url)?;
        let manager = ConnectionManager::new(client.clone()).await?;
        Ok(Self { client, manager })
    }

    /// Release this handle's connections; WATCH connections close with their handles
    pub fn close(self) {
        info!("Closing lease store connections");
        drop(self.manager);
    }

    fn con(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

/// Escape glob metacharacters so a prefix matches literally in SCAN MATCH
fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl LeaseStore for RedisLeaseStore {
    type Watch = RedisWatch;

    async fn exists(&self, key: &str) -> LeaseResult<bool> {
        let found: bool = self.con().exists(key).await?;
        Ok(found)
    }

    async fn get(&self, key: &str) -> LeaseResult<Option<String>> {
        let value: Option<String> = self.con().get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> LeaseResult<()> {
        let _: () = self.con().set(key, value).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> LeaseResult<()> {
        let _: () = self.con().del(key).await?;
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> LeaseResult<HashMap<String, String>> {
        let fields: HashMap<String, String> = self.con().hgetall(key).await?;
        Ok(fields)
    }

    async fn hash_apply(&self, key: &str, batch: HashBatch) -> LeaseResult<()> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (field, delta) in &batch.increments {
            pipe.hincr(key, *field, *delta).ignore();
        }
        if !batch.fields.is_empty() {
            pipe.hset_multiple(key, batch.fields.as_slice()).ignore();
        }
        pipe.expire(key, i64::try_from(batch.ttl_secs).unwrap_or(i64::MAX))
            .ignore();

        let mut con = self.con();
        let _: () = pipe.query_async(&mut con).await?;
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> LeaseResult<Vec<String>> {
        let pattern = format!("{}*", escape_glob(prefix));
        let mut con = self.con();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut con)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may report a key more than once
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn memory_info(&self) -> LeaseResult<HashMap<String, String>> {
        let mut con = self.con();
        let raw: String = redis::cmd("INFO").arg("memory").query_async(&mut con).await?;
        Ok(parse_info(&raw))
    }

    async fn watch(&self, keys: &[&str]) -> LeaseResult<RedisWatch> {
        let mut con = self.client.get_multiplexed_async_connection().await?;
        let _: () = redis::cmd("WATCH").arg(keys).query_async(&mut con).await?;
        debug!(?keys, "Watching keys");
        Ok(RedisWatch { con })
    }

    async fn unwatch(&self, mut watch: RedisWatch) -> LeaseResult<()> {
        let _: () = redis::cmd("UNWATCH").query_async(&mut watch.con).await?;
        Ok(())
    }

    async fn commit(&self, mut watch: RedisWatch, ops: Vec<WriteOp>) -> LeaseResult<Commit> {
        if ops.is_empty() {
            self.unwatch(watch).await?;
            return Ok(Commit::Applied);
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in &ops {
            match op {
                WriteOp::Set { key, value } => {
                    pipe.set(key, value).ignore();
                }
                WriteOp::Delete { key } => {
                    pipe.del(key).ignore();
                }
            }
        }

        // EXEC answers nil when a watched key was touched
        let reply: Option<redis::Value> = pipe.query_async(&mut watch.con).await?;
        Ok(match reply {
            Some(_) => Commit::Applied,
            None => Commit::Conflict,
        })
    }
}
