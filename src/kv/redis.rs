//! Networked [`KvStore`] backed by a Redis server.
//!
//! Commands go through a [`ConnectionManager`], which multiplexes one
//! connection and reconnects transparently after a drop. Hash writes that
//! carry a TTL are sent as a `MULTI`/`EXEC` pipeline with `PEXPIRE`.

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use log::info;
use redis::{RedisError, aio::ConnectionManager};
use tokio::sync::OnceCell;

use super::{KvError, KvStore};

const SCAN_BATCH: usize = 256;

/// Key-value store shared by every process pointed at one Redis server.
#[derive(Clone)]
pub struct RedisKv {
    conn: ConnectionManager,
}

impl fmt::Debug for RedisKv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisKv").finish_non_exhaustive()
    }
}

impl RedisKv {
    /// Open a managed connection to the server at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::Unavailable`] when the URL is malformed or the
    /// server cannot be reached.
    pub async fn connect(url: &str) -> Result<Self, KvError> {
        let client = redis::Client::open(url).map_err(|e| unavailable(&e))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| unavailable(&e))?;
        info!("connected to redis key-value backend");
        Ok(Self { conn })
    }

    /// Return the process-wide client, connecting on first use.
    ///
    /// Later calls reuse the first connection regardless of `url`.
    ///
    /// # Errors
    ///
    /// Propagates the [`connect`](Self::connect) failure of the first call;
    /// a later call retries.
    pub async fn shared(url: &str) -> Result<Arc<Self>, KvError> {
        static SHARED: OnceCell<Arc<RedisKv>> = OnceCell::const_new();
        SHARED
            .get_or_try_init(|| async { Self::connect(url).await.map(Arc::new) })
            .await
            .map(Arc::clone)
    }

    fn conn(&self) -> ConnectionManager { self.conn.clone() }
}

fn unavailable(error: &RedisError) -> KvError { KvError::Unavailable(error.to_string()) }

fn classify(key: &str, code: Option<&str>, detail: &dyn fmt::Display) -> KvError {
    if code == Some("WRONGTYPE") {
        KvError::WrongType {
            key: key.to_owned(),
        }
    } else {
        KvError::Unavailable(detail.to_string())
    }
}

fn map_error(key: &str) -> impl FnOnce(RedisError) -> KvError + '_ {
    move |error| classify(key, error.code(), &error)
}

/// Millisecond expiry for `PX`/`PEXPIRE`; servers reject zero.
fn ttl_millis(ttl: Duration) -> u64 { u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1) }

/// Escape glob metacharacters so `prefix` matches literally in `SCAN MATCH`.
fn glob_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for ch in prefix.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('*');
    pattern
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, KvError> {
        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut self.conn())
            .await
            .map_err(map_error(key))?;
        Ok(value.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), KvError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value.as_ref());
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let () = cmd
            .query_async(&mut self.conn())
            .await
            .map_err(map_error(key))?;
        Ok(())
    }

    async fn set_nx(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<bool, KvError> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value.as_ref()).arg("NX");
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let reply: Option<String> = cmd
            .query_async(&mut self.conn())
            .await
            .map_err(map_error(key))?;
        Ok(reply.is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        let count: usize = redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut self.conn())
            .await
            .map_err(map_error(key))?;
        Ok(count > 0)
    }

    async fn delete(&self, keys: &[&str]) -> Result<usize, KvError> {
        let Some(first) = keys.first() else {
            return Ok(0);
        };
        redis::cmd("DEL")
            .arg(keys)
            .query_async(&mut self.conn())
            .await
            .map_err(map_error(first))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError> {
        redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_millis(ttl))
            .query_async(&mut self.conn())
            .await
            .map_err(map_error(key))
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<Bytes>, KvError> {
        let value: Option<Vec<u8>> = redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query_async(&mut self.conn())
            .await
            .map_err(map_error(key))?;
        Ok(value.map(Bytes::from))
    }

    async fn hset(
        &self,
        key: &str,
        field: &str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<(), KvError> {
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("HSET")
            .arg(key)
            .arg(field)
            .arg(value.as_ref())
            .ignore();
        if let Some(ttl) = ttl {
            pipe.cmd("PEXPIRE").arg(key).arg(ttl_millis(ttl)).ignore();
        }
        let () = pipe
            .query_async(&mut self.conn())
            .await
            .map_err(map_error(key))?;
        Ok(())
    }

    async fn hset_nx(
        &self,
        key: &str,
        field: &str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<bool, KvError> {
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("HSETNX")
            .arg(key)
            .arg(field)
            .arg(value.as_ref());
        if let Some(ttl) = ttl {
            pipe.cmd("PEXPIRE").arg(key).arg(ttl_millis(ttl)).ignore();
        }
        let (written,): (bool,) = pipe
            .query_async(&mut self.conn())
            .await
            .map_err(map_error(key))?;
        Ok(written)
    }

    async fn hlen(&self, key: &str) -> Result<usize, KvError> {
        redis::cmd("HLEN")
            .arg(key)
            .query_async(&mut self.conn())
            .await
            .map_err(map_error(key))
    }

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, Bytes)>, KvError> {
        let fields: HashMap<String, Vec<u8>> = redis::cmd("HGETALL")
            .arg(key)
            .query_async(&mut self.conn())
            .await
            .map_err(map_error(key))?;
        Ok(fields
            .into_iter()
            .map(|(field, value)| (field, Bytes::from(value)))
            .collect())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        let pattern = glob_prefix(prefix);
        let mut conn = self.conn();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|e| unavailable(&e))?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        // SCAN may return a key more than once across batches.
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }

    async fn ping(&self) -> Result<(), KvError> {
        let _: String = redis::cmd("PING")
            .query_async(&mut self.conn())
            .await
            .map_err(|e| unavailable(&e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::rstest;

    use super::{KvError, classify, glob_prefix, ttl_millis};

    #[rstest]
    #[case("fragments:", "fragments:*")]
    #[case("a*b?", "a\\*b\\?*")]
    #[case("[x]\\", "\\[x\\]\\\\*")]
    #[case("", "*")]
    fn prefixes_match_literally(#[case] prefix: &str, #[case] pattern: &str) {
        assert_eq!(glob_prefix(prefix), pattern);
    }

    #[rstest]
    #[case(Duration::from_secs(3), 3_000)]
    #[case(Duration::from_micros(10), 1)]
    #[case(Duration::ZERO, 1)]
    #[case(Duration::MAX, u64::MAX)]
    fn ttls_become_positive_millis(#[case] ttl: Duration, #[case] millis: u64) {
        assert_eq!(ttl_millis(ttl), millis);
    }

    #[test]
    fn wrongtype_replies_name_the_key() {
        let err = classify("meta:a", Some("WRONGTYPE"), &"Operation against a key");
        assert_eq!(
            err,
            KvError::WrongType {
                key: "meta:a".into()
            }
        );
    }

    #[rstest]
    #[case(Some("ERR"))]
    #[case(None)]
    fn other_failures_are_unavailable(#[case] code: Option<&str>) {
        let err = classify("meta:a", code, &"connection refused");
        assert_eq!(err, KvError::Unavailable("connection refused".into()));
    }
}
