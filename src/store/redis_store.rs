// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Redis-backed token store.
//!
//! Uses a multiplexed async connection shared by all requests.
//!
//! A plain `MULTI`/`EXEC` transaction is not all-or-nothing: when one queued
//! command fails at run time (e.g. `RENAME` of a missing key) the others still
//! apply. Batches are therefore compiled into a single Lua script that checks
//! every precondition first and only then writes. Redis runs scripts
//! atomically, so other clients never observe a half-applied batch, and since
//! the checks rule out the failing cases no write can error mid-script.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::RedisError;
use url::Url;

use super::{BatchOp, KeyTtl, StoreError, StoreResult, TokenStore};

/// Token store talking to a Redis server.
#[derive(Clone)]
pub struct RedisTokenStore {
    connection: MultiplexedConnection,
}

impl RedisTokenStore {
    /// Open a multiplexed connection to `location`.
    pub async fn connect(location: &Url) -> StoreResult<Self> {
        let client = redis::Client::open(location.as_str()).map_err(map_redis_error)?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(map_redis_error)?;

        tracing::info!(
            host = location.host_str().unwrap_or("localhost"),
            "Connected to Redis token store"
        );

        Ok(Self { connection })
    }
}

#[async_trait]
impl TokenStore for RedisTokenStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.connection.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async::<Option<String>>(&mut conn)
            .await
            .map_err(map_redis_error)
    }

    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl> {
        let mut conn = self.connection.clone();
        let millis = redis::cmd("PTTL")
            .arg(key)
            .query_async::<i64>(&mut conn)
            .await
            .map_err(map_redis_error)?;

        Ok(pttl_to_key_ttl(millis))
    }

    async fn get_with_ttl(&self, key: &str) -> StoreResult<(Option<String>, KeyTtl)> {
        let mut conn = self.connection.clone();
        let (value, millis) = redis::pipe()
            .atomic()
            .cmd("GET")
            .arg(key)
            .cmd("PTTL")
            .arg(key)
            .query_async::<(Option<String>, i64)>(&mut conn)
            .await
            .map_err(map_redis_error)?;

        Ok((value, pttl_to_key_ttl(millis)))
    }

    /// Runs the batch as one Lua script.
    ///
    /// `Expect` guards and `Rename` sources are checked before any write; a
    /// failed check returns [`StoreError::Conflict`] or
    /// [`StoreError::NoSuchKey`] with nothing written.
    async fn execute_atomic(&self, ops: Vec<BatchOp>) -> StoreResult<()> {
        let script = BatchScript::compile(&ops);

        let mut cmd = redis::cmd("EVAL");
        cmd.arg(&script.source).arg(script.keys.len());
        for key in &script.keys {
            cmd.arg(key);
        }
        for arg in &script.args {
            cmd.arg(arg);
        }

        let mut conn = self.connection.clone();
        let (outcome, key) = cmd
            .query_async::<(String, String)>(&mut conn)
            .await
            .map_err(map_redis_error)?;

        match outcome.as_str() {
            "ok" => Ok(()),
            "conflict" => Err(StoreError::Conflict(key)),
            "missing" => Err(StoreError::NoSuchKey(key)),
            other => Err(StoreError::Backend(format!(
                "unexpected batch script reply: {other}"
            ))),
        }
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.connection.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(map_redis_error)
    }
}

/// Interpret a `PTTL` reply: -2 missing, -1 no expiry, otherwise milliseconds.
fn pttl_to_key_ttl(millis: i64) -> KeyTtl {
    match millis {
        -2 => KeyTtl::Missing,
        -1 => KeyTtl::Persistent,
        ms if ms < 0 => KeyTtl::Missing,
        ms => KeyTtl::Expires(Duration::from_millis(ms as u64)),
    }
}

/// `SET ... PX` rejects zero; round sub-millisecond TTLs up.
fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

/// Lua source plus the `KEYS` / `ARGV` it references.
#[derive(Debug, Default)]
struct BatchScript {
    source: String,
    keys: Vec<String>,
    args: Vec<String>,
}

impl BatchScript {
    fn compile(ops: &[BatchOp]) -> Self {
        let mut script = BatchScript::default();
        let mut checks = String::new();
        let mut writes = String::new();

        for op in ops {
            match op {
                BatchOp::Expect { key, value: Some(value) } => {
                    let k = script.key(key);
                    let a = script.arg(value.clone());
                    checks.push_str(&format!(
                        "if redis.call('GET', KEYS[{k}]) ~= ARGV[{a}] then return {{'conflict', KEYS[{k}]}} end\n"
                    ));
                }
                BatchOp::Expect { key, value: None } => {
                    let k = script.key(key);
                    checks.push_str(&format!(
                        "if redis.call('EXISTS', KEYS[{k}]) == 1 then return {{'conflict', KEYS[{k}]}} end\n"
                    ));
                }
                BatchOp::Rename { from, to } => {
                    let f = script.key(from);
                    let t = script.key(to);
                    checks.push_str(&format!(
                        "if redis.call('EXISTS', KEYS[{f}]) == 0 then return {{'missing', KEYS[{f}]}} end\n"
                    ));
                    writes.push_str(&format!("redis.call('RENAME', KEYS[{f}], KEYS[{t}])\n"));
                }
                BatchOp::SetEx { key, value, ttl } => {
                    let k = script.key(key);
                    let v = script.arg(value.clone());
                    let px = script.arg(ttl_millis(*ttl).to_string());
                    writes.push_str(&format!(
                        "redis.call('SET', KEYS[{k}], ARGV[{v}], 'PX', ARGV[{px}])\n"
                    ));
                }
            }
        }

        script.source = format!("{checks}{writes}return {{'ok', ''}}\n");
        script
    }

    /// 1-based Lua index of `key`, reusing an existing slot.
    fn key(&mut self, key: &str) -> usize {
        match self.keys.iter().position(|k| k == key) {
            Some(index) => index + 1,
            None => {
                self.keys.push(key.to_string());
                self.keys.len()
            }
        }
    }

    fn arg(&mut self, arg: String) -> usize {
        self.args.push(arg);
        self.args.len()
    }
}

fn map_redis_error(err: RedisError) -> StoreError {
    if err.is_io_error()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_timeout()
    {
        StoreError::Unavailable(err.to_string())
    } else {
        StoreError::Backend(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pttl_replies_map_to_key_ttl() {
        assert_eq!(pttl_to_key_ttl(-2), KeyTtl::Missing);
        assert_eq!(pttl_to_key_ttl(-1), KeyTtl::Persistent);
        assert_eq!(
            pttl_to_key_ttl(1500),
            KeyTtl::Expires(Duration::from_millis(1500))
        );
        assert_eq!(pttl_to_key_ttl(0), KeyTtl::Expires(Duration::ZERO));
    }

    #[test]
    fn ttl_millis_never_zero() {
        assert_eq!(ttl_millis(Duration::from_secs(60)), 60_000);
        assert_eq!(ttl_millis(Duration::from_micros(10)), 1);
    }

    #[test]
    fn rotation_batch_checks_before_writing() {
        let script = BatchScript::compile(&[
            BatchOp::Expect {
                key: "ns::current".into(),
                value: Some("t0".into()),
            },
            BatchOp::Rename {
                from: "ns::current".into(),
                to: "ns::obsolete".into(),
            },
            BatchOp::SetEx {
                key: "ns::current".into(),
                value: "t1".into(),
                ttl: Duration::from_secs(60),
            },
        ]);

        assert_eq!(script.keys, vec!["ns::current", "ns::obsolete"]);
        assert_eq!(script.args, vec!["t0", "t1", "60000"]);

        let last_check = script.source.rfind("return {'missing'").unwrap();
        let first_write = script.source.find("redis.call('RENAME'").unwrap();
        assert!(last_check < first_write);
        assert!(script
            .source
            .contains("redis.call('SET', KEYS[1], ARGV[2], 'PX', ARGV[3])"));
        assert!(script.source.ends_with("return {'ok', ''}\n"));
    }

    #[test]
    fn absent_guard_uses_exists() {
        let script = BatchScript::compile(&[BatchOp::Expect {
            key: "k".into(),
            value: None,
        }]);
        assert!(script.source.contains("redis.call('EXISTS', KEYS[1]) == 1"));
        assert!(script.args.is_empty());
    }

    #[test]
    fn non_connection_errors_are_backend_errors() {
        let err = RedisError::from((redis::ErrorKind::TypeError, "wrong type"));
        assert!(matches!(map_redis_error(err), StoreError::Backend(_)));
    }

    /// Live Redis tests: `REDIS_URL=redis://127.0.0.1/ cargo test -- --ignored`
    mod live {
        use std::sync::Arc;

        use super::*;
        use crate::config::ServiceAccountConfig;
        use crate::token::TokenManager;

        async fn live_store() -> RedisTokenStore {
            let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".into());
            RedisTokenStore::connect(&Url::parse(&url).unwrap())
                .await
                .unwrap()
        }

        fn unique_namespace() -> String {
            format!("service-account-test-{}", uuid::Uuid::new_v4())
        }

        #[tokio::test]
        #[ignore = "requires a running Redis server"]
        async fn rotate_then_validate() {
            let store = Arc::new(live_store().await);
            let config = Arc::new(ServiceAccountConfig {
                namespace: unique_namespace(),
                token_ttl: Duration::from_secs(3),
                token_ttl_expiry_threshold: Duration::from_secs(2),
                token_length: 10,
                ..ServiceAccountConfig::default()
            });
            let manager = TokenManager::new(store.clone(), config.clone());

            let first = manager.get_or_create_token().await.unwrap();
            assert_eq!(manager.get_or_create_token().await.unwrap(), first);

            tokio::time::sleep(Duration::from_millis(1_500)).await;
            let (a, b) = tokio::join!(manager.get_or_create_token(), manager.get_or_create_token());
            let (a, b) = (a.unwrap(), b.unwrap());

            assert_eq!(a, b);
            assert_ne!(a, first);
            assert_eq!(
                store.get(&config.obsolete_key()).await.unwrap().as_deref(),
                Some(first.as_str())
            );
            match store.ttl(&config.obsolete_key()).await.unwrap() {
                KeyTtl::Expires(remaining) => assert!(remaining <= Duration::from_secs(2)),
                other => panic!("unexpected obsolete ttl: {other:?}"),
            }
            assert!(manager.is_token_valid(&first).await.unwrap());
            assert!(manager.is_token_valid(&a).await.unwrap());
        }

        #[tokio::test]
        #[ignore = "requires a running Redis server"]
        async fn rename_of_missing_key_writes_nothing() {
            let store = live_store().await;
            let ns = unique_namespace();
            let fresh = format!("{ns}::fresh");

            let result = store
                .execute_atomic(vec![
                    BatchOp::SetEx {
                        key: fresh.clone(),
                        value: "x".into(),
                        ttl: Duration::from_secs(5),
                    },
                    BatchOp::Rename {
                        from: format!("{ns}::missing"),
                        to: format!("{ns}::elsewhere"),
                    },
                ])
                .await;

            assert!(matches!(result, Err(StoreError::NoSuchKey(_))));
            assert_eq!(store.get(&fresh).await.unwrap(), None);
        }

        #[tokio::test]
        #[ignore = "requires a running Redis server"]
        async fn stale_guard_is_a_conflict() {
            let store = live_store().await;
            let key = format!("{}::current", unique_namespace());
            let set = |value: &str| BatchOp::SetEx {
                key: key.clone(),
                value: value.into(),
                ttl: Duration::from_secs(5),
            };

            store
                .execute_atomic(vec![
                    BatchOp::Expect {
                        key: key.clone(),
                        value: None,
                    },
                    set("t1"),
                ])
                .await
                .unwrap();

            let result = store
                .execute_atomic(vec![
                    BatchOp::Expect {
                        key: key.clone(),
                        value: Some("t0".into()),
                    },
                    set("t2"),
                ])
                .await;

            assert!(matches!(result, Err(StoreError::Conflict(k)) if k == key));
            assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("t1"));
            assert_eq!(
                store.get_with_ttl(&key).await.unwrap().0.as_deref(),
                Some("t1")
            );
        }
    }
}
