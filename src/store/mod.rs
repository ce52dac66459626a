// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Token Store
//!
//! Key-value contract the token manager relies on. A backend must provide
//! per-key expiry, plain and snapshot reads, and an atomic batch of guarded
//! rename / set-with-expiry operations. All participating processes must share the same backend.
//!
//! ## Backends
//!
//! | Scheme | Backend | Notes |
//! |--------|---------|-------|
//! | `redis://`, `rediss://` | [`RedisTokenStore`] | Batches run as one Lua script |
//! | `memory://` | [`InMemoryTokenStore`] | Single process only (tests, local dev) |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

pub mod memory;
pub mod redis_store;

pub use memory::InMemoryTokenStore;
pub use redis_store::RedisTokenStore;

/// Remaining lifetime of a key, mirroring Redis `PTTL` replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// The key does not exist (or has already expired).
    Missing,
    /// The key exists without an expiry.
    Persistent,
    /// The key expires after this duration.
    Expires(Duration),
}

/// One operation of an atomic batch.
///
/// Preconditions (`Expect` guards and `Rename` sources) are checked against
/// the state before the batch runs. If any fails, nothing is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Guard: `key` must hold `value` (`None` = absent). Fails with
    /// [`StoreError::Conflict`].
    Expect { key: String, value: Option<String> },
    /// Move `from` to `to`, keeping the remaining TTL. Fails with
    /// [`StoreError::NoSuchKey`] if `from` is missing.
    Rename { from: String, to: String },
    /// Set `key` to `value`, expiring after `ttl`.
    SetEx {
        key: String,
        value: String,
        ttl: Duration,
    },
}

/// Token store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("token store is unavailable: {0}")]
    Unavailable(String),

    #[error("token store call exceeded its {0:?} deadline")]
    Timeout(Duration),

    #[error("no such key: {0}")]
    NoSuchKey(String),

    #[error("key {0} changed concurrently")]
    Conflict(String),

    #[error("token store backend error: {0}")]
    Backend(String),

    #[error("unsupported token store scheme: {0}")]
    UnsupportedScheme(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Contract for the shared token backend.
///
/// Implementations must be `Send + Sync`: a single store is shared by every
/// request handler.
#[async_trait]
pub trait TokenStore: Send + Sync + 'static {
    /// Read the value stored at `key`.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Remaining lifetime of `key`.
    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl>;

    /// Value and remaining lifetime of `key`, read as one consistent snapshot.
    async fn get_with_ttl(&self, key: &str) -> StoreResult<(Option<String>, KeyTtl)>;

    /// Apply every operation as one atomic unit.
    ///
    /// All preconditions are checked before the first write, so a batch either
    /// applies completely or not at all. No intermediate state may be
    /// observable by concurrent readers.
    async fn execute_atomic(&self, ops: Vec<BatchOp>) -> StoreResult<()>;

    /// Round-trip check used by readiness probes.
    async fn ping(&self) -> StoreResult<()>;
}

/// Build the backend selected by the URI scheme of `location`.
///
/// Connecting is bounded by `deadline`, like every other store call.
pub async fn connect(location: &Url, deadline: Duration) -> StoreResult<Arc<dyn TokenStore>> {
    match location.scheme() {
        "memory" => Ok(Arc::new(InMemoryTokenStore::new())),
        "redis" | "rediss" => {
            let store = with_deadline(deadline, RedisTokenStore::connect(location)).await?;
            Ok(Arc::new(store))
        }
        other => Err(StoreError::UnsupportedScheme(other.to_string())),
    }
}

/// Bound a store future by `deadline`.
pub async fn with_deadline<T, F>(deadline: Duration, call: F) -> StoreResult<T>
where
    F: std::future::Future<Output = StoreResult<T>>,
{
    tokio::time::timeout(deadline, call)
        .await
        .map_err(|_| StoreError::Timeout(deadline))?
}
