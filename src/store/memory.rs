// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-process token store.
//!
//! Keeps keys in a mutex-guarded map with lazy expiry. Only suitable when a
//! single process both issues and validates tokens (tests, local development).
//! Uses the tokio clock so tests can drive expiry with a paused runtime.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{BatchOp, KeyTtl, StoreError, StoreResult, TokenStore};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Mutex-guarded key map with per-key expiry.
#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, HashMap<String, Entry>>> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".into()))
    }

    fn live_entry(entries: &mut HashMap<String, Entry>, key: &str, now: Instant) -> Option<Entry> {
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Some(entry.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut entries = self.lock()?;
        Ok(Self::live_entry(&mut entries, key, Instant::now()).map(|entry| entry.value))
    }

    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl> {
        self.get_with_ttl(key).await.map(|(_, ttl)| ttl)
    }

    async fn get_with_ttl(&self, key: &str) -> StoreResult<(Option<String>, KeyTtl)> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        Ok(match Self::live_entry(&mut entries, key, now) {
            None => (None, KeyTtl::Missing),
            Some(Entry {
                value,
                expires_at: None,
            }) => (Some(value), KeyTtl::Persistent),
            Some(Entry {
                value,
                expires_at: Some(at),
            }) => (Some(value), KeyTtl::Expires(at.saturating_duration_since(now))),
        })
    }

    async fn execute_atomic(&self, ops: Vec<BatchOp>) -> StoreResult<()> {
        let now = Instant::now();
        let mut entries = self.lock()?;

        for op in &ops {
            match op {
                BatchOp::Expect { key, value } => {
                    let found = Self::live_entry(&mut entries, key, now).map(|e| e.value);
                    if found != *value {
                        return Err(StoreError::Conflict(key.clone()));
                    }
                }
                BatchOp::Rename { from, .. } => {
                    if Self::live_entry(&mut entries, from, now).is_none() {
                        return Err(StoreError::NoSuchKey(from.clone()));
                    }
                }
                BatchOp::SetEx { .. } => {}
            }
        }

        for op in ops {
            match op {
                BatchOp::Expect { .. } => {}
                BatchOp::Rename { from, to } => {
                    if let Some(entry) = entries.remove(&from) {
                        entries.insert(to, entry);
                    }
                }
                BatchOp::SetEx { key, value, ttl } => {
                    entries.insert(
                        key,
                        Entry {
                            value,
                            expires_at: Some(now + ttl),
                        },
                    );
                }
            }
        }

        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        self.lock().map(|_| ())
    }
}

impl InMemoryTokenStore {
    /// Store `value` without expiry.
    ///
    /// Mirrors a plain `SET`; the token manager never does this, but an
    /// operator (or a test) may.
    pub fn set_persistent(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> StoreResult<()> {
        self.lock()?.insert(
            key.into(),
            Entry {
                value: value.into(),
                expires_at: None,
            },
        );
        Ok(())
    }

    /// Store `value` expiring after `ttl`.
    pub fn set_with_ttl(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
        ttl: Duration,
    ) -> StoreResult<()> {
        self.lock()?.insert(
            key.into(),
            Entry {
                value: value.into(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }
}
