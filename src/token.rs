// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Shared Token Lifecycle
//!
//! The service account authenticates with one shared random token kept in the
//! token store under two slots:
//!
//! ```text
//! {namespace}::authentication_key::current   # token handed out to callers
//! {namespace}::authentication_key::obsolete  # previous token, grace window
//! ```
//!
//! ## Rotation
//!
//! Once the current token has less than `token_ttl_expiry_threshold` left, the
//! next caller regenerates it. The old token is renamed to `obsolete` (keeping
//! its remaining TTL) and a fresh one is written to `current`, both in one
//! atomic batch. Validation accepts either slot, so a request signed just
//! before rotation still authenticates until the obsolete token expires.
//!
//! The batch is guarded on `current` still holding the value that was read.
//! When several callers rotate at once only the first batch applies; the
//! others see a conflict and return the winner's token, so the demoted token
//! is always the one that was about to expire.
//!
//! Tokens are never deleted explicitly; store expiry reaps them.

use std::sync::Arc;

use rand::distr::Alphanumeric;
use rand::Rng;

use crate::config::ServiceAccountConfig;
use crate::store::{with_deadline, BatchOp, KeyTtl, StoreError, StoreResult, TokenStore};

/// Guarded batches lost to concurrent writers before giving up.
const MAX_ROTATION_ATTEMPTS: usize = 3;

/// Generate a random alphanumeric token of `length` characters.
pub fn generate_token(length: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Issues, rotates and validates the shared service account token.
#[derive(Clone)]
pub struct TokenManager {
    store: Arc<dyn TokenStore>,
    config: Arc<ServiceAccountConfig>,
    current_key: String,
    obsolete_key: String,
}

impl TokenManager {
    pub fn new(store: Arc<dyn TokenStore>, config: Arc<ServiceAccountConfig>) -> Self {
        Self {
            current_key: config.current_key(),
            obsolete_key: config.obsolete_key(),
            store,
            config,
        }
    }

    pub fn config(&self) -> &ServiceAccountConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    /// Return a token that is current and not yet below the rotation threshold.
    ///
    /// Creates the first token on demand and rotates the existing one when it
    /// is about to expire.
    pub async fn get_or_create_token(&self) -> StoreResult<String> {
        let threshold = self.config.token_ttl_expiry_threshold;

        for _ in 0..MAX_ROTATION_ATTEMPTS {
            let (observed, ttl) = self.call(self.store.get_with_ttl(&self.current_key)).await?;

            if let (Some(token), KeyTtl::Expires(remaining)) = (&observed, ttl) {
                if remaining >= threshold {
                    tracing::debug!(
                        remaining_ms = remaining.as_millis() as u64,
                        "Reusing current token"
                    );
                    return Ok(token.clone());
                }
            }

            let demote = observed.is_some()
                && matches!(
                    ttl,
                    KeyTtl::Expires(remaining) if !remaining.is_zero() && remaining < threshold
                );
            let token = generate_token(self.config.token_length);

            match self.store_new_token(&token, observed, demote).await {
                Ok(()) => {
                    if demote {
                        tracing::info!(
                            namespace = %self.config.namespace,
                            "Rotated service account token"
                        );
                    } else {
                        tracing::info!(
                            namespace = %self.config.namespace,
                            "Issued new service account token"
                        );
                    }
                    return Ok(token);
                }
                Err(StoreError::Conflict(_)) => {
                    if let Some(winner) = self.call(self.store.get(&self.current_key)).await? {
                        tracing::debug!("Token rotated by another caller");
                        return Ok(winner);
                    }
                }
                Err(err) => return Err(err),
            }
        }

        Err(StoreError::Conflict(self.current_key.clone()))
    }

    /// Whether `candidate` matches the current or the obsolete token.
    pub async fn is_token_valid(&self, candidate: &str) -> StoreResult<bool> {
        let current = self.call(self.store.get(&self.current_key)).await?;
        if current.as_deref() == Some(candidate) {
            return Ok(true);
        }

        let obsolete = self.call(self.store.get(&self.obsolete_key)).await?;
        Ok(obsolete.as_deref() == Some(candidate))
    }

    /// Write `token` to `current` if it still holds `observed`, demoting the
    /// observed token to `obsolete` when `demote` is set.
    async fn store_new_token(
        &self,
        token: &str,
        observed: Option<String>,
        demote: bool,
    ) -> StoreResult<()> {
        let mut ops = Vec::with_capacity(3);
        ops.push(BatchOp::Expect {
            key: self.current_key.clone(),
            value: observed,
        });
        if demote {
            ops.push(BatchOp::Rename {
                from: self.current_key.clone(),
                to: self.obsolete_key.clone(),
            });
        }
        ops.push(BatchOp::SetEx {
            key: self.current_key.clone(),
            value: token.to_string(),
            ttl: self.config.token_ttl,
        });

        // Lost guards are expected under contention and not logged.
        match with_deadline(self.config.store_timeout, self.store.execute_atomic(ops)).await {
            Err(StoreError::Conflict(key) | StoreError::NoSuchKey(key)) => {
                Err(StoreError::Conflict(key))
            }
            result => result
                .inspect_err(|err| tracing::warn!(error = %err, "Token store call failed")),
        }
    }

    async fn call<T>(
        &self,
        call: impl std::future::Future<Output = StoreResult<T>>,
    ) -> StoreResult<T> {
        with_deadline(self.config.store_timeout, call)
            .await
            .inspect_err(|err| tracing::warn!(error = %err, "Token store call failed"))
    }
}
