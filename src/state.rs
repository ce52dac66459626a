// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::audit::{AuditLog, AuditSink, TracingAuditSink};
use crate::auth::Authenticator;
use crate::config::ServiceAccountConfig;
use crate::directory::{InMemoryUserDirectory, UserDirectory};
use crate::identity::IdentityResolver;
use crate::store::{InMemoryTokenStore, TokenStore};
use crate::token::TokenManager;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceAccountConfig>,
    pub tokens: TokenManager,
    pub authenticator: Authenticator,
    pub identity: IdentityResolver,
    pub audit: AuditLog,
}

impl AppState {
    pub fn new(
        config: ServiceAccountConfig,
        store: Arc<dyn TokenStore>,
        directory: Arc<dyn UserDirectory>,
        audit_sink: Arc<dyn AuditSink>,
    ) -> Self {
        let config = Arc::new(config);
        let tokens = TokenManager::new(store, config.clone());
        let identity = IdentityResolver::new(tokens.clone(), directory);
        let audit = AuditLog::new(audit_sink).with_actor_resolver(Arc::new(identity.clone()));

        Self {
            authenticator: Authenticator::new(tokens.clone(), config.clone()),
            config,
            tokens,
            identity,
            audit,
        }
    }

    /// Replace the user directory, keeping the token store.
    pub fn with_directory(mut self, directory: Arc<dyn UserDirectory>) -> Self {
        self.identity = IdentityResolver::new(self.tokens.clone(), directory);
        self.audit = self
            .audit
            .with_actor_resolver(Arc::new(self.identity.clone()));
        self
    }

    /// Replace the audit sink, keeping the actor resolver.
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = AuditLog::new(sink).with_actor_resolver(Arc::new(self.identity.clone()));
        self
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(
            ServiceAccountConfig::default(),
            Arc::new(InMemoryTokenStore::new()),
            Arc::new(InMemoryUserDirectory::new()),
            Arc::new(TracingAuditSink),
        )
    }
}
