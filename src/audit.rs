// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Audit logging with real-user attribution.
//!
//! Audit trails must name the person behind a change, not the service
//! account that relayed it. [`AuditLog`] takes an [`ActorResolver`] at
//! construction time and uses it to fill in the author of every event recorded
//! for an authenticated request.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::identity::{IdentityError, IdentityResolver};
use crate::principal::Principal;

/// Types of auditable events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Auth events
    AuthSuccess,
    AuthFailure,
    PermissionDenied,

    // Identity events
    IdentityResolved,

    // Generic change made through the API
    ResourceChanged,
}

/// An audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuditEvent {
    /// Unique event ID.
    pub event_id: String,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Type of event.
    pub event_type: AuditEventType,
    /// Username of the real actor (if known).
    pub actor: Option<String>,
    /// Resource affected.
    pub resource_id: Option<String>,
    /// Resource type.
    pub resource_type: Option<String>,
    /// Additional details as JSON.
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Error message if operation failed.
    pub error: Option<String>,
}

impl AuditEvent {
    /// Create a new audit event.
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            actor: None,
            resource_id: None,
            resource_type: None,
            details: None,
            success: true,
            error: None,
        }
    }

    /// Set the actor explicitly.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Set the resource.
    pub fn with_resource(
        mut self,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        self.resource_type = Some(resource_type.into());
        self.resource_id = Some(resource_id.into());
        self
    }

    /// Add details.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Mark as failed with error message.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }
}

/// Destination for audit events.
pub trait AuditSink: Send + Sync + 'static {
    fn record(&self, event: &AuditEvent);
}

/// Emits audit events through `tracing` under the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) {
        match serde_json::to_string(event) {
            Ok(json) => tracing::info!(target: "audit", event = %json, "audit event"),
            Err(e) => tracing::warn!(target: "audit", error = %e, "Failed to serialize audit event"),
        }
    }
}

/// Keeps audit events in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded events, oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Determines who should be credited for an authenticated request.
#[async_trait]
pub trait ActorResolver: Send + Sync + 'static {
    async fn resolve_actor(
        &self,
        principal: &Principal,
        headers: &HeaderMap,
    ) -> Result<Principal, IdentityError>;
}

#[async_trait]
impl ActorResolver for IdentityResolver {
    async fn resolve_actor(
        &self,
        principal: &Principal,
        headers: &HeaderMap,
    ) -> Result<Principal, IdentityError> {
        self.resolve_real_user(principal, headers).await
    }
}

/// Audit log front end.
#[derive(Clone)]
pub struct AuditLog {
    sink: Arc<dyn AuditSink>,
    actor_resolver: Option<Arc<dyn ActorResolver>>,
}

impl AuditLog {
    /// Audit log crediting the authenticated principal as-is.
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self {
            sink,
            actor_resolver: None,
        }
    }

    /// Credit events to whoever `resolver` names for the request.
    pub fn with_actor_resolver(mut self, resolver: Arc<dyn ActorResolver>) -> Self {
        self.actor_resolver = Some(resolver);
        self
    }

    /// Record an event without request context.
    pub fn record(&self, event: AuditEvent) -> AuditEvent {
        self.sink.record(&event);
        event
    }

    /// Record an event for a request.
    ///
    /// When a principal is given and the event has no actor yet, the actor is
    /// filled in from the resolver. Resolution errors are returned and
    /// nothing is recorded.
    pub async fn record_for_request(
        &self,
        mut event: AuditEvent,
        principal: Option<&Principal>,
        headers: &HeaderMap,
    ) -> Result<AuditEvent, IdentityError> {
        if event.actor.is_none() {
            if let Some(principal) = principal {
                let actor = match &self.actor_resolver {
                    Some(resolver) => resolver.resolve_actor(principal, headers).await?,
                    None => principal.clone(),
                };
                event.actor = Some(actor.username().to_string());
            }
        }

        Ok(self.record(event))
    }
}
