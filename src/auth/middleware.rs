// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication middleware for Axum.
//!
//! Runs the [`Authenticator`](super::Authenticator) once per request and stores
//! the result in the request extensions, where the extractors in
//! `extractor.rs` pick it up.
//!
//! ```rust,ignore
//! let app = Router::new()
//!     .route("/protected", get(protected_handler))
//!     .layer(axum::middleware::from_fn_with_state(state.clone(), authenticate));
//! ```

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::audit::{AuditEvent, AuditEventType};
use crate::state::AppState;

/// Authenticate the request if it carries service account credentials.
///
/// - no credentials for this scheme: request continues unauthenticated
/// - valid credentials: [`Principal`](crate::principal::Principal) and
///   [`Authenticated`](super::Authenticated) are inserted into the extensions
///   and the success audited
/// - invalid credentials: the request is rejected and an audit event recorded
pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    match state.authenticator.authenticate(request.headers()).await {
        Ok(Some(authenticated)) => {
            tracing::debug!(path = %request.uri().path(), "Service account authenticated");
            state.audit.record(
                AuditEvent::new(AuditEventType::AuthSuccess)
                    .with_actor(authenticated.principal.username())
                    .with_resource("path", request.uri().path()),
            );
            request
                .extensions_mut()
                .insert(authenticated.principal.clone());
            request.extensions_mut().insert(authenticated);
            next.run(request).await
        }
        Ok(None) => next.run(request).await,
        Err(err) => {
            state.audit.record(
                AuditEvent::new(AuditEventType::AuthFailure)
                    .with_resource("path", request.uri().path())
                    .failed(err.error_code()),
            );
            state.authenticator.reject(err).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{header::AUTHORIZATION, StatusCode},
        routing::get,
        Router,
    };
    use tower::ServiceExt;

    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::principal::Principal;

    async fn current_principal(request: Request) -> String {
        request
            .extensions()
            .get::<Principal>()
            .map(|principal| principal.username().to_string())
            .unwrap_or_else(|| "anonymous".to_string())
    }

    fn app(state: AppState) -> Router {
        Router::new()
            .route("/principal", get(current_principal))
            .layer(axum::middleware::from_fn_with_state(state.clone(), authenticate))
            .with_state(state)
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn unauthenticated_requests_pass_through() {
        let sink = Arc::new(MemoryAuditSink::new());
        let response = app(AppState::default().with_audit_sink(sink.clone()))
            .oneshot(Request::builder().uri("/principal").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "anonymous");
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn valid_token_sets_principal() {
        let sink = Arc::new(MemoryAuditSink::new());
        let state = AppState::default().with_audit_sink(sink.clone());
        let token = state.tokens.get_or_create_token().await.unwrap();

        let response = app(state)
            .oneshot(
                Request::builder()
                    .uri("/principal")
                    .header(AUTHORIZATION, format!("ServiceAccountToken {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "service_account");

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, AuditEventType::AuthSuccess);
        assert_eq!(events[0].actor.as_deref(), Some("service_account"));
        assert_eq!(events[0].resource_id.as_deref(), Some("/principal"));
        assert!(events[0].success);
    }

    #[tokio::test]
    async fn invalid_token_is_rejected_and_audited() {
        let sink = Arc::new(MemoryAuditSink::new());
        let state = AppState::default().with_audit_sink(sink.clone());

        let response = app(state)
            .oneshot(
                Request::builder()
                    .uri("/principal")
                    .header(AUTHORIZATION, "ServiceAccountToken nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get("www-authenticate").unwrap(),
            "ServiceAccountToken"
        );

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, AuditEventType::AuthFailure);
        assert_eq!(events[0].error.as_deref(), Some("invalid_token"));
        assert_eq!(events[0].resource_id.as_deref(), Some("/principal"));
    }
}
