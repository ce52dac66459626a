// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractors for authenticated principals.
//!
//! Use the `Auth` extractor in handlers to require authentication:
//!
//! ```rust,ignore
//! async fn my_handler(Auth(principal): Auth) -> impl IntoResponse {
//!     // principal is Principal::ServiceAccount or Principal::User
//! }
//! ```
//!
//! Every extractor first looks for a principal set by the
//! [`authenticate`](super::authenticate) middleware and only runs the
//! authenticator itself when the middleware is not mounted.

use axum::{
    extract::FromRequestParts,
    http::request::Parts,
    response::{IntoResponse, Response},
};

use super::{AuthError, AuthRejection};
use crate::audit::{AuditEvent, AuditEventType};
use crate::principal::Principal;
use crate::state::AppState;

async fn principal_from_parts(
    parts: &Parts,
    state: &AppState,
) -> Result<Option<Principal>, AuthRejection> {
    if let Some(principal) = parts.extensions.get::<Principal>().cloned() {
        return Ok(Some(principal));
    }

    state
        .authenticator
        .authenticate(&parts.headers)
        .await
        .map(|authenticated| authenticated.map(|a| a.principal))
        .map_err(|err| state.authenticator.reject(err))
}

/// Extractor for authenticated principals.
///
/// Rejects with 401 when the request carries no credentials for this scheme.
pub struct Auth(pub Principal);

impl FromRequestParts<AppState> for Auth {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        principal_from_parts(parts, state)
            .await?
            .map(Auth)
            .ok_or_else(|| state.authenticator.reject(AuthError::NotAuthenticated))
    }
}

/// Optional authentication extractor.
///
/// Yields `None` when no credentials for this scheme were sent. Credentials
/// that are present but invalid are still rejected.
pub struct OptionalAuth(pub Option<Principal>);

impl FromRequestParts<AppState> for OptionalAuth {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        principal_from_parts(parts, state).await.map(OptionalAuth)
    }
}

/// Extractor that only admits the service account.
pub struct ServiceAccountOnly;

impl FromRequestParts<AppState> for ServiceAccountOnly {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Auth(principal) = Auth::from_request_parts(parts, state).await?;

        if !principal.is_service_account() {
            tracing::warn!(username = principal.username(), "Service account required");
            state.audit.record(
                AuditEvent::new(AuditEventType::PermissionDenied)
                    .with_actor(principal.username())
                    .with_resource("path", parts.uri.path())
                    .failed(AuthError::ServiceAccountRequired.error_code()),
            );
            return Err(state.authenticator.reject(AuthError::ServiceAccountRequired));
        }

        Ok(ServiceAccountOnly)
    }
}

/// The end-user a request acts for.
///
/// For the service account this is the user named in the on-behalf header;
/// regular users are returned as they are.
pub struct RealUser(pub Principal);

impl FromRequestParts<AppState> for RealUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Auth(principal) = Auth::from_request_parts(parts, state)
            .await
            .map_err(IntoResponse::into_response)?;

        state
            .identity
            .resolve_real_user(&principal, &parts.headers)
            .await
            .map(RealUser)
            .map_err(IntoResponse::into_response)
    }
}
