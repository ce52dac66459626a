// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Real-user resolution for service account calls.
//!
//! A calling service sends the shared token together with the username of the
//! end-user it acts for:
//!
//! ```text
//! Authorization: ServiceAccountToken <token>
//! Service-Account-On-Behalf: alice
//! ```
//!
//! The receiving side authenticates the service account, then uses
//! [`IdentityResolver::resolve_real_user`] wherever the true actor matters.

use std::sync::Arc;

use axum::{
    http::{header::AUTHORIZATION, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::directory::{DirectoryError, UserDirectory};
use crate::principal::Principal;
use crate::store::StoreError;
use crate::token::TokenManager;

/// Identity resolution errors.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// Service account call without the on-behalf header
    #[error("Missing required header: {0}")]
    MissingHeader(String),
    /// Header present but not valid text
    #[error("Header {0} contains invalid characters")]
    InvalidHeader(String),
    /// No directory user with that username
    #[error("User not found: {0}")]
    UserNotFound(String),
    /// Username cannot be sent as a header value
    #[error("Username cannot be used as a header value: {0:?}")]
    InvalidUsername(String),
    #[error("User directory error: {0}")]
    Directory(#[from] DirectoryError),
    #[error("Token store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Serialize)]
struct IdentityErrorBody {
    error: String,
    error_code: String,
}

impl IdentityError {
    pub fn error_code(&self) -> &'static str {
        match self {
            IdentityError::MissingHeader(_) => "missing_header",
            IdentityError::InvalidHeader(_) => "invalid_header",
            IdentityError::UserNotFound(_) => "user_not_found",
            IdentityError::InvalidUsername(_) => "invalid_username",
            IdentityError::Directory(_) => "directory_unavailable",
            IdentityError::Store(_) => "token_store_unavailable",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            IdentityError::MissingHeader(_)
            | IdentityError::InvalidHeader(_)
            | IdentityError::InvalidUsername(_) => StatusCode::BAD_REQUEST,
            IdentityError::UserNotFound(_) => StatusCode::NOT_FOUND,
            IdentityError::Directory(_) | IdentityError::Store(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }
}

impl IntoResponse for IdentityError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(IdentityErrorBody {
            error: self.to_string(),
            error_code: self.error_code().to_string(),
        });
        (status, body).into_response()
    }
}

/// Resolves the end-user behind service account requests and builds the
/// headers outbound service calls must carry.
#[derive(Clone)]
pub struct IdentityResolver {
    tokens: TokenManager,
    directory: Arc<dyn UserDirectory>,
}

impl IdentityResolver {
    pub fn new(tokens: TokenManager, directory: Arc<dyn UserDirectory>) -> Self {
        Self { tokens, directory }
    }

    fn on_behalf_header(&self) -> &HeaderName {
        &self.tokens.config().on_behalf_header
    }

    /// Return the real user behind `principal`.
    ///
    /// Regular users are returned unchanged. For the service account the
    /// on-behalf header is required and must name an existing user; it never
    /// falls back to the service account itself.
    pub async fn resolve_real_user(
        &self,
        principal: &Principal,
        headers: &HeaderMap,
    ) -> Result<Principal, IdentityError> {
        if !principal.is_service_account() {
            return Ok(principal.clone());
        }

        let header = self.on_behalf_header();
        let username = headers
            .get(header)
            .ok_or_else(|| IdentityError::MissingHeader(header.to_string()))?
            .to_str()
            .map_err(|_| IdentityError::InvalidHeader(header.to_string()))?;

        let user = self
            .directory
            .find_by_username(username)
            .await?
            .ok_or_else(|| IdentityError::UserNotFound(username.to_string()))?;

        tracing::debug!(username = %user.username, "Resolved service account caller");
        Ok(Principal::User(user))
    }

    /// Headers an outbound service call must attach to act for `username`.
    ///
    /// May rotate the shared token as a side effect.
    pub async fn build_outbound_headers(
        &self,
        username: &str,
    ) -> Result<HeaderMap, IdentityError> {
        let on_behalf = HeaderValue::from_str(username)
            .map_err(|_| IdentityError::InvalidUsername(username.to_string()))?;

        let token = self.tokens.get_or_create_token().await?;
        let keyword = &self.tokens.config().keyword;
        let authorization = HeaderValue::from_str(&format!("{keyword} {token}"))
            .map_err(|_| IdentityError::InvalidHeader(AUTHORIZATION.to_string()))?;

        let mut headers = HeaderMap::with_capacity(2);
        headers.insert(AUTHORIZATION, authorization);
        headers.insert(self.on_behalf_header().clone(), on_behalf);
        Ok(headers)
    }
}
