// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Service account credential checks.
//!
//! Clients authenticate by sending the shared token in the `Authorization`
//! header, prefixed with the configured keyword:
//!
//! ```text
//! Authorization: ServiceAccountToken 401f7ac837da42b97f613d789819ff93537bee6a
//! ```
//!
//! Requests using another scheme (or none) are passed through untouched so
//! other authentication layers can handle them.

use std::sync::Arc;

use axum::http::{
    header::{AUTHORIZATION, HOST},
    HeaderMap, HeaderValue,
};

use super::{AuthError, AuthRejection};
use crate::config::ServiceAccountConfig;
use crate::principal::Principal;
use crate::token::TokenManager;

/// Outcome of a successful authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticated {
    /// Always [`Principal::ServiceAccount`] for this scheme.
    pub principal: Principal,
    /// The raw token presented by the caller.
    pub token: String,
}

/// Token credential authenticator.
#[derive(Clone)]
pub struct Authenticator {
    tokens: TokenManager,
    config: Arc<ServiceAccountConfig>,
}

impl Authenticator {
    pub fn new(tokens: TokenManager, config: Arc<ServiceAccountConfig>) -> Self {
        Self { tokens, config }
    }

    /// Scheme keyword expected in the `Authorization` header.
    pub fn keyword(&self) -> &str {
        &self.config.keyword
    }

    /// Value for the `WWW-Authenticate` header of 401 responses.
    pub fn authenticate_header(&self) -> &str {
        self.keyword()
    }

    /// Wrap `error` so its response advertises this scheme.
    pub fn reject(&self, error: AuthError) -> AuthRejection {
        AuthRejection::new(error, self.keyword())
    }

    /// Authenticate a request from its headers.
    ///
    /// Returns `Ok(None)` when the request does not use this scheme.
    pub async fn authenticate(
        &self,
        headers: &HeaderMap,
    ) -> Result<Option<Authenticated>, AuthError> {
        let Some(token) = parse_credentials(self.keyword(), headers.get(AUTHORIZATION))? else {
            return Ok(None);
        };

        self.authenticate_credentials(token, headers).await.map(Some)
    }

    /// Validate an already extracted token against the store and host policy.
    pub async fn authenticate_credentials(
        &self,
        token: &str,
        headers: &HeaderMap,
    ) -> Result<Authenticated, AuthError> {
        if !self.tokens.is_token_valid(token).await? {
            tracing::warn!("Rejected service account request with invalid token");
            return Err(AuthError::InvalidToken);
        }

        self.check_host(headers)?;

        Ok(Authenticated {
            principal: Principal::ServiceAccount,
            token: token.to_string(),
        })
    }

    fn check_host(&self, headers: &HeaderMap) -> Result<(), AuthError> {
        if !self.config.restricts_hosts() {
            return Ok(());
        }

        let host = headers.get(HOST).ok_or_else(|| {
            tracing::warn!("Rejected service account request without Host header");
            AuthError::MissingHost
        })?;

        match host.to_str() {
            Ok(host) if self.config.whitelisted_hosts.contains(host) => Ok(()),
            Ok(host) => {
                tracing::warn!(host, "Rejected service account request from unlisted host");
                Err(AuthError::HostNotAllowed)
            }
            Err(_) => {
                tracing::warn!("Rejected service account request with unreadable Host header");
                Err(AuthError::HostNotAllowed)
            }
        }
    }
}

/// Extract the token from an `Authorization` header value.
///
/// - `Ok(None)`: header absent or another scheme
/// - `Ok(Some(token))`: exactly one UTF-8 token after the keyword
/// - `Err(..)`: keyword matched but the credential is malformed
pub fn parse_credentials<'a>(
    keyword: &str,
    header: Option<&'a HeaderValue>,
) -> Result<Option<&'a str>, AuthError> {
    let Some(header) = header else {
        return Ok(None);
    };

    let mut parts = header
        .as_bytes()
        .split(u8::is_ascii_whitespace)
        .filter(|part| !part.is_empty());

    match parts.next() {
        Some(scheme) if scheme.eq_ignore_ascii_case(keyword.as_bytes()) => {}
        _ => return Ok(None),
    }

    let token = parts.next().ok_or(AuthError::MissingCredentials)?;
    if parts.next().is_some() {
        return Err(AuthError::MalformedToken);
    }

    std::str::from_utf8(token)
        .map(Some)
        .map_err(|_| AuthError::InvalidCharacters)
}
