// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication errors.

use axum::{
    http::{header::WWW_AUTHENTICATE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::store::StoreError;

/// Authentication error type.
///
/// A missing or foreign authorization scheme is not an error: the
/// authenticator passes the request through. Everything here is a rejection.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Keyword present but no token follows it
    #[error("Invalid token header. No credentials provided.")]
    MissingCredentials,
    /// More than one token after the keyword
    #[error("Invalid token header. Token string should not contain spaces.")]
    MalformedToken,
    /// Token bytes are not valid UTF-8
    #[error("Invalid token header. Token string should not contain invalid characters.")]
    InvalidCharacters,
    /// Token matches neither the current nor the obsolete slot
    #[error("Invalid token header.")]
    InvalidToken,
    /// Handler requires a principal but no credential was sent
    #[error("Authentication credentials were not provided.")]
    NotAuthenticated,
    /// Host allow-list is active and the request has no Host header
    #[error("Bad request: Host header is required")]
    MissingHost,
    /// Host allow-list is active and the request host is not listed
    #[error("Host is not allowed")]
    HostNotAllowed,
    /// Authenticated, but the endpoint is reserved for the service account
    #[error("This endpoint is restricted to the service account")]
    ServiceAccountRequired,
    /// Token store failure while validating
    #[error("Token store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Serialize)]
struct AuthErrorBody {
    error: String,
    error_code: String,
}

impl AuthError {
    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::MissingCredentials => "missing_credentials",
            AuthError::MalformedToken => "malformed_token",
            AuthError::InvalidCharacters => "invalid_characters",
            AuthError::InvalidToken => "invalid_token",
            AuthError::NotAuthenticated => "not_authenticated",
            AuthError::MissingHost => "missing_host",
            AuthError::HostNotAllowed => "host_not_allowed",
            AuthError::ServiceAccountRequired => "service_account_required",
            AuthError::Store(_) => "token_store_unavailable",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::MissingCredentials
            | AuthError::MalformedToken
            | AuthError::InvalidCharacters
            | AuthError::InvalidToken
            | AuthError::NotAuthenticated => StatusCode::UNAUTHORIZED,
            AuthError::MissingHost => StatusCode::BAD_REQUEST,
            AuthError::HostNotAllowed | AuthError::ServiceAccountRequired => StatusCode::FORBIDDEN,
            AuthError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(AuthErrorBody {
            error: self.to_string(),
            error_code: self.error_code().to_string(),
        });
        (status, body).into_response()
    }
}

/// An [`AuthError`] paired with the scheme keyword to advertise.
///
/// 401 responses carry `WWW-Authenticate: <keyword>` so clients know which
/// scheme the endpoint expects.
#[derive(Debug)]
pub struct AuthRejection {
    pub error: AuthError,
    pub keyword: String,
}

impl AuthRejection {
    pub fn new(error: AuthError, keyword: impl Into<String>) -> Self {
        Self {
            error,
            keyword: keyword.into(),
        }
    }
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let challenge = (self.error.status_code() == StatusCode::UNAUTHORIZED)
            .then(|| HeaderValue::from_str(&self.keyword).ok())
            .flatten();

        let mut response = self.error.into_response();
        if let Some(value) = challenge {
            response.headers_mut().insert(WWW_AUTHENTICATE, value);
        }
        response
    }
}
