// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Shared-token authentication for service-to-service calls.
//!
//! ## Auth Flow
//!
//! 1. The calling service asks its [`TokenManager`](crate::token::TokenManager)
//!    for the current token (rotating it if it is about to expire)
//! 2. It sends `Authorization: ServiceAccountToken <token>` plus the on-behalf
//!    header naming the end-user
//! 3. The receiving service:
//!    - Parses the header (other schemes pass through untouched)
//!    - Checks the token against the current and obsolete slots
//!    - Enforces the host allow-list when one is configured
//!    - Exposes [`Principal::ServiceAccount`](crate::principal::Principal) to
//!      handlers
//!
//! ## Security
//!
//! - Token values are never logged
//! - The obsolete token is accepted only until its TTL runs out
//! - Store outages surface as 503, never as a successful authentication

pub mod authenticator;
pub mod error;
pub mod extractor;
pub mod middleware;

pub use authenticator::{parse_credentials, Authenticated, Authenticator};
pub use error::{AuthError, AuthRejection};
pub use extractor::{Auth, OptionalAuth, RealUser, ServiceAccountOnly};
pub use middleware::authenticate;
