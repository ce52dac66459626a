// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Service Account - shared rotating token authentication
//!
//! Lets internal services call each other as a privileged service account
//! while acting on behalf of a named end-user. All participating processes
//! share one random token kept in a TTL store; the token rotates shortly
//! before it expires and the previous one stays valid for a grace window.
//!
//! ## Modules
//!
//! - `store` - Token store contract, Redis and in-memory backends
//! - `token` - Token issuance, rotation and validation
//! - `auth` - `Authorization` header authenticator, middleware and extractors
//! - `identity` - Real-user resolution and outbound headers
//! - `audit` - Audit events attributed to the real user
//! - `api` - HTTP API handlers (Axum)

pub mod api;
pub mod audit;
pub mod auth;
pub mod config;
pub mod directory;
pub mod error;
pub mod identity;
pub mod principal;
pub mod state;
pub mod store;
pub mod token;
