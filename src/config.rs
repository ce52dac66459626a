// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! This module defines environment variable names, default values and the
//! [`ServiceAccountConfig`] struct shared by the token manager, the
//! authenticator and the identity resolver. Configuration is loaded once at
//! startup and is read-only afterwards.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `SERVICE_ACCOUNT_BACKEND_LOCATION` | Token store URI (`redis://`, `rediss://`, `memory://`) | `redis://localhost/` |
//! | `SERVICE_ACCOUNT_NAMESPACE` | Prefix for store keys | `service-account` |
//! | `SERVICE_ACCOUNT_TOKEN_TTL` | Token lifetime in seconds | `60` |
//! | `SERVICE_ACCOUNT_TOKEN_TTL_EXPIRY_THRESHOLD` | Seconds before expiry at which rotation starts | `5` |
//! | `SERVICE_ACCOUNT_TOKEN_LENGTH` | Token length in characters | `50` |
//! | `SERVICE_ACCOUNT_ON_BEHALF_HEADER` | Header carrying the real username | `Service-Account-On-Behalf` |
//! | `SERVICE_ACCOUNT_WHITELISTED_HOSTS` | Comma-separated allowed caller hosts | empty (disabled) |
//! | `SERVICE_ACCOUNT_KEYWORD` | Authorization scheme keyword | `ServiceAccountToken` |
//! | `SERVICE_ACCOUNT_STORE_TIMEOUT_MS` | Deadline for a single store call | `2000` |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `SEED_USERS` | Comma-separated usernames seeded into the user directory | empty |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::collections::BTreeSet;
use std::time::Duration;

use axum::http::{HeaderName, HeaderValue};
use url::Url;

pub const BACKEND_LOCATION_ENV: &str = "SERVICE_ACCOUNT_BACKEND_LOCATION";
pub const NAMESPACE_ENV: &str = "SERVICE_ACCOUNT_NAMESPACE";
pub const TOKEN_TTL_ENV: &str = "SERVICE_ACCOUNT_TOKEN_TTL";
pub const TOKEN_TTL_EXPIRY_THRESHOLD_ENV: &str = "SERVICE_ACCOUNT_TOKEN_TTL_EXPIRY_THRESHOLD";
pub const TOKEN_LENGTH_ENV: &str = "SERVICE_ACCOUNT_TOKEN_LENGTH";
pub const ON_BEHALF_HEADER_ENV: &str = "SERVICE_ACCOUNT_ON_BEHALF_HEADER";
pub const WHITELISTED_HOSTS_ENV: &str = "SERVICE_ACCOUNT_WHITELISTED_HOSTS";
pub const KEYWORD_ENV: &str = "SERVICE_ACCOUNT_KEYWORD";
pub const STORE_TIMEOUT_MS_ENV: &str = "SERVICE_ACCOUNT_STORE_TIMEOUT_MS";

/// Environment variable name for the server bind address.
pub const HOST_ENV: &str = "HOST";
/// Environment variable name for the server bind port.
pub const PORT_ENV: &str = "PORT";
/// Comma-separated usernames inserted into the in-memory user directory.
pub const SEED_USERS_ENV: &str = "SEED_USERS";
/// `json` switches the subscriber to JSON output.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const DEFAULT_BACKEND_LOCATION: &str = "redis://localhost/";
pub const DEFAULT_NAMESPACE: &str = "service-account";
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 60;
pub const DEFAULT_TOKEN_TTL_EXPIRY_THRESHOLD_SECS: u64 = 5;
pub const DEFAULT_TOKEN_LENGTH: usize = 50;
pub const DEFAULT_ON_BEHALF_HEADER: &str = "Service-Account-On-Behalf";
pub const DEFAULT_KEYWORD: &str = "ServiceAccountToken";
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 2_000;

/// Configuration loading and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be an unsigned integer, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },

    #[error("invalid backend location {location:?}: {source}")]
    InvalidBackendLocation {
        location: String,
        #[source]
        source: url::ParseError,
    },

    #[error("unsupported backend scheme {0:?} (expected redis, rediss or memory)")]
    UnsupportedBackend(String),

    #[error("token TTL threshold ({threshold}s) must be lower than token TTL ({ttl}s)")]
    ThresholdNotBelowTtl { ttl: u64, threshold: u64 },

    #[error("token length must be greater than zero")]
    EmptyTokenLength,

    #[error("namespace must not be empty")]
    EmptyNamespace,

    #[error("keyword must be a non-empty header token without whitespace, got {0:?}")]
    InvalidKeyword(String),

    #[error("invalid on-behalf header name {0:?}")]
    InvalidOnBehalfHeader(String),

    #[error("store timeout must be greater than zero")]
    ZeroStoreTimeout,
}

/// Process-wide service account settings.
///
/// Built once at startup, validated, then shared read-only (usually behind an
/// `Arc`) by every component that needs it.
#[derive(Debug, Clone)]
pub struct ServiceAccountConfig {
    /// Token store connection URI.
    pub backend_location: Url,
    /// Prefix for store key names.
    pub namespace: String,
    /// Lifetime of a freshly issued token.
    pub token_ttl: Duration,
    /// Remaining lifetime below which the current token is rotated.
    pub token_ttl_expiry_threshold: Duration,
    /// Number of characters in a generated token.
    pub token_length: usize,
    /// Header carrying the username of the real end-user.
    pub on_behalf_header: HeaderName,
    /// Allowed caller hosts. Empty disables the check.
    pub whitelisted_hosts: BTreeSet<String>,
    /// Authorization scheme keyword, e.g. `ServiceAccountToken`.
    pub keyword: String,
    /// Upper bound on a single store round-trip.
    pub store_timeout: Duration,
}

impl Default for ServiceAccountConfig {
    fn default() -> Self {
        Self {
            // Both literals are compile-time constants known to parse.
            backend_location: Url::parse(DEFAULT_BACKEND_LOCATION)
                .unwrap_or_else(|_| unreachable!("default backend location is a valid URL")),
            namespace: DEFAULT_NAMESPACE.to_string(),
            token_ttl: Duration::from_secs(DEFAULT_TOKEN_TTL_SECS),
            token_ttl_expiry_threshold: Duration::from_secs(
                DEFAULT_TOKEN_TTL_EXPIRY_THRESHOLD_SECS,
            ),
            token_length: DEFAULT_TOKEN_LENGTH,
            on_behalf_header: HeaderName::from_static("service-account-on-behalf"),
            whitelisted_hosts: BTreeSet::new(),
            keyword: DEFAULT_KEYWORD.to_string(),
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
        }
    }
}

impl ServiceAccountConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Unset or blank variables fall back to their defaults. The result is
    /// validated before it is returned.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let location = get(BACKEND_LOCATION_ENV).unwrap_or_else(|| DEFAULT_BACKEND_LOCATION.into());
        let backend_location =
            Url::parse(&location).map_err(|source| ConfigError::InvalidBackendLocation {
                location: location.clone(),
                source,
            })?;

        let on_behalf = get(ON_BEHALF_HEADER_ENV).unwrap_or_else(|| DEFAULT_ON_BEHALF_HEADER.into());
        let on_behalf_header = HeaderName::try_from(on_behalf.as_str())
            .map_err(|_| ConfigError::InvalidOnBehalfHeader(on_behalf.clone()))?;

        let whitelisted_hosts = get(WHITELISTED_HOSTS_ENV)
            .map(|hosts| {
                hosts
                    .split(',')
                    .map(str::trim)
                    .filter(|host| !host.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let config = Self {
            backend_location,
            namespace: get(NAMESPACE_ENV).unwrap_or_else(|| DEFAULT_NAMESPACE.into()),
            token_ttl: Duration::from_secs(parse_u64(
                TOKEN_TTL_ENV,
                get(TOKEN_TTL_ENV),
                DEFAULT_TOKEN_TTL_SECS,
            )?),
            token_ttl_expiry_threshold: Duration::from_secs(parse_u64(
                TOKEN_TTL_EXPIRY_THRESHOLD_ENV,
                get(TOKEN_TTL_EXPIRY_THRESHOLD_ENV),
                DEFAULT_TOKEN_TTL_EXPIRY_THRESHOLD_SECS,
            )?),
            token_length: parse_u64(
                TOKEN_LENGTH_ENV,
                get(TOKEN_LENGTH_ENV),
                DEFAULT_TOKEN_LENGTH as u64,
            )? as usize,
            on_behalf_header,
            whitelisted_hosts,
            keyword: get(KEYWORD_ENV).unwrap_or_else(|| DEFAULT_KEYWORD.into()),
            store_timeout: Duration::from_millis(parse_u64(
                STORE_TIMEOUT_MS_ENV,
                get(STORE_TIMEOUT_MS_ENV),
                DEFAULT_STORE_TIMEOUT_MS,
            )?),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.backend_location.scheme() {
            "redis" | "rediss" | "memory" => {}
            other => return Err(ConfigError::UnsupportedBackend(other.to_string())),
        }

        if self.token_ttl_expiry_threshold >= self.token_ttl {
            return Err(ConfigError::ThresholdNotBelowTtl {
                ttl: self.token_ttl.as_secs(),
                threshold: self.token_ttl_expiry_threshold.as_secs(),
            });
        }

        if self.token_length == 0 {
            return Err(ConfigError::EmptyTokenLength);
        }

        if self.namespace.is_empty() {
            return Err(ConfigError::EmptyNamespace);
        }

        if self.keyword.is_empty()
            || self.keyword.chars().any(char::is_whitespace)
            || HeaderValue::from_str(&self.keyword).is_err()
        {
            return Err(ConfigError::InvalidKeyword(self.keyword.clone()));
        }

        if self.store_timeout.is_zero() {
            return Err(ConfigError::ZeroStoreTimeout);
        }

        Ok(())
    }

    /// Store key holding the current token.
    pub fn current_key(&self) -> String {
        format!("{}::authentication_key::current", self.namespace)
    }

    /// Store key holding the previous token during its grace window.
    pub fn obsolete_key(&self) -> String {
        format!("{}::authentication_key::obsolete", self.namespace)
    }

    /// Whether the caller host allow-list is active.
    pub fn restricts_hosts(&self) -> bool {
        !self.whitelisted_hosts.is_empty()
    }
}

fn parse_u64(name: &'static str, value: Option<String>, default: u64) -> Result<u64, ConfigError> {
    match value {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { name, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = ServiceAccountConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.namespace, DEFAULT_NAMESPACE);
        assert_eq!(config.token_ttl, Duration::from_secs(60));
        assert_eq!(config.token_ttl_expiry_threshold, Duration::from_secs(5));
        assert_eq!(config.token_length, 50);
        assert_eq!(config.keyword, "ServiceAccountToken");
        assert_eq!(config.on_behalf_header.as_str(), "service-account-on-behalf");
        assert_eq!(config.backend_location.scheme(), "redis");
        assert!(!config.restricts_hosts());
    }

    #[test]
    fn overrides_are_read() {
        let config = ServiceAccountConfig::from_lookup(lookup(&[
            (TOKEN_TTL_ENV, "3"),
            (TOKEN_TTL_EXPIRY_THRESHOLD_ENV, "2"),
            (TOKEN_LENGTH_ENV, "10"),
            (WHITELISTED_HOSTS_ENV, "testserver, other ,"),
            (BACKEND_LOCATION_ENV, "memory://"),
        ]))
        .unwrap();
        assert_eq!(config.token_ttl, Duration::from_secs(3));
        assert_eq!(config.token_ttl_expiry_threshold, Duration::from_secs(2));
        assert_eq!(config.token_length, 10);
        assert_eq!(config.whitelisted_hosts.len(), 2);
        assert!(config.whitelisted_hosts.contains("testserver"));
        assert!(config.whitelisted_hosts.contains("other"));
    }

    #[test]
    fn threshold_must_stay_below_ttl() {
        let err = ServiceAccountConfig::from_lookup(lookup(&[
            (TOKEN_TTL_ENV, "5"),
            (TOKEN_TTL_EXPIRY_THRESHOLD_ENV, "5"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::ThresholdNotBelowTtl { ttl: 5, threshold: 5 }));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            ServiceAccountConfig::from_lookup(lookup(&[(TOKEN_TTL_ENV, "sixty")])),
            Err(ConfigError::InvalidNumber { name: TOKEN_TTL_ENV, .. })
        ));
        assert!(matches!(
            ServiceAccountConfig::from_lookup(lookup(&[(TOKEN_LENGTH_ENV, "0")])),
            Err(ConfigError::EmptyTokenLength)
        ));
        assert!(matches!(
            ServiceAccountConfig::from_lookup(lookup(&[(KEYWORD_ENV, "Two Words")])),
            Err(ConfigError::InvalidKeyword(_))
        ));
        assert!(matches!(
            ServiceAccountConfig::from_lookup(lookup(&[(ON_BEHALF_HEADER_ENV, "bad header")])),
            Err(ConfigError::InvalidOnBehalfHeader(_))
        ));
        assert!(matches!(
            ServiceAccountConfig::from_lookup(lookup(&[(BACKEND_LOCATION_ENV, "postgres://db/")])),
            Err(ConfigError::UnsupportedBackend(_))
        ));
    }

    #[test]
    fn keyword_must_fit_in_a_header_value() {
        for keyword in ["Service\u{7}Token", "Service\u{7f}Token", "Service\0Token"] {
            let config = ServiceAccountConfig {
                keyword: keyword.to_string(),
                ..ServiceAccountConfig::default()
            };
            assert!(
                matches!(config.validate(), Err(ConfigError::InvalidKeyword(_))),
                "{keyword:?}"
            );
        }

        let config = ServiceAccountConfig {
            keyword: "SystemAccountToken".to_string(),
            ..ServiceAccountConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn store_keys_use_namespace() {
        let config =
            ServiceAccountConfig::from_lookup(lookup(&[(NAMESPACE_ENV, "kpi")])).unwrap();
        assert_eq!(config.current_key(), "kpi::authentication_key::current");
        assert_eq!(config.obsolete_key(), "kpi::authentication_key::obsolete");
    }
}
