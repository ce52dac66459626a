// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authenticated principals.
//!
//! A request is made either by a real, directory-backed [`User`] or by the
//! service account, a synthetic superuser shared by trusted backend
//! processes. The service account has no directory record, no id and no
//! password; code that needs the human behind a service call goes through
//! [`IdentityResolver`](crate::identity::IdentityResolver).

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Username reported for the service account.
pub const SERVICE_ACCOUNT_USERNAME: &str = "service_account";

/// A directory-backed user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct User {
    /// Directory identifier.
    pub id: Uuid,
    /// Unique login name.
    pub username: String,
    pub is_active: bool,
    pub is_staff: bool,
    pub is_superuser: bool,
}

impl User {
    /// Create an active, unprivileged user.
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            is_active: true,
            is_staff: false,
            is_superuser: false,
        }
    }

    /// Grant staff and superuser flags.
    pub fn superuser(mut self) -> Self {
        self.is_staff = true;
        self.is_superuser = true;
        self
    }
}

/// The identity attached to an authenticated request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Principal {
    /// A real user from the directory.
    User(User),
    /// The shared service account. All instances compare equal.
    ServiceAccount,
}

impl Principal {
    pub fn is_service_account(&self) -> bool {
        matches!(self, Principal::ServiceAccount)
    }

    pub fn username(&self) -> &str {
        match self {
            Principal::User(user) => &user.username,
            Principal::ServiceAccount => SERVICE_ACCOUNT_USERNAME,
        }
    }

    /// Directory id; the service account has none.
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Principal::User(user) => Some(user.id),
            Principal::ServiceAccount => None,
        }
    }

    pub fn is_active(&self) -> bool {
        match self {
            Principal::User(user) => user.is_active,
            Principal::ServiceAccount => true,
        }
    }

    pub fn is_staff(&self) -> bool {
        match self {
            Principal::User(user) => user.is_staff,
            Principal::ServiceAccount => true,
        }
    }

    pub fn is_superuser(&self) -> bool {
        match self {
            Principal::User(user) => user.is_superuser,
            Principal::ServiceAccount => true,
        }
    }

    /// Principals only exist for authenticated requests.
    pub fn is_authenticated(&self) -> bool {
        true
    }

    pub fn is_anonymous(&self) -> bool {
        false
    }

    /// Whether this principal may perform `_permission`.
    ///
    /// Superusers (including the service account) hold every permission.
    /// Fine-grained permissions for regular users live outside this crate.
    pub fn has_perm(&self, _permission: &str) -> bool {
        self.is_active() && self.is_superuser()
    }

    /// Whether this principal holds every permission in `permissions`.
    pub fn has_perms<'a>(&self, permissions: impl IntoIterator<Item = &'a str>) -> bool {
        permissions.into_iter().all(|permission| self.has_perm(permission))
    }

    /// Serializable summary for API responses.
    pub fn summary(&self) -> PrincipalSummary {
        PrincipalSummary {
            username: self.username().to_string(),
            user_id: self.user_id(),
            is_service_account: self.is_service_account(),
            is_active: self.is_active(),
            is_staff: self.is_staff(),
            is_superuser: self.is_superuser(),
        }
    }
}

impl From<User> for Principal {
    fn from(user: User) -> Self {
        Principal::User(user)
    }
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Principal::User(user) => write!(f, "{}", user.username),
            Principal::ServiceAccount => write!(f, "ServiceAccount"),
        }
    }
}

/// Principal flags as exposed over HTTP.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PrincipalSummary {
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    pub is_service_account: bool,
    pub is_active: bool,
    pub is_staff: bool,
    pub is_superuser: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_account_has_superuser_privileges() {
        let principal = Principal::ServiceAccount;
        assert!(principal.is_superuser());
        assert!(principal.is_staff());
        assert!(principal.is_active());
        assert!(principal.is_authenticated());
        assert!(!principal.is_anonymous());
        assert!(principal.user_id().is_none());
        assert!(principal.has_perms(["forms.delete_submission", "user.change"]));
    }

    #[test]
    fn service_accounts_are_equal() {
        assert_eq!(Principal::ServiceAccount, Principal::ServiceAccount);
        assert_ne!(Principal::ServiceAccount, Principal::User(User::new("foo")));
    }

    #[test]
    fn regular_user_lacks_permissions() {
        let principal = Principal::from(User::new("foo"));
        assert!(!principal.is_service_account());
        assert!(!principal.is_superuser());
        assert!(!principal.has_perm("anything"));
        assert_eq!(principal.username(), "foo");
    }

    #[test]
    fn inactive_superuser_has_no_permissions() {
        let mut user = User::new("root").superuser();
        user.is_active = false;
        assert!(!Principal::User(user).has_perm("anything"));
    }

    #[test]
    fn summary_reflects_flags() {
        let summary = Principal::ServiceAccount.summary();
        assert_eq!(summary.username, SERVICE_ACCOUNT_USERNAME);
        assert!(summary.is_service_account);
        assert!(summary.user_id.is_none());
    }
}
