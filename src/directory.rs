// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User directory lookups.
//!
//! The directory is an external collaborator; this module only defines the
//! lookup contract and an in-memory implementation used by the binary and
//! tests.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::principal::User;

/// Directory errors.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("user directory is unavailable: {0}")]
    Unavailable(String),
}

/// Lookup of real users by username.
#[async_trait]
pub trait UserDirectory: Send + Sync + 'static {
    /// Find a user by exact username.
    ///
    /// Returns `Ok(None)` when no such user exists.
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, DirectoryError>;
}

/// Username-keyed in-memory directory.
#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<String, User>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a directory from an initial set of users.
    pub fn with_users(users: impl IntoIterator<Item = User>) -> Self {
        Self {
            users: RwLock::new(
                users
                    .into_iter()
                    .map(|user| (user.username.clone(), user))
                    .collect(),
            ),
        }
    }

    /// Insert or replace a user.
    pub async fn insert(&self, user: User) {
        self.users.write().await.insert(user.username.clone(), user);
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, DirectoryError> {
        Ok(self.users.read().await.get(username).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn finds_inserted_users() {
        let directory = InMemoryUserDirectory::with_users([User::new("foo")]);
        directory.insert(User::new("bar")).await;

        assert_eq!(directory.len().await, 2);
        let foo = directory.find_by_username("foo").await.unwrap().unwrap();
        assert_eq!(foo.username, "foo");
        assert!(directory.find_by_username("FOO").await.unwrap().is_none());
    }
}
