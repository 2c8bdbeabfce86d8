//! One generation of credentials.
//!
//! A dataset is only ever touched from inside the store's sequencer, so it
//! carries no synchronization of its own. Generations are swapped wholesale on
//! commit; nothing patches a pending generation into the active one.

use crate::hash;
use serde::Serialize;
use std::collections::HashMap;

/// A single username/password-hash pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Entry {
    pub username: String,
    pub password_hash: String,
}

#[derive(Clone, Debug, Default)]
pub struct CredentialDataset {
    entries: HashMap<String, String>,
}

impl CredentialDataset {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, username: &str) -> Option<&str> {
        self.entries.get(username).map(String::as_str)
    }

    #[must_use]
    pub fn contains(&self, username: &str) -> bool {
        self.entries.contains_key(username)
    }

    /// Insert or overwrite an entry, returning the previous hash.
    pub fn set(
        &mut self,
        username: impl Into<String>,
        password_hash: impl Into<String>,
    ) -> Option<String> {
        self.entries.insert(username.into(), password_hash.into())
    }

    pub fn delete(&mut self, username: &str) -> Option<String> {
        self.entries.remove(username)
    }

    /// Cost factor of the stored hash for `username`, if the user exists and
    /// the hash decodes.
    #[must_use]
    pub fn cost_of(&self, username: &str) -> Option<u32> {
        self.get(username).and_then(|h| hash::hash_cost(h).ok())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of every entry, in no particular order.
    #[must_use]
    pub fn entries(&self) -> Vec<Entry> {
        self.entries
            .iter()
            .map(|(username, password_hash)| Entry {
                username: username.clone(),
                password_hash: password_hash.clone(),
            })
            .collect()
    }
}
