//! Storage seam between the store and whatever persists it.

use super::CredentialStore;
use regex::Regex;
use std::sync::LazyLock;
use tokio::task::JoinHandle;

static USERNAME: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[^#$:\s](?:[^:\r\n]*[^:\s])?$").ok());

/// Reads and writes the store's backing data.
///
/// The store asks for a read on `update` and for a write on `sync`. The
/// provider then drives the store through its public API: a read streams
/// `start_load`, `set_cost`, `load` and `commit`; a write pulls `get_cost` and
/// `list`. The returned handle resolves once the provider has issued all of
/// its calls.
pub trait IoProvider: Send + Sync + 'static {
    fn request_read(&self, store: CredentialStore) -> JoinHandle<()>;

    fn request_write(&self, store: CredentialStore) -> JoinHandle<()>;

    /// Whether `username` can be stored without corrupting the backing format.
    fn username_is_valid(&self, username: &str) -> bool {
        valid_username(username)
    }
}

/// A username may not start with `#` or `$`, may not contain `:` or line
/// breaks, and may not have leading or trailing whitespace.
#[must_use]
pub fn valid_username(username: &str) -> bool {
    USERNAME.as_ref().is_some_and(|re| re.is_match(username))
}

/// Provider for a purely in-memory store: nothing to read, nowhere to write.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullProvider;

impl IoProvider for NullProvider {
    fn request_read(&self, _store: CredentialStore) -> JoinHandle<()> {
        tokio::spawn(async {})
    }

    fn request_write(&self, _store: CredentialStore) -> JoinHandle<()> {
        tokio::spawn(async {})
    }
}
