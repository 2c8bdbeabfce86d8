//! The credential store.
//!
//! `CredentialStore` is a cheap, cloneable handle to a single sequencer task
//! that owns the active generation of credentials. Every call becomes a message
//! on one ordered queue; value-returning calls wait on a private reply channel,
//! while `start_load`, `commit`, `rollback` and `set_cost` return as soon as
//! the message is queued.
//!
//! ## Reload transactions
//!
//! A bulk reload runs `start_load`, then one `load` per entry, then `commit`.
//! Until `commit` is processed, authentication and listing see the previous
//! generation. A transaction that is neither committed nor superseded within
//! the configured load timeout is rolled back automatically.
//!
//! Edits (`add`, `modify`, `verify_modify`, `delete`) made while a load is
//! pending take effect immediately on the current generation and are also
//! kept with the transaction. If it commits, they are re-applied to the new
//! generation as part of the commit, and an edit that conflicts with the
//! loaded data is dropped. If it rolls back, nothing is re-applied, because
//! the generation they were applied to stays authoritative.

mod command;
mod provider;
mod sequencer;

pub use self::provider::{IoProvider, NullProvider, valid_username};

use self::{command::Command, sequencer::Sequencer};
use crate::{
    dataset::Entry,
    error::{Error, Result},
    hash,
};
use secrecy::SecretString;
use std::{
    fmt,
    num::NonZeroUsize,
    sync::{Arc, Weak},
    thread,
};
use tokio::{
    sync::{mpsc, oneshot},
    time::Duration,
};

#[derive(Clone, Copy, Debug)]
pub struct StoreConfig {
    load_timeout: Duration,
    hash_workers: usize,
    initial_cost: u32,
}

impl StoreConfig {
    /// Default config: 1s load timeout, one hashing worker per available core
    /// and bcrypt's default cost.
    #[must_use]
    pub fn new() -> Self {
        Self {
            load_timeout: Duration::from_secs(1),
            hash_workers: thread::available_parallelism().map_or(1, NonZeroUsize::get),
            initial_cost: hash::DEFAULT_COST,
        }
    }

    #[must_use]
    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_hash_workers(mut self, workers: usize) -> Self {
        self.hash_workers = workers;
        self
    }

    #[must_use]
    pub fn with_initial_cost(mut self, cost: u32) -> Self {
        self.initial_cost = cost;
        self
    }

    #[must_use]
    pub fn normalize(self) -> Self {
        let load_timeout = if self.load_timeout.is_zero() {
            Duration::from_secs(1)
        } else {
            self.load_timeout
        };
        let initial_cost = if hash::is_valid_cost(self.initial_cost) {
            self.initial_cost
        } else {
            hash::DEFAULT_COST
        };
        Self {
            load_timeout,
            hash_workers: self.hash_workers.max(1),
            initial_cost,
        }
    }

    #[must_use]
    pub fn load_timeout(&self) -> Duration {
        self.load_timeout
    }

    #[must_use]
    pub fn hash_workers(&self) -> usize {
        self.hash_workers
    }

    #[must_use]
    pub fn initial_cost(&self) -> u32 {
        self.initial_cost
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct CredentialStore {
    queue: mpsc::UnboundedSender<Command>,
    provider: Arc<dyn IoProvider>,
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("closed", &self.queue.is_closed())
            .finish_non_exhaustive()
    }
}

impl CredentialStore {
    /// Start the sequencer on the current tokio runtime. The store begins
    /// empty; call `update` to load from the provider.
    #[must_use]
    pub fn spawn(provider: Arc<dyn IoProvider>, config: StoreConfig) -> Self {
        let config = config.normalize();
        let (queue, commands) = mpsc::unbounded_channel();

        let sequencer = Sequencer::new(
            commands,
            queue.downgrade(),
            Arc::clone(&provider),
            config,
        );
        tokio::spawn(sequencer.run());

        Self { queue, provider }
    }

    /// A store with no backing storage.
    #[must_use]
    pub fn in_memory(config: StoreConfig) -> Self {
        Self::spawn(Arc::new(NullProvider), config)
    }

    fn send(&self, command: Command) {
        // Fire-and-forget; a closed store simply drops it.
        let _ = self.queue.send(command);
    }

    async fn call<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.queue
            .send(command(reply))
            .map_err(|_| Error::Closed)?;
        response.await.map_err(|_| Error::Closed)
    }

    /// Check a username/password pair. On success, an entry hashed below the
    /// current target cost is rehashed in the background.
    ///
    /// # Errors
    /// `UserNotFound`, `AuthenticationFailed`, or `Closed`.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<()> {
        self.call(|reply| Command::Authenticate {
            username: username.to_string(),
            password: SecretString::from(password.to_string()),
            reply,
        })
        .await?
    }

    /// Add a user, hashing `password` at the current target cost.
    ///
    /// # Errors
    /// `InvalidUsername`, `UserExists`, `Hashing`, or `Closed`.
    pub async fn add(&self, username: &str, password: &str) -> Result<()> {
        self.call(|reply| Command::Add {
            username: username.to_string(),
            password: SecretString::from(password.to_string()),
            reply,
        })
        .await?
    }

    /// Replace a user's password.
    ///
    /// # Errors
    /// `UserNotFound`, `Hashing`, or `Closed`.
    pub async fn modify(&self, username: &str, password: &str) -> Result<()> {
        self.call(|reply| Command::Modify {
            username: username.to_string(),
            password: SecretString::from(password.to_string()),
            reply,
        })
        .await?
    }

    /// Replace a user's password after checking the old one.
    ///
    /// # Errors
    /// `UserNotFound`, `AuthenticationFailed`, `Hashing`, or `Closed`.
    pub async fn verify_modify(
        &self,
        username: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<()> {
        self.call(|reply| Command::VerifyModify {
            username: username.to_string(),
            old_password: SecretString::from(old_password.to_string()),
            new_password: SecretString::from(new_password.to_string()),
            reply,
        })
        .await?
    }

    /// # Errors
    /// `UserNotFound` or `Closed`.
    pub async fn delete(&self, username: &str) -> Result<()> {
        self.call(|reply| Command::Delete {
            username: username.to_string(),
            reply,
        })
        .await?
    }

    /// Begin a load transaction, silently discarding any pending one.
    pub fn start_load(&self) {
        self.send(Command::StartLoad);
    }

    /// Stage an entry in the pending load transaction.
    ///
    /// # Errors
    /// `NoActiveTransaction`, `InvalidUsername`, `InvalidHash`, or `Closed`.
    pub async fn load(&self, username: &str, password_hash: &str) -> Result<()> {
        self.call(|reply| Command::Load {
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            reply,
        })
        .await?
    }

    /// Make the pending load the active generation. No-op without one.
    pub fn commit(&self) {
        self.send(Command::Commit);
    }

    /// Discard the pending load, if any.
    pub fn rollback(&self) {
        self.send(Command::Rollback { txid: None });
    }

    /// Set the bcrypt cost used for every hash generated from now on.
    pub fn set_cost(&self, cost: u32) {
        self.send(Command::SetCost(cost));
    }

    /// # Errors
    /// `Closed` if the store has been killed.
    pub async fn get_cost(&self) -> Result<u32> {
        self.call(|reply| Command::GetCost { reply }).await
    }

    /// Snapshot of the active generation, unordered.
    ///
    /// # Errors
    /// `Closed` if the store has been killed.
    pub async fn list(&self) -> Result<Vec<Entry>> {
        self.call(|reply| Command::List { reply }).await
    }

    /// Ask the provider to reload. Returns once the provider has queued its
    /// whole load transaction.
    pub async fn update(&self) {
        let _ = self.provider.request_read(self.clone()).await;
    }

    /// Ask the provider to persist the active generation.
    pub async fn sync(&self) {
        let _ = self.provider.request_write(self.clone()).await;
    }

    /// Persist, then stop the sequencer.
    pub async fn shutdown(&self) {
        self.sync().await;
        self.kill().await;
    }

    /// Stop the sequencer without persisting. Calls made afterwards fail with
    /// `Closed`.
    pub async fn kill(&self) {
        let (done, stopped) = oneshot::channel();
        if self.queue.send(Command::Kill { done }).is_ok() {
            let _ = stopped.await;
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    /// A handle that does not keep the sequencer running.
    #[must_use]
    pub fn downgrade(&self) -> WeakCredentialStore {
        WeakCredentialStore {
            queue: self.queue.downgrade(),
            provider: Arc::downgrade(&self.provider),
        }
    }
}

/// Non-owning counterpart of [`CredentialStore`], for holders such as a
/// provider that the store itself keeps alive.
#[derive(Clone, Debug)]
pub struct WeakCredentialStore {
    queue: mpsc::WeakUnboundedSender<Command>,
    provider: Weak<dyn IoProvider>,
}

impl WeakCredentialStore {
    /// `None` once every `CredentialStore` handle has been dropped.
    #[must_use]
    pub fn upgrade(&self) -> Option<CredentialStore> {
        Some(CredentialStore {
            queue: self.queue.upgrade()?,
            provider: self.provider.upgrade()?,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = StoreConfig::new();
        assert_eq!(config.load_timeout(), Duration::from_secs(1));
        assert!(config.hash_workers() >= 1);
        assert_eq!(config.initial_cost(), hash::DEFAULT_COST);
    }

    #[test]
    fn config_normalize() {
        let config = StoreConfig::new()
            .with_load_timeout(Duration::ZERO)
            .with_hash_workers(0)
            .with_initial_cost(99)
            .normalize();
        assert_eq!(config.load_timeout(), Duration::from_secs(1));
        assert_eq!(config.hash_workers(), 1);
        assert_eq!(config.initial_cost(), hash::DEFAULT_COST);
    }

    #[tokio::test]
    async fn kill_closes_the_store() {
        let store =
            CredentialStore::in_memory(StoreConfig::new().with_initial_cost(hash::MIN_COST));
        store.kill().await;

        assert!(matches!(store.list().await, Err(Error::Closed)));
        assert!(matches!(
            store.authenticate("alice", "pw").await,
            Err(Error::Closed)
        ));
        assert!(store.is_closed());

        // a second kill is harmless
        store.kill().await;
    }

    #[tokio::test]
    async fn weak_handle_does_not_keep_the_store() {
        let store =
            CredentialStore::in_memory(StoreConfig::new().with_initial_cost(hash::MIN_COST));
        let weak = store.downgrade();

        let upgraded = weak.upgrade().unwrap();
        upgraded.add("alice", "pw").await.unwrap();
        drop(upgraded);
        assert_eq!(store.list().await.unwrap().len(), 1);

        drop(store);
        assert!(weak.upgrade().is_none());
    }

    #[tokio::test]
    async fn stale_rollback_is_ignored() {
        let store =
            CredentialStore::in_memory(StoreConfig::new().with_initial_cost(hash::MIN_COST));
        let h = hash::hash_password("pw", hash::MIN_COST).unwrap();

        store.start_load();
        store.send(Command::Rollback { txid: Some(42) });
        store.load("alice", &h).await.unwrap();

        store.send(Command::Rollback { txid: Some(1) });
        assert!(matches!(
            store.load("bob", &h).await,
            Err(Error::NoActiveTransaction)
        ));
        store.kill().await;
    }
}
