//! The single consumer behind `CredentialStore`.
//!
//! Every read and mutation of the active generation happens here, one command
//! at a time, in submission order. bcrypt work is pushed onto the worker pool
//! and awaited before the next command is taken, so ordering is unaffected.
//! The only work that outlives its command is the cost upgrade after a
//! successful authentication, which comes back through the queue as
//! `Command::Upgrade`.
//!
//! Edits made while a load is pending are applied to the active generation
//! and kept with the transaction. Commit re-applies them to the incoming
//! generation before the next command is taken, so a confirmed edit is never
//! invisible and never waits on a timer that `kill` could cancel.

use super::{
    StoreConfig,
    command::{Command, Mutation, Reply},
    provider::IoProvider,
};
use crate::{
    dataset::CredentialDataset,
    error::{Error, Result},
    hash,
    pool::WorkerPool,
};
use secrecy::{ExposeSecret, SecretString};
use std::{ops::ControlFlow, sync::Arc};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::{Duration, sleep},
};
use tracing::{debug, info, warn};

struct Transaction {
    id: u64,
    dataset: CredentialDataset,
    captured: Vec<Mutation>,
    timer: JoinHandle<()>,
}

pub(super) struct Sequencer {
    commands: mpsc::UnboundedReceiver<Command>,
    queue: mpsc::WeakUnboundedSender<Command>,
    provider: Arc<dyn IoProvider>,
    active: CredentialDataset,
    cost: u32,
    load_timeout: Duration,
    transaction: Option<Transaction>,
    last_txid: u64,
    pool: WorkerPool,
}

impl Sequencer {
    pub(super) fn new(
        commands: mpsc::UnboundedReceiver<Command>,
        queue: mpsc::WeakUnboundedSender<Command>,
        provider: Arc<dyn IoProvider>,
        config: StoreConfig,
    ) -> Self {
        Self {
            commands,
            queue,
            provider,
            active: CredentialDataset::new(),
            cost: config.initial_cost(),
            load_timeout: config.load_timeout(),
            transaction: None,
            last_txid: 0,
            pool: WorkerPool::new(config.hash_workers()),
        }
    }

    pub(super) async fn run(mut self) {
        let done = loop {
            let Some(command) = self.commands.recv().await else {
                break None;
            };
            if let ControlFlow::Break(done) = self.handle(command).await {
                break Some(done);
            }
        };
        self.commands.close();

        if let Some(transaction) = self.transaction.take() {
            transaction.timer.abort();
        }
        self.pool.shutdown().await;
        debug!("credential store stopped");

        if let Some(done) = done {
            let _ = done.send(());
        }
    }

    async fn handle(&mut self, command: Command) -> ControlFlow<oneshot::Sender<()>> {
        match command {
            Command::Authenticate {
                username,
                password,
                reply,
            } => self.authenticate(username, password, reply).await,
            Command::Add {
                username,
                password,
                reply,
            } => {
                let result = self.add(username, password).await;
                let _ = reply.send(result);
            }
            Command::Modify {
                username,
                password,
                reply,
            } => {
                let result = self.modify(username, password).await;
                let _ = reply.send(result);
            }
            Command::VerifyModify {
                username,
                old_password,
                new_password,
                reply,
            } => {
                let result = self
                    .verify_modify(username, old_password, new_password)
                    .await;
                let _ = reply.send(result);
            }
            Command::Delete { username, reply } => {
                let result = self.delete(username);
                let _ = reply.send(result);
            }
            Command::StartLoad => self.start_load(),
            Command::Load {
                username,
                password_hash,
                reply,
            } => {
                let result = self.load(username, password_hash);
                let _ = reply.send(result);
            }
            Command::Commit => self.commit().await,
            Command::Rollback { txid } => self.rollback(txid),
            Command::SetCost(cost) => self.set_cost(cost),
            Command::GetCost { reply } => {
                let _ = reply.send(self.cost);
            }
            Command::List { reply } => {
                let _ = reply.send(self.active.entries());
            }
            Command::Upgrade {
                username,
                previous,
                password_hash,
            } => self.upgrade(&username, &previous, password_hash),
            Command::Kill { done } => return ControlFlow::Break(done),
        }

        ControlFlow::Continue(())
    }

    async fn authenticate(&mut self, username: String, password: SecretString, reply: Reply<()>) {
        let Some(stored) = self.active.get(&username).map(str::to_owned) else {
            let _ = reply.send(Err(Error::UserNotFound));
            return;
        };

        if let Err(err) = self.verify(password.clone(), stored.clone()).await {
            let _ = reply.send(Err(err));
            return;
        }

        // The caller is answered before any upgrade work starts.
        let _ = reply.send(Ok(()));

        if self.active.cost_of(&username).is_some_and(|cost| cost < self.cost) {
            self.schedule_upgrade(username, password, stored).await;
        }
    }

    async fn add(&mut self, username: String, password: SecretString) -> Result<()> {
        if !self.provider.username_is_valid(&username) {
            return Err(Error::InvalidUsername);
        }
        if self.active.contains(&username) {
            return Err(Error::UserExists);
        }

        let password_hash = self.hash(password).await?;
        self.active.set(username.clone(), password_hash.clone());
        self.capture(Mutation::Add {
            username,
            password_hash,
        });
        Ok(())
    }

    async fn modify(&mut self, username: String, password: SecretString) -> Result<()> {
        if !self.active.contains(&username) {
            return Err(Error::UserNotFound);
        }

        let password_hash = self.hash(password).await?;
        self.active.set(username.clone(), password_hash.clone());
        self.capture(Mutation::Modify {
            username,
            password_hash,
        });
        Ok(())
    }

    async fn verify_modify(
        &mut self,
        username: String,
        old_password: SecretString,
        new_password: SecretString,
    ) -> Result<()> {
        let Some(stored) = self.active.get(&username).map(str::to_owned) else {
            return Err(Error::UserNotFound);
        };

        self.verify(old_password.clone(), stored).await?;

        let password_hash = self.hash(new_password).await?;
        self.active.set(username.clone(), password_hash.clone());
        self.capture(Mutation::VerifyModify {
            username,
            old_password,
            password_hash,
        });
        Ok(())
    }

    fn delete(&mut self, username: String) -> Result<()> {
        if self.active.delete(&username).is_none() {
            return Err(Error::UserNotFound);
        }
        self.capture(Mutation::Delete { username });
        Ok(())
    }

    fn start_load(&mut self) {
        // A superseded transaction hands its captured edits to the new one,
        // since the new one is what will replace the generation they live in.
        let captured = match self.transaction.take() {
            Some(previous) => {
                previous.timer.abort();
                debug!(txid = previous.id, "load transaction superseded");
                previous.captured
            }
            None => Vec::new(),
        };

        self.last_txid += 1;
        let id = self.last_txid;

        let queue = self.queue.clone();
        let timeout = self.load_timeout;
        let timer = tokio::spawn(async move {
            sleep(timeout).await;
            if let Some(queue) = queue.upgrade() {
                let _ = queue.send(Command::Rollback { txid: Some(id) });
            }
        });

        self.transaction = Some(Transaction {
            id,
            dataset: CredentialDataset::new(),
            captured,
            timer,
        });
        debug!(txid = id, "load transaction started");
    }

    fn load(&mut self, username: String, password_hash: String) -> Result<()> {
        if self.transaction.is_none() {
            return Err(Error::NoActiveTransaction);
        }
        if !self.provider.username_is_valid(&username) {
            return Err(Error::InvalidUsername);
        }
        hash::hash_cost(&password_hash)?;

        if let Some(transaction) = self.transaction.as_mut() {
            transaction.dataset.set(username, password_hash);
        }
        Ok(())
    }

    async fn commit(&mut self) {
        let Some(transaction) = self.transaction.take() else {
            debug!("commit without a load transaction ignored");
            return;
        };
        transaction.timer.abort();

        self.active = transaction.dataset;
        let captured = transaction.captured.len();
        let mut replayed = 0;
        for mutation in transaction.captured {
            if self.replay(mutation).await {
                replayed += 1;
            }
        }

        info!(
            txid = transaction.id,
            entries = self.active.len(),
            captured,
            replayed,
            "load transaction committed"
        );
    }

    fn rollback(&mut self, txid: Option<u64>) {
        let matches = self
            .transaction
            .as_ref()
            .is_some_and(|transaction| txid.is_none_or(|id| id == transaction.id));

        if !matches {
            debug!(?txid, "stale rollback ignored");
            return;
        }

        if let Some(transaction) = self.transaction.take() {
            transaction.timer.abort();
            if txid.is_some() {
                warn!(txid = transaction.id, "load transaction timed out, rolled back");
            } else {
                debug!(txid = transaction.id, "load transaction rolled back");
            }
        }
    }

    fn set_cost(&mut self, cost: u32) {
        if hash::is_valid_cost(cost) {
            self.cost = cost;
        } else {
            warn!(cost, "ignoring out of range bcrypt cost");
        }
    }

    fn upgrade(&mut self, username: &str, previous: &str, password_hash: String) {
        if self.active.get(username) == Some(previous) {
            self.active.set(username, password_hash);
            debug!(username, cost = self.cost, "password hash upgraded");
        } else {
            debug!(username, "entry changed since upgrade was scheduled, discarded");
        }
    }

    /// Re-apply an edit to the freshly committed generation. Returns `false`
    /// when it conflicts with what was loaded.
    async fn replay(&mut self, mutation: Mutation) -> bool {
        let username = mutation.username().to_string();

        let applied = match &mutation {
            Mutation::Add { password_hash, .. } => {
                if self.active.contains(&username) {
                    false
                } else {
                    self.active.set(username.clone(), password_hash.clone());
                    true
                }
            }
            Mutation::Modify { password_hash, .. } => {
                if self.active.contains(&username) {
                    self.active.set(username.clone(), password_hash.clone());
                    true
                } else {
                    false
                }
            }
            Mutation::VerifyModify {
                old_password,
                password_hash,
                ..
            } => match self.active.get(&username).map(str::to_owned) {
                Some(stored) => {
                    if self.verify(old_password.clone(), stored).await.is_ok() {
                        self.active.set(username.clone(), password_hash.clone());
                        true
                    } else {
                        false
                    }
                }
                None => false,
            },
            Mutation::Delete { .. } => self.active.delete(&username).is_some(),
        };

        if applied {
            debug!(username = %username, "replayed edit made during load");
        } else {
            warn!(username = %username, "replayed edit conflicts with reloaded data, dropped");
        }
        applied
    }

    /// Remember an edit if a load is pending, so it survives the commit.
    fn capture(&mut self, mutation: Mutation) {
        if let Some(transaction) = self.transaction.as_mut() {
            transaction.captured.push(mutation);
        }
    }

    async fn hash(&self, password: SecretString) -> Result<String> {
        let cost = self.cost;
        self.offload(move || hash::hash_password(password.expose_secret(), cost))
            .await
    }

    /// Resolve to `Ok(())` only if `password` matches `stored`. A stored value
    /// that is not a bcrypt hash counts as a mismatch.
    async fn verify(&self, password: SecretString, stored: String) -> Result<()> {
        let matched = self
            .offload(move || match hash::verify_password(password.expose_secret(), &stored) {
                Ok(matched) => Ok(matched),
                Err(Error::InvalidHash) => Ok(false),
                Err(err) => Err(err),
            })
            .await?;

        if matched {
            Ok(())
        } else {
            Err(Error::AuthenticationFailed)
        }
    }

    async fn schedule_upgrade(&self, username: String, password: SecretString, previous: String) {
        let cost = self.cost;
        let queue = self.queue.clone();

        let dispatched = self
            .pool
            .dispatch(move || {
                let password_hash = hash::hash_password(password.expose_secret(), cost)?;
                if let Some(queue) = queue.upgrade() {
                    let _ = queue.send(Command::Upgrade {
                        username,
                        previous,
                        password_hash,
                    });
                }
                Ok(())
            })
            .await;

        if !dispatched {
            warn!("worker pool unavailable, cost upgrade skipped");
        }
    }

    async fn offload<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        let dispatched = self
            .pool
            .dispatch(move || {
                let _ = tx.send(work());
                Ok(())
            })
            .await;

        if !dispatched {
            return Err(Error::Hashing("worker pool is shut down".to_string()));
        }

        rx.await
            .map_err(|_| Error::Hashing("hashing job aborted".to_string()))?
    }
}
