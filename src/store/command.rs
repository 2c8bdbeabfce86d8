use crate::{dataset::Entry, error::Result};
use secrecy::SecretString;
use tokio::sync::oneshot;

pub(crate) type Reply<T> = oneshot::Sender<Result<T>>;

/// Messages processed, in order, by the sequencer.
pub(crate) enum Command {
    Authenticate {
        username: String,
        password: SecretString,
        reply: Reply<()>,
    },
    Add {
        username: String,
        password: SecretString,
        reply: Reply<()>,
    },
    Modify {
        username: String,
        password: SecretString,
        reply: Reply<()>,
    },
    VerifyModify {
        username: String,
        old_password: SecretString,
        new_password: SecretString,
        reply: Reply<()>,
    },
    Delete {
        username: String,
        reply: Reply<()>,
    },
    StartLoad,
    Load {
        username: String,
        password_hash: String,
        reply: Reply<()>,
    },
    Commit,
    /// `None` comes from callers and always matches; the auto-rollback timer
    /// carries the id of the transaction it was armed for.
    Rollback {
        txid: Option<u64>,
    },
    SetCost(u32),
    GetCost {
        reply: oneshot::Sender<u32>,
    },
    List {
        reply: oneshot::Sender<Vec<Entry>>,
    },
    /// Result of a background cost upgrade; applied only if the entry still
    /// holds `previous`.
    Upgrade {
        username: String,
        previous: String,
        password_hash: String,
    },
    Kill {
        done: oneshot::Sender<()>,
    },
}

/// The data of an edit made while a load was pending, kept for re-application
/// to the generation that wins. No reply channel travels with it.
#[derive(Debug)]
pub(crate) enum Mutation {
    Add {
        username: String,
        password_hash: String,
    },
    Modify {
        username: String,
        password_hash: String,
    },
    VerifyModify {
        username: String,
        old_password: SecretString,
        password_hash: String,
    },
    Delete {
        username: String,
    },
}

impl Mutation {
    pub(crate) fn username(&self) -> &str {
        match self {
            Self::Add { username, .. }
            | Self::Modify { username, .. }
            | Self::VerifyModify { username, .. }
            | Self::Delete { username } => username,
        }
    }
}
