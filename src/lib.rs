//! # credstore
//!
//! An embedded username/password store for HTTP Basic authentication, kept
//! in a flat file of bcrypt hashes.
//!
//! All reads and mutations go through one sequencer task
//! ([`CredentialStore`]), so the store needs no locks of its own. The
//! [`FileBackend`] reloads the whole file as a single load transaction when
//! it changes on disk; authentication keeps seeing the previous generation
//! until the reload commits, and a reload that stalls is rolled back after
//! the load timeout.
//!
//! Hashes weaker than the current target cost are upgraded transparently the
//! next time their owner authenticates.
//!
//! ```no_run
//! use credstore::{CredentialStore, FileBackend, FileBackendConfig, StoreConfig};
//! use std::sync::Arc;
//!
//! # async fn demo() -> credstore::Result<()> {
//! let backend = FileBackend::open("/etc/credstore/passwd", FileBackendConfig::new()).await?;
//! let store = CredentialStore::spawn(Arc::new(backend), StoreConfig::new());
//! store.update().await;
//!
//! store.authenticate("alice", "secret").await?;
//! store.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod authz;
pub mod backend;
pub mod cli;
pub mod dataset;
pub mod error;
pub mod hash;
pub mod pool;
pub mod replay;
pub mod store;

pub use self::{
    backend::{FileBackend, FileBackendConfig},
    dataset::{CredentialDataset, Entry},
    error::{Error, Result},
    store::{CredentialStore, IoProvider, NullProvider, StoreConfig},
};

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
