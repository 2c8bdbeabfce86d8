use crate::{
    backend::{FileBackend, FileBackendConfig},
    store::{CredentialStore, StoreConfig},
};
use anyhow::{Context, Result, bail};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing::debug;

/// Options shared by every subcommand.
#[derive(Clone, Debug)]
pub struct GlobalArgs {
    pub file: PathBuf,
    pub poll_interval: Duration,
    pub load_timeout: Duration,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(file: PathBuf) -> Self {
        Self {
            file,
            poll_interval: Duration::from_secs(5),
            load_timeout: Duration::from_secs(1),
        }
    }

    #[must_use]
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::new().with_load_timeout(self.load_timeout)
    }

    /// Open the credential file and load it into a fresh store.
    ///
    /// One-shot commands pass `watch = false`: they never poll and only
    /// write the file when they are done.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or read.
    pub async fn open_store(&self, watch: bool) -> Result<Session> {
        let config = FileBackendConfig::new()
            .with_poll_interval(if watch {
                self.poll_interval
            } else {
                Duration::ZERO
            })
            .read_only(watch);

        let backend = FileBackend::open(&self.file, config)
            .await
            .with_context(|| format!("failed to open {}", self.file.display()))?;

        let store = CredentialStore::spawn(Arc::new(backend.clone()), self.store_config());
        store.update().await;

        if !backend.is_open().await {
            store.kill().await;
            bail!("failed to read {}", self.file.display());
        }
        debug!(file = %self.file.display(), "credential store loaded");

        Ok(Session { store, backend })
    }
}

/// A store loaded from the credential file, plus the backend behind it.
#[derive(Debug)]
pub struct Session {
    pub store: CredentialStore,
    pub backend: FileBackend,
}

impl Session {
    /// Write the active generation back and stop the store.
    ///
    /// # Errors
    /// Returns an error if the backend gave up on the file, in which case
    /// nothing was written.
    pub async fn persist(self) -> Result<()> {
        self.store.sync().await;
        let written = self.backend.is_open().await;
        self.store.kill().await;

        if !written {
            bail!("failed to write {}", self.backend.path().display());
        }
        Ok(())
    }

    /// Stop the store without touching the file.
    pub async fn discard(self) {
        self.store.kill().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_global_args() {
        let args = GlobalArgs::new(PathBuf::from("/tmp/passwd"));
        assert_eq!(args.file, PathBuf::from("/tmp/passwd"));
        assert_eq!(args.poll_interval, Duration::from_secs(5));
        assert_eq!(args.store_config().load_timeout(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_open_store_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let args = GlobalArgs::new(dir.path().join("passwd"));

        let session = args.open_store(false).await.unwrap();
        assert!(session.store.list().await.unwrap().is_empty());
        session.discard().await;
        assert!(args.file.exists());
    }

    #[tokio::test]
    async fn test_persist_fails_when_backend_is_gone() {
        let dir = tempfile::tempdir().unwrap();
        let args = GlobalArgs::new(dir.path().join("passwd"));
        tokio::fs::write(&args.file, "$4\n").await.unwrap();

        let session = args.open_store(false).await.unwrap();
        session.store.add("alice", "secret").await.unwrap();
        session.backend.close().await;

        let err = session.persist().await.unwrap_err();
        assert!(err.to_string().contains("failed to write"), "{err}");
        assert_eq!(tokio::fs::read_to_string(&args.file).await.unwrap(), "$4\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreadable_file_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let args = GlobalArgs::new(dir.path().to_path_buf());

        // a directory opens read-only but cannot be read
        let err = args.open_store(true).await.unwrap_err();
        assert!(err.to_string().contains("failed to read"), "{err}");
    }

    #[tokio::test]
    async fn test_watch_requires_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let args = GlobalArgs::new(dir.path().join("passwd"));

        assert!(args.open_store(true).await.is_err());
    }
}
