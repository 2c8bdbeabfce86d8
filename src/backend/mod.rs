//! Flat-file backend.
//!
//! `FileBackend` owns one handle on the credential file and serializes every
//! read and write against it behind a single lock. Reads stream the file into
//! the store as a load transaction; writes dump the active generation back
//! out. With a positive poll interval, a background loop compares the file's
//! change stamp on every tick and asks the store to reload when it moves. Our
//! own reads and writes record the stamp they leave behind, so they never
//! trigger a reload of their own. Callers that learn about changes some other
//! way (a signal, a filesystem watcher) report them with `notify_changed`;
//! a burst of notices within the notice delay becomes one reload.
//!
//! Errors after the file has been opened have no caller waiting on them: they
//! are logged, the handle is dropped, and the poll loop stops.

pub mod format;
pub mod stamp;

use self::{
    format::Line,
    stamp::ChangeStamp,
};
use crate::{
    error::{Error, Result},
    replay::ReplayBuffer,
    store::{CredentialStore, IoProvider, WeakCredentialStore},
};
use std::{
    io::SeekFrom,
    path::{Path, PathBuf},
    sync::{Arc, Weak},
};
use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncBufReadExt, AsyncSeekExt, AsyncWriteExt, BufReader},
    sync::Mutex,
    task::JoinHandle,
    time::{Duration, MissedTickBehavior, interval},
};
use tracing::{debug, error, info, instrument, warn};

#[derive(Clone, Copy, Debug)]
pub struct FileBackendConfig {
    permissions: u32,
    poll_interval: Duration,
    notice_delay: Duration,
    read_only: bool,
}

impl FileBackendConfig {
    /// Default config: mode 0600 for a newly created file, poll every 5s,
    /// settle change notices for 1s, read-write.
    #[must_use]
    pub fn new() -> Self {
        Self {
            permissions: 0o600,
            poll_interval: Duration::from_secs(5),
            notice_delay: Duration::from_secs(1),
            read_only: false,
        }
    }

    #[must_use]
    pub fn with_permissions(mut self, mode: u32) -> Self {
        self.permissions = mode;
        self
    }

    /// A zero interval disables change polling.
    #[must_use]
    pub fn with_poll_interval(mut self, every: Duration) -> Self {
        self.poll_interval = every;
        self
    }

    #[must_use]
    pub fn with_notice_delay(mut self, delay: Duration) -> Self {
        self.notice_delay = delay;
        self
    }

    /// Open without write access; `sync` requests become no-ops.
    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    #[must_use]
    pub fn permissions(&self) -> u32 {
        self.permissions
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    #[must_use]
    pub fn notice_delay(&self) -> Duration {
        self.notice_delay
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }
}

impl Default for FileBackendConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug)]
pub struct FileBackend {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    path: PathBuf,
    config: FileBackendConfig,
    state: Mutex<State>,
    notices: ReplayBuffer<()>,
}

#[derive(Debug, Default)]
struct State {
    file: Option<File>,
    store: Option<WeakCredentialStore>,
    last_stamp: Option<ChangeStamp>,
}

impl FileBackend {
    /// Open (creating if allowed) the credential file and start the poll loop.
    ///
    /// # Errors
    /// Returns `Error::Io` if the file cannot be opened.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub async fn open(path: impl AsRef<Path>, config: FileBackendConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = open_file(&path, &config).await?;

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| Inner {
            path,
            config,
            state: Mutex::new(State {
                file: Some(file),
                ..State::default()
            }),
            notices: ReplayBuffer::spawn(config.notice_delay(), {
                let inner = weak.clone();
                move |batch: Vec<()>| {
                    if let Some(inner) = inner.upgrade() {
                        debug!(notices = batch.len(), "change notices settled");
                        tokio::spawn(async move { inner.reload().await });
                    }
                }
            }),
        });

        if !config.poll_interval().is_zero() {
            tokio::spawn(poll(Arc::downgrade(&inner), config.poll_interval()));
        }

        Ok(Self { inner })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Release the file handle. Polling stops at its next tick and later
    /// requests are ignored.
    pub async fn close(&self) {
        let mut state = self.inner.state.lock().await;
        if state.file.take().is_some() {
            debug!(path = %self.inner.path.display(), "credential file closed");
        }
    }

    /// `false` once the backend was closed or disabled by an I/O failure.
    #[must_use]
    pub async fn is_open(&self) -> bool {
        self.inner.state.lock().await.file.is_some()
    }

    /// Report a change noticed outside the poll loop. The store reloads once
    /// the notices stop arriving for the configured notice delay.
    pub fn notify_changed(&self) {
        self.inner.notices.push(());
    }
}

impl IoProvider for FileBackend {
    fn request_read(&self, store: CredentialStore) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.read_file(store).await })
    }

    fn request_write(&self, store: CredentialStore) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.write_file(store).await })
    }
}

impl Inner {
    async fn read_file(&self, store: CredentialStore) {
        let mut state = self.state.lock().await;
        if state.store.is_none() {
            state.store = Some(store.downgrade());
        }
        if state.file.is_none() {
            warn!(path = %self.path.display(), "read requested on a closed credential file");
            return;
        }

        match self.read_locked(&mut state, &store).await {
            Ok(loaded) => {
                info!(path = %self.path.display(), entries = loaded, "credential file loaded");
            }
            Err(Error::Closed) => {
                debug!(path = %self.path.display(), "store closed during read");
            }
            Err(err) => {
                store.rollback();
                self.disable(&mut state, "read", &err);
            }
        }
    }

    async fn read_locked(&self, state: &mut State, store: &CredentialStore) -> Result<usize> {
        self.reopen_if_replaced(state).await?;
        // Preempt the poll loop: this read already covers the current contents.
        state.last_stamp = Some(self.path_stamp().await?);

        let file = state.file.as_mut().ok_or(Error::Closed)?;
        file.seek(SeekFrom::Start(0)).await?;
        let mut reader = BufReader::new(file);
        let mut line = Vec::new();

        store.start_load();
        let mut loaded = 0;
        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line).await? == 0 {
                break;
            }
            match format::parse_bytes(&line) {
                Some(Line::Cost(cost)) => store.set_cost(cost),
                Some(Line::Entry {
                    username,
                    password_hash,
                }) => match store.load(username, password_hash).await {
                    Ok(()) => loaded += 1,
                    Err(Error::Closed) => return Err(Error::Closed),
                    Err(err) => debug!(username, "skipping credential line: {err}"),
                },
                None => {}
            }
        }
        store.commit();

        Ok(loaded)
    }

    async fn write_file(&self, store: CredentialStore) {
        let mut state = self.state.lock().await;
        if state.store.is_none() {
            state.store = Some(store.downgrade());
        }
        if state.file.is_none() {
            warn!(path = %self.path.display(), "write requested on a closed credential file");
            return;
        }
        if self.config.is_read_only() {
            debug!(path = %self.path.display(), "read-only credential file, write skipped");
            return;
        }

        match self.write_locked(&mut state, &store).await {
            Ok(written) => {
                info!(path = %self.path.display(), entries = written, "credential file written");
            }
            Err(Error::Closed) => {
                debug!(path = %self.path.display(), "store closed during write");
            }
            Err(err) => self.disable(&mut state, "write", &err),
        }
    }

    async fn write_locked(&self, state: &mut State, store: &CredentialStore) -> Result<usize> {
        self.reopen_if_replaced(state).await?;

        let cost = store.get_cost().await?;
        let entries = store.list().await?;
        let contents = format::render(cost, &entries);

        let file = state.file.as_mut().ok_or(Error::Closed)?;
        file.set_len(0).await?;
        file.seek(SeekFrom::Start(0)).await?;
        file.write_all(contents.as_bytes()).await?;
        file.flush().await?;
        file.sync_all().await?;

        // Preempt the poll loop: don't reload what we just wrote.
        state.last_stamp = Some(self.path_stamp().await?);

        Ok(entries.len())
    }

    /// Returns `false` once the backend is unusable and polling should stop.
    async fn check_for_change(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.file.is_none() {
            return false;
        }
        let store = match state.store.as_ref().map(WeakCredentialStore::upgrade) {
            // nobody to notify until the first read or write
            None => return true,
            Some(Some(store)) if !store.is_closed() => store,
            Some(_) => return false,
        };

        let stamp = match self.path_stamp().await {
            Ok(stamp) => stamp,
            Err(err) => {
                self.disable(&mut state, "stat", &err);
                return false;
            }
        };

        if state.last_stamp != Some(stamp) {
            state.last_stamp = Some(stamp);
            info!(path = %self.path.display(), "credential file changed, reloading");
            tokio::spawn(async move { store.update().await });
        }
        true
    }

    async fn reload(&self) {
        let store = {
            let state = self.state.lock().await;
            state.store.as_ref().and_then(WeakCredentialStore::upgrade)
        };
        match store {
            Some(store) if !store.is_closed() => {
                info!(path = %self.path.display(), "credential file change reported, reloading");
                store.update().await;
            }
            _ => debug!(path = %self.path.display(), "change reported with no store attached"),
        }
    }

    /// Editors often replace the file instead of rewriting it; follow the path.
    async fn reopen_if_replaced(&self, state: &mut State) -> Result<()> {
        let Some(file) = state.file.as_ref() else {
            return Ok(());
        };

        let held = ChangeStamp::from_metadata(&file.metadata().await?)?;
        let on_disk = self.path_stamp().await?;
        if !held.same_file(&on_disk) {
            state.file = Some(open_file(&self.path, &self.config).await?);
            debug!(path = %self.path.display(), "credential file replaced, reopened");
        }
        Ok(())
    }

    async fn path_stamp(&self) -> Result<ChangeStamp> {
        let metadata = tokio::fs::metadata(&self.path).await?;
        Ok(ChangeStamp::from_metadata(&metadata)?)
    }

    fn disable(&self, state: &mut State, operation: &str, err: &Error) {
        error!(
            path = %self.path.display(),
            operation,
            "credential file unusable, disabling backend: {err}"
        );
        state.file = None;
    }
}

async fn open_file(path: &Path, config: &FileBackendConfig) -> Result<File> {
    let mut options = OpenOptions::new();
    options.read(true);
    if !config.is_read_only() {
        options.write(true).create(true);
    }
    #[cfg(unix)]
    options.mode(config.permissions());

    Ok(options.open(path).await?)
}

async fn poll(inner: Weak<Inner>, every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if !inner.check_for_change().await {
            break;
        }
    }

    debug!("credential file poll loop stopped");
}
