use crate::{backend::FileBackend, cli::globals::GlobalArgs};
use anyhow::{Context, Result};
use tokio::signal;
use tracing::info;

/// Keep the file loaded, reloading on change, until Ctrl-C. On unix, SIGHUP
/// asks for a reload as well.
///
/// # Errors
/// Returns an error if the file cannot be opened or the signal handler fails.
pub async fn execute(globals: &GlobalArgs) -> Result<()> {
    let session = globals.open_store(true).await?;
    let entries = session
        .store
        .list()
        .await
        .map(|entries| entries.len())
        .unwrap_or(0);
    info!(
        file = %globals.file.display(),
        entries,
        poll_seconds = globals.poll_interval.as_secs(),
        "watching credential file"
    );

    let result = tokio::select! {
        result = signal::ctrl_c() => result.context("failed to listen for ctrl-c"),
        result = reload_on_hangup(&session.backend) => result,
    };

    // the file was opened read-only, there is nothing to write back
    info!("stopping");
    session.discard().await;
    result
}

#[cfg(unix)]
async fn reload_on_hangup(backend: &FileBackend) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangups = signal(SignalKind::hangup()).context("failed to listen for SIGHUP")?;
    while hangups.recv().await.is_some() {
        info!("SIGHUP received, reload requested");
        backend.notify_changed();
    }
    Ok(())
}

#[cfg(not(unix))]
async fn reload_on_hangup(_backend: &FileBackend) -> Result<()> {
    std::future::pending().await
}
