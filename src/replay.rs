//! Quiet-period buffer.
//!
//! The first item after an idle period arms one timer. Everything pushed before
//! it fires joins the same batch, and the batch is handed to the flush callback
//! in arrival order. Input goes through an unbounded channel, so producers are
//! never held up by a flush in progress. Dropping the buffer stops the
//! background task; items still pending at that point are discarded.

use tokio::{
    sync::mpsc,
    time::{Duration, Instant, sleep_until},
};
use tracing::debug;

#[derive(Debug)]
pub struct ReplayBuffer<T> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T: Send + 'static> ReplayBuffer<T> {
    /// Spawn the flushing task. `flush` must not block; it runs on the task
    /// that also accepts new items.
    pub fn spawn<F>(delay: Duration, flush: F) -> Self
    where
        F: FnMut(Vec<T>) + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(rx, delay, flush));
        Self { tx }
    }

    /// Queue an item. Returns `false` if the flushing task is gone.
    pub fn push(&self, item: T) -> bool {
        self.tx.send(item).is_ok()
    }
}

async fn run<T, F>(mut rx: mpsc::UnboundedReceiver<T>, delay: Duration, mut flush: F)
where
    F: FnMut(Vec<T>),
{
    let mut pending: Vec<T> = Vec::new();
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            item = rx.recv() => match item {
                Some(item) => {
                    if deadline.is_none() {
                        deadline = Some(Instant::now() + delay);
                    }
                    pending.push(item);
                }
                None => break,
            },
            () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                let batch = std::mem::take(&mut pending);
                debug!(items = batch.len(), "flushing replay buffer");
                flush(batch);
            }
        }
    }

    if !pending.is_empty() {
        debug!(items = pending.len(), "replay buffer closed, discarding pending items");
    }
}
