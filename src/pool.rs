//! Bounded worker pool.
//!
//! Each worker owns a one-slot job channel. An idle worker parks that channel's
//! sender in a shared queue; `dispatch` takes the first idle sender and hands
//! the job over. Jobs run on tokio's blocking threads, so CPU-heavy work such
//! as bcrypt never stalls the async workers, and at most `workers` jobs run at
//! once.
//!
//! A job that returns an error or panics is logged and dropped at the job
//! boundary; the worker goes back to the idle queue either way.

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, warn};

type Job = Box<dyn FnOnce() -> anyhow::Result<()> + Send + 'static>;

enum WorkerMessage {
    Run(Job),
    Quit,
}

type Slot = mpsc::Sender<WorkerMessage>;

#[derive(Debug)]
pub struct WorkerPool {
    workers: usize,
    idle: Mutex<mpsc::Receiver<Slot>>,
}

impl WorkerPool {
    /// Start `workers` workers (at least one). Must be called inside a tokio runtime.
    #[must_use]
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        let (idle_tx, idle_rx) = mpsc::channel(workers);

        for id in 0..workers {
            tokio::spawn(worker(id, idle_tx.clone()));
        }

        Self {
            workers,
            idle: Mutex::new(idle_rx),
        }
    }

    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Hand `job` to the next idle worker, waiting for one if all are busy.
    ///
    /// Returns once the job has been handed over, not when it completes.
    /// Returns `false` if the pool has been shut down.
    pub async fn dispatch<F>(&self, job: F) -> bool
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        let slot = {
            let mut idle = self.idle.lock().await;
            idle.recv().await
        };

        match slot {
            Some(slot) => slot.send(WorkerMessage::Run(Box::new(job))).await.is_ok(),
            None => false,
        }
    }

    /// Wait for every worker to become idle, stop them, and close the pool.
    ///
    /// Callers must not dispatch while a shutdown is in progress.
    pub async fn shutdown(&self) {
        let mut idle = self.idle.lock().await;
        for _ in 0..self.workers {
            let Some(slot) = idle.recv().await else {
                break;
            };
            let _ = slot.send(WorkerMessage::Quit).await;
        }
        idle.close();
        debug!(workers = self.workers, "worker pool shut down");
    }
}

async fn worker(id: usize, idle: mpsc::Sender<Slot>) {
    let (slot, mut jobs) = mpsc::channel(1);

    if idle.send(slot.clone()).await.is_err() {
        return;
    }

    while let Some(message) = jobs.recv().await {
        match message {
            WorkerMessage::Quit => break,
            WorkerMessage::Run(job) => {
                match tokio::task::spawn_blocking(job).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => warn!(worker = id, "job failed: {err:#}"),
                    Err(err) => error!(worker = id, "job aborted: {err}"),
                }

                if idle.send(slot.clone()).await.is_err() {
                    break;
                }
            }
        }
    }
}
