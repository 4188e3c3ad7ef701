//! Fixed-size async worker pool over an unbounded shared queue.
//!
//! Workers pull [`Job`]s from one channel. Each [`Job::Shutdown`] stops
//! exactly one worker, so [`WorkerPool::finish`] enqueues one per worker
//! after the real work and then joins every worker before returning.
//! Results land in a concurrent map keyed by card id.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{CardsortError, Result};

/// Queue item: real work or a stop marker for one worker.
#[derive(Debug)]
pub enum Job<T> {
    Task(T),
    Shutdown,
}

/// What a drained pool reports.
#[derive(Debug)]
pub struct PoolReport<R> {
    pub results: HashMap<String, R>,
    pub submitted: usize,
    pub workers_spawned: usize,
    /// Workers that returned normally after their shutdown marker.
    pub workers_exited: usize,
}

impl<R> PoolReport<R> {
    pub fn all_workers_exited(&self) -> bool {
        self.workers_exited == self.workers_spawned
    }
}

pub struct WorkerPool<T, R> {
    name: &'static str,
    sender: mpsc::UnboundedSender<Job<T>>,
    workers: Vec<JoinHandle<()>>,
    results: Arc<DashMap<String, R>>,
    submitted: usize,
}

impl<T, R> WorkerPool<T, R>
where
    T: Send + 'static,
    R: Send + Sync + 'static,
{
    /// Start `workers` workers, each running `handler` on the tasks it pulls.
    ///
    /// `handler` returns the result key (card id) with the result.
    pub fn spawn<H, Fut>(name: &'static str, workers: usize, handler: H) -> Result<Self>
    where
        H: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = (String, R)> + Send + 'static,
    {
        if workers == 0 {
            return Err(CardsortError::WorkerError(format!(
                "{name} pool needs at least one worker"
            )));
        }

        let (sender, receiver) = mpsc::unbounded_channel::<Job<T>>();
        let receiver = Arc::new(Mutex::new(receiver));
        let results = Arc::new(DashMap::new());
        let handler = Arc::new(handler);

        let handles = (0..workers)
            .map(|worker| {
                let receiver = Arc::clone(&receiver);
                let results = Arc::clone(&results);
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    let mut processed = 0usize;
                    loop {
                        let job = { receiver.lock().await.recv().await };
                        match job {
                            Some(Job::Task(task)) => {
                                let (key, result) = handler(task).await;
                                results.insert(key, result);
                                processed += 1;
                            }
                            Some(Job::Shutdown) => break,
                            None => {
                                warn!(pool = name, worker, "Queue closed without shutdown marker");
                                break;
                            }
                        }
                    }
                    debug!(pool = name, worker, processed, "Worker exited");
                })
            })
            .collect();

        Ok(Self {
            name,
            sender,
            workers: handles,
            results,
            submitted: 0,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    pub fn submitted(&self) -> usize {
        self.submitted
    }

    pub fn submit(&mut self, task: T) -> Result<()> {
        self.sender
            .send(Job::Task(task))
            .map_err(|_| CardsortError::WorkerError(format!("{} queue is closed", self.name)))?;
        self.submitted += 1;
        Ok(())
    }

    /// Stop every worker and wait for all of them.
    ///
    /// Returns only after each worker has exited, so every submitted task's
    /// result is in the report.
    pub async fn finish(self) -> Result<PoolReport<R>> {
        let workers_spawned = self.workers.len();
        for _ in 0..workers_spawned {
            self.sender.send(Job::Shutdown).map_err(|_| {
                CardsortError::WorkerError(format!("{} queue closed before shutdown", self.name))
            })?;
        }
        drop(self.sender);

        let mut workers_exited = 0usize;
        for handle in self.workers {
            match handle.await {
                Ok(()) => workers_exited += 1,
                Err(e) => warn!(pool = self.name, error = %e, "Worker failed"),
            }
        }

        let results = Arc::try_unwrap(self.results)
            .map_err(|_| {
                CardsortError::WorkerError(format!("{} results still shared after join", self.name))
            })?
            .into_iter()
            .collect();

        debug!(
            pool = self.name,
            submitted = self.submitted,
            workers_exited,
            "Pool drained"
        );
        Ok(PoolReport {
            results,
            submitted: self.submitted,
            workers_spawned,
            workers_exited,
        })
    }
}
