use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use anyhow::{bail, Context as _};
use log::{debug, info, warn};
use tokio::sync::mpsc::{self, Receiver, Sender};

use crate::checked::CheckResult;
use crate::source::DomainSource;

/// Default number of workers
pub const DEFAULT_WORKERS: usize = 2;

type Queue = Arc<tokio::sync::Mutex<Receiver<String>>>;
type Results = Arc<Mutex<Vec<CheckResult>>>;

/// Fixed number of workers consuming one queue of domain names
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

impl Default for WorkerPool {
    fn default() -> Self {
        WorkerPool::new(DEFAULT_WORKERS)
    }
}

impl WorkerPool {
    /// Create a pool, at least one worker
    ///
    /// ```
    /// # use certwatch::WorkerPool;
    /// assert_eq!(1, WorkerPool::new(0).workers());
    /// ```
    pub fn new(workers: usize) -> Self {
        WorkerPool {
            workers: workers.max(1),
        }
    }

    /// Number of workers
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Feed domain names from `source` to the workers, check each with `check`, and wait until
    /// every worker signals completion. Exactly one result per domain name, in no particular
    /// order.
    pub async fn run<F, Fut>(
        &self,
        source: DomainSource,
        check: F,
    ) -> anyhow::Result<Vec<CheckResult>>
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CheckResult> + Send + 'static,
    {
        let start = Instant::now();
        let (queue_tx, queue_rx) = mpsc::channel(self.workers);
        let queue: Queue = Arc::new(tokio::sync::Mutex::new(queue_rx));
        let results: Results = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, mut done_rx) = mpsc::channel(self.workers);
        let check = Arc::new(check);

        let producer = source.spawn(queue_tx);

        for id in 0..self.workers {
            let worker = Worker {
                id,
                queue: queue.clone(),
                results: results.clone(),
                done: done_tx.clone(),
            };
            tokio::spawn(worker.run(check.clone()));
        }
        drop(done_tx);
        drop(queue);

        let mut signaled = 0;
        while signaled < self.workers {
            match done_rx.recv().await {
                Some(id) => {
                    debug!("worker {id} finished");
                    signaled += 1;
                }
                None => bail!(
                    "{} of {} workers exited without signaling completion",
                    self.workers - signaled,
                    self.workers
                ),
            }
        }

        let sent = producer.await.context("domain source stopped abnormally")?;
        let results = {
            let mut results = results.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *results)
        };
        if sent != results.len() {
            warn!("{sent} domain name(s) sent but {} result(s) collected", results.len());
        }
        info!(
            "checked {} domain name(s) with {} worker(s) in {}ms",
            results.len(),
            self.workers,
            start.elapsed().as_millis()
        );
        Ok(results)
    }
}

struct Worker {
    id: usize,
    queue: Queue,
    results: Results,
    done: Sender<usize>,
}

impl Worker {
    async fn run<F, Fut>(self, check: Arc<F>)
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = CheckResult>,
    {
        let mut checked = 0;
        loop {
            // lock is released before the check starts
            let domain = {
                let mut queue = self.queue.lock().await;
                queue.recv().await
            };
            let domain = match domain {
                Some(domain) => domain,
                None => break,
            };
            debug!("worker {} checks {domain}", self.id);
            let result = (*check)(domain).await;
            self.results
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(result);
            checked += 1;
        }

        let Worker {
            id, results, done, ..
        } = self;
        drop(results);
        debug!("worker {id} checked {checked} domain name(s)");
        let _ = done.send(id).await;
    }
}
