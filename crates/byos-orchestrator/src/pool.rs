//! Bounded worker pool
//!
//! With a limit of 1 items run strictly in order with a fixed pause between
//! them. With a higher limit that many workers pull items from a shared
//! queue. Results come back over a channel into slots indexed by item
//! position, so callers always get them in input order. A panicking job is
//! caught at the pool boundary and turned into a result by the caller's
//! `on_crash`.

use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, error};

/// Pool settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of jobs running at once
    pub concurrency: usize,
    /// Pause between items when running sequentially
    pub inter_target_delay: Duration,
}

#[derive(Debug, Default)]
struct Activity {
    active: AtomicUsize,
    peak: AtomicUsize,
}

/// Marks one job as active for as long as it lives
struct ActiveSlot<'a>(&'a Activity);

impl<'a> ActiveSlot<'a> {
    fn enter(activity: &'a Activity) -> Self {
        let now = activity.active.fetch_add(1, Ordering::SeqCst) + 1;
        activity.peak.fetch_max(now, Ordering::SeqCst);
        Self(activity)
    }
}

impl Drop for ActiveSlot<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs one job per item with bounded concurrency
#[derive(Debug)]
pub struct WorkerPool {
    config: PoolConfig,
    activity: Arc<Activity>,
}

impl WorkerPool {
    /// Create a pool; a concurrency of 0 is treated as 1
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config: PoolConfig {
                concurrency: config.concurrency.max(1),
                ..config
            },
            activity: Arc::new(Activity::default()),
        }
    }

    /// Highest number of jobs that ran at the same time so far
    pub fn peak_active(&self) -> usize {
        self.activity.peak.load(Ordering::SeqCst)
    }

    /// Run `job` for every item and return the results in input order
    pub async fn run<T, O, F, Fut, C>(&self, items: Vec<T>, job: F, on_crash: C) -> Vec<(T, O)>
    where
        T: Clone + Send + 'static,
        O: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = O> + Send + 'static,
        C: Fn(&T, &str) -> O + Send + Sync + 'static,
    {
        if items.is_empty() {
            return Vec::new();
        }
        if self.config.concurrency == 1 {
            self.run_sequential(items, job, on_crash).await
        } else {
            self.run_concurrent(items, job, on_crash).await
        }
    }

    async fn run_sequential<T, O, F, Fut, C>(&self, items: Vec<T>, job: F, on_crash: C) -> Vec<(T, O)>
    where
        T: Clone,
        F: Fn(T) -> Fut,
        Fut: Future<Output = O>,
        C: Fn(&T, &str) -> O,
    {
        let mut results = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            if index > 0 && !self.config.inter_target_delay.is_zero() {
                debug!(
                    delay_secs = self.config.inter_target_delay.as_secs_f64(),
                    "Pausing before next target"
                );
                smol::Timer::after(self.config.inter_target_delay).await;
            }
            let slot = ActiveSlot::enter(&self.activity);
            let outcome = match AssertUnwindSafe(job(item.clone())).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(%message, "Worker crashed");
                    on_crash(&item, &message)
                }
            };
            drop(slot);
            results.push((item, outcome));
        }
        results
    }

    async fn run_concurrent<T, O, F, Fut, C>(&self, items: Vec<T>, job: F, on_crash: C) -> Vec<(T, O)>
    where
        T: Clone + Send + 'static,
        O: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = O> + Send + 'static,
        C: Fn(&T, &str) -> O + Send + Sync + 'static,
    {
        let job = Arc::new(job);
        let on_crash = Arc::new(on_crash);
        let count = items.len();

        let (job_tx, job_rx) = async_channel::bounded::<(usize, T)>(count);
        for (index, item) in items.iter().cloned().enumerate() {
            // Capacity equals the item count, so this never waits.
            if job_tx.send((index, item)).await.is_err() {
                break;
            }
        }
        job_tx.close();

        let (result_tx, result_rx) = async_channel::unbounded::<(usize, O)>();
        let workers = self.config.concurrency.min(count);
        debug!(workers, items = count, "Starting worker pool");

        let mut tasks = Vec::with_capacity(workers);
        for worker in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let job = Arc::clone(&job);
            let on_crash = Arc::clone(&on_crash);
            let activity = Arc::clone(&self.activity);
            tasks.push(smol::spawn(async move {
                while let Ok((index, item)) = job_rx.recv().await {
                    let slot = ActiveSlot::enter(&activity);
                    let outcome = match AssertUnwindSafe((*job)(item.clone())).catch_unwind().await {
                        Ok(outcome) => outcome,
                        Err(payload) => {
                            let message = panic_message(payload.as_ref());
                            error!(worker, %message, "Worker crashed");
                            (*on_crash)(&item, &message)
                        }
                    };
                    drop(slot);
                    if result_tx.send((index, outcome)).await.is_err() {
                        break;
                    }
                }
            }));
        }
        drop(result_tx);

        let mut slots: Vec<Option<O>> = (0..count).map(|_| None).collect();
        while let Ok((index, outcome)) = result_rx.recv().await {
            slots[index] = Some(outcome);
        }
        for task in tasks {
            task.await;
        }

        items
            .into_iter()
            .zip(slots)
            .map(|(item, slot)| {
                let outcome = match slot {
                    Some(outcome) => outcome,
                    None => on_crash(&item, "worker exited without reporting a result"),
                };
                (item, outcome)
            })
            .collect()
    }
}
