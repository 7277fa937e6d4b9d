//! Consumer callback execution.
//!
//! Callbacks are synchronous and may block on store reads, so they run on
//! tokio's blocking pool, never on a poller. A semaphore caps how many of
//! one engine's callbacks run at once. A panicking callback is contained
//! by its blocking task and surfaces as a [`JoinError`] to the completion
//! hook; scheduler state is never touched from inside the callback.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::runtime::Handle;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinError;

use crate::error::EngineError;

/// Count of submitted jobs that have not completed.
#[derive(Debug, Default)]
struct ActiveJobs {
    /// Jobs running or waiting for a permit.
    count: AtomicUsize,
    /// Woken whenever the count drops to zero.
    idle: Notify,
}

impl ActiveJobs {
    fn start(&self) {
        let _ = self.count.fetch_add(1, Ordering::AcqRel);
    }

    fn finish(&self) {
        let previous = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(1))
            })
            .unwrap_or_else(|n| n);
        if previous <= 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Bounded runner of blocking consumer callbacks.
#[derive(Debug)]
pub struct Dispatcher {
    /// Runtime the jobs are spawned on.
    handle: Handle,
    /// One permit per concurrently running callback.
    permits: Arc<Semaphore>,
    /// Outstanding jobs.
    active: Arc<ActiveJobs>,
}

impl Dispatcher {
    /// Create a dispatcher on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NoRuntime`] outside a runtime.
    pub fn new(workers: usize) -> Result<Self, EngineError> {
        let handle = Handle::try_current().map_err(|e| {
            tracing::debug!(error = %e, "dispatcher created outside a runtime");
            EngineError::NoRuntime
        })?;
        Ok(Self::with_handle(handle, workers))
    }

    /// Create a dispatcher spawning on `handle`.
    pub fn with_handle(handle: Handle, workers: usize) -> Self {
        Self {
            handle,
            permits: Arc::new(Semaphore::new(workers.max(1))),
            active: Arc::new(ActiveJobs::default()),
        }
    }

    /// Run `job` on the blocking pool, then hand its result to `done`.
    ///
    /// `done` runs on a runtime worker and must not block.
    pub fn submit<R, J, D>(&self, job: J, done: D)
    where
        R: Send + 'static,
        J: FnOnce() -> R + Send + 'static,
        D: FnOnce(Result<R, JoinError>) + Send + 'static,
    {
        self.active.start();
        let permits = Arc::clone(&self.permits);
        let active = Arc::clone(&self.active);
        drop(self.handle.spawn(async move {
            // The semaphore is never closed; a failed acquire runs unbounded.
            let permit = permits.acquire_owned().await.ok();
            let result = tokio::task::spawn_blocking(job).await;
            drop(permit);
            done(result);
            active.finish();
        }));
    }

    /// Jobs submitted and not yet completed.
    pub fn active(&self) -> usize {
        self.active.count.load(Ordering::Acquire)
    }

    /// Wait until every submitted job has completed.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.active.idle.notified();
            if self.active() == 0 {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn requires_a_runtime() {
        assert_eq!(Dispatcher::new(1).unwrap_err(), EngineError::NoRuntime);
    }

    #[tokio::test]
    async fn runs_jobs_and_reports_results() {
        let dispatcher = Dispatcher::new(2).unwrap();
        let results = Arc::new(Mutex::new(Vec::new()));
        for n in 0..5_u32 {
            let results = Arc::clone(&results);
            dispatcher.submit(
                move || n.saturating_mul(10),
                move |r| results.lock().unwrap().push(r.unwrap()),
            );
        }
        dispatcher.wait_idle().await;
        let mut got = results.lock().unwrap().clone();
        got.sort_unstable();
        assert_eq!(got, vec![0, 10, 20, 30, 40]);
        assert_eq!(dispatcher.active(), 0);
    }

    #[tokio::test]
    async fn panics_are_contained() {
        let dispatcher = Dispatcher::new(1).unwrap();
        let panicked = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&panicked);
        dispatcher.submit(
            || -> u32 { panic!("consumer bug") },
            move |r| *flag.lock().unwrap() = r.is_err_and(|e| e.is_panic()),
        );
        dispatcher.wait_idle().await;
        assert!(*panicked.lock().unwrap());
    }

    #[tokio::test]
    async fn idle_dispatcher_returns_immediately() {
        let dispatcher = Dispatcher::new(1).unwrap();
        dispatcher.wait_idle().await;
    }
}
