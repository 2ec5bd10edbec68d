//! The worker state machine: one OS thread per pool slot, each driving
//! exactly one browser at a time and recycling it after a configured number
//! of pages.
//!
//! A worker's state, in order: `Starting` (browser not yet built) → `Idle`
//! (blocked on the queue) → `Running` (executing a popped job) → back to
//! `Idle`, cycling until its page count reaches `time_to_live`, at which
//! point it transitions through `Recycling` (old browser shut down, new one
//! built) before returning to `Idle`. `Shutdown` is terminal. Workers never
//! hold the supervisor lock while talking to a browser; all accounting calls
//! happen either before dispatch or after the browser call returns.
//!
//! `time_to_live` counts pages actually loaded, not jobs dispatched: a job
//! whose body loads more than one page (or none at all, like the
//! `BrowserProvider` handoff job) is tracked accordingly via the worker's
//! [`ClusterHandle`], not by counting `execute` calls.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;

use crate::browser::Browser;
use crate::cluster::{ClusterHandle, ClusterInner};
use crate::job::{Job, JobOutcome, JobResult};

/// Produces a fresh browser instance. Invoked once per worker at startup and
/// again every time that worker recycles.
pub type BrowserFactory = Arc<dyn Fn() -> Box<dyn Browser> + Send + Sync>;

/// A handle to one spawned worker thread.
pub struct Worker {
    index: usize,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawns a new worker thread at pool slot `index`, backed by browsers
    /// from `factory`, driving jobs popped from `inner`'s queue.
    pub fn spawn(index: usize, inner: Arc<ClusterInner>, factory: BrowserFactory) -> Self {
        let handle = std::thread::Builder::new()
            .name(format!("browser-cluster-worker-{index}"))
            .spawn(move || run(index, &inner, factory.as_ref()))
            .expect("failed to spawn worker thread");
        Self {
            index,
            handle: Some(handle),
        }
    }

    /// This worker's pool slot.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Blocks until this worker's thread has exited.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(index: usize, inner: &Arc<ClusterInner>, factory: &(dyn Fn() -> Box<dyn Browser> + Send + Sync)) {
    let cluster_handle = ClusterHandle::new(Arc::clone(inner));
    // Pages actually loaded through `cluster_handle` since this browser was
    // built, drained from the handle's own counter after each job.
    let mut pages_served: u32 = 0;
    let mut browser = factory();

    #[cfg(feature = "tracing-integration")]
    tracing::debug!(worker = index, "starting");

    loop {
        if inner.shutdown.load(Ordering::SeqCst) {
            break;
        }

        let Some(job) = inner.queue.pop_unless(&inner.shutdown) else {
            break;
        };

        if inner.job_is_done(job.id()) {
            // A never-ending job's skip set outlives one submission, but a
            // plain job that finished while spilled (shouldn't normally
            // happen, but queue/accounting races are possible under
            // concurrent producers) should not be re-run.
            continue;
        }

        run_one(index, job.as_ref(), browser.as_ref(), &cluster_handle);
        inner.decrease_pending(job.as_ref());

        pages_served += cluster_handle.take_pages_loaded();
        if pages_served >= inner.config.time_to_live {
            #[cfg(feature = "tracing-integration")]
            tracing::debug!(worker = index, pages_served, "recycling browser");
            browser.shutdown();
            browser = factory();
            pages_served = 0;
        }
    }

    browser.shutdown();
    #[cfg(feature = "tracing-integration")]
    tracing::debug!(worker = index, "shut down");
}

/// Runs `job.execute`, isolating both `JobError` returns and panics inside
/// the job body or the browser driver: either is logged and swallowed, never
/// propagated past this worker's loop.
fn run_one(index: usize, job: &dyn Job, browser: &dyn Browser, handle: &ClusterHandle) {
    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| job.execute(browser, handle)));

    let outcome = match outcome {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(_err)) => {
            #[cfg(feature = "tracing-integration")]
            tracing::warn!(worker = index, job_id = ?job.id(), error = %_err, "job failed");
            #[cfg(not(feature = "tracing-integration"))]
            let _ = index;
            JobOutcome::empty()
        }
        Err(_panic) => {
            #[cfg(feature = "tracing-integration")]
            tracing::error!(worker = index, job_id = ?job.id(), "job panicked");
            #[cfg(not(feature = "tracing-integration"))]
            let _ = index;
            JobOutcome::empty()
        }
    };

    for result in outcome.results {
        deliver_result(handle, result);
    }
    for child in outcome.children {
        if let Err(_err) = handle.queue_child(child) {
            #[cfg(feature = "tracing-integration")]
            tracing::warn!(worker = index, error = %_err, "failed to queue child job");
        }
    }
}

fn deliver_result(handle: &ClusterHandle, result: JobResult) {
    handle.handle_result(result);
}
