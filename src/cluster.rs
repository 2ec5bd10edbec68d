//! Public facade: lifecycle, `queue`, `with_browser`, `wait`, `shutdown`.
//!
//! `Cluster` mediates the persistent job queue, the accounting table (which
//! in turn owns the skip registry), and the pool of worker threads. All
//! shared mutable state lives behind a single [`parking_lot::Mutex`]; every
//! transition accounting needs (including `decrease_pending` calling
//! `job_done` internally) happens inside one `lock()` call, so no recursive
//! acquisition is ever required.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::accounting::{Accounting, Callback};
use crate::browser::Browser;
use crate::config::ClusterConfig;
use crate::error::{ClusterError, ClusterResult};
use crate::job::{BrowserProviderJob, FnJob, Job, JobId, JobOutcome, JobResult,
    ResourceExplorationJob, TaintTraceJob};
use crate::queue::PersistentQueue;
use crate::sitemap::Sitemap;
use crate::util::js_token;
use crate::worker::{BrowserFactory, Worker};

/// Shared state guarded by the supervisor's single monitor lock.
pub(crate) struct ClusterState {
    pub(crate) accounting: Accounting,
    pub(crate) sitemap: Sitemap,
}

/// Everything workers and the facade share: the monitor, the queue, the
/// shutdown flag, configuration, and the idle-wait condvar.
pub(crate) struct ClusterInner {
    pub(crate) state: Mutex<ClusterState>,
    pub(crate) idle_signal: Mutex<()>,
    pub(crate) idle_condvar: Condvar,
    pub(crate) queue: PersistentQueue,
    pub(crate) shutdown: AtomicBool,
    pub(crate) js_token: String,
    pub(crate) config: ClusterConfig,
}

impl ClusterInner {
    fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn check_open(&self) -> ClusterResult<()> {
        if self.is_shut_down() {
            Err(ClusterError::AlreadyShutdown)
        } else {
            Ok(())
        }
    }

    /// Registers `job`/`callback` with accounting and pushes `job` onto the
    /// queue. Shared by `Cluster::queue`, `Cluster::with_browser`, and the
    /// worker's own re-queueing of spawned children.
    pub(crate) fn queue(&self, job: Box<dyn Job>, callback: Option<Callback>) -> ClusterResult<()> {
        self.check_open()?;
        {
            let mut state = self.state.lock();
            state.accounting.register(job.as_ref(), callback)?;
        }
        self.queue.push(job);
        Ok(())
    }

    pub(crate) fn handle_result(&self, result: JobResult) {
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let state = self.state.lock();
            if state.accounting.is_job_done(result.job_id, false).unwrap_or(true) {
                return;
            }
            state.accounting.dispatch_result(result);
        }));
        if let Err(panic) = outcome {
            #[cfg(feature = "tracing-integration")]
            tracing::error!(?panic, "job callback panicked; suppressing");
            #[cfg(not(feature = "tracing-integration"))]
            let _ = panic;
        }
    }

    pub(crate) fn handle_browser_callback(&self, job_id: JobId, browser: &dyn Browser) {
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let state = self.state.lock();
            if state.accounting.is_job_done(job_id, false).unwrap_or(true) {
                return;
            }
            state.accounting.dispatch_browser(job_id, browser);
        }));
        if let Err(panic) = outcome {
            #[cfg(feature = "tracing-integration")]
            tracing::error!(?panic, "browser callback panicked; suppressing");
            #[cfg(not(feature = "tracing-integration"))]
            let _ = panic;
        }
    }

    pub(crate) fn decrease_pending(&self, job: &dyn Job) {
        let now_idle = {
            let mut state = self.state.lock();
            state.accounting.decrease_pending(job);
            state.accounting.is_idle()
        };
        if now_idle {
            let _guard = self.idle_signal.lock();
            self.idle_condvar.notify_all();
        }
    }

    pub(crate) fn is_skipped_or_mark(&self, job_id: JobId, action: &str) -> bool {
        let mut state = self.state.lock();
        state.accounting.skip_registry().insert(job_id, action)
    }

    pub(crate) fn is_skipped(&self, job_id: JobId, action: &str) -> bool {
        let state = self.state.lock();
        state.accounting.skip_registry_ref().contains(job_id, action)
    }

    pub(crate) fn merge_skips(&self, job_id: JobId, actions: Vec<String>) {
        let mut state = self.state.lock();
        state.accounting.skip_registry().merge(job_id, actions);
    }

    pub(crate) fn push_to_sitemap(&self, url: String, status: u16) {
        let mut state = self.state.lock();
        state.sitemap.record(url, status);
    }

    pub(crate) fn job_is_done(&self, job_id: JobId) -> bool {
        let state = self.state.lock();
        state.accounting.is_job_done(job_id, false).unwrap_or(true)
    }

    pub(crate) fn is_globally_done(&self) -> bool {
        let state = self.state.lock();
        state.accounting.is_done()
    }

    pub(crate) fn wait(&self) -> ClusterResult<()> {
        loop {
            self.check_open()?;
            if self.is_globally_done() {
                return Ok(());
            }
            let mut guard = self.idle_signal.lock();
            self.check_open()?;
            if self.is_globally_done() {
                return Ok(());
            }
            self.idle_condvar.wait(&mut guard);
        }
    }
}

/// The narrow capability a job's `execute` body receives: enough to queue
/// children, touch the skip registry and sitemap, and route results, but not
/// enough to call `shutdown` or reach accounting directly.
///
/// Each worker owns exactly one `ClusterHandle` for its whole lifetime
/// (see [`crate::worker`]), so `pages_loaded` doubles as that worker's
/// own page-visit counter: `push_to_sitemap` increments it once per page a
/// job body actually loads, and the worker drains it via
/// [`Self::take_pages_loaded`] after each job to drive browser recycling.
/// Cloning a handle (e.g. to capture it in a closure) shares the same
/// counter, since a clone is still scoped to the same worker.
#[derive(Clone)]
pub struct ClusterHandle {
    inner: Arc<ClusterInner>,
    pages_loaded: Arc<AtomicU32>,
}

impl ClusterHandle {
    pub(crate) fn new(inner: Arc<ClusterInner>) -> Self {
        Self {
            inner,
            pages_loaded: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Resets this handle's page counter to zero and returns the count
    /// accumulated since the last call (or since construction).
    pub(crate) fn take_pages_loaded(&self) -> u32 {
        self.pages_loaded.swap(0, Ordering::SeqCst)
    }

    /// Routes `result` to the callback registered for its job id.
    pub fn handle_result(&self, result: JobResult) {
        self.inner.handle_result(result);
    }

    /// Hands `browser` to the `BrowserProvider` callback registered for `job_id`.
    pub fn handle_browser_callback(&self, job_id: JobId, browser: &dyn Browser) {
        self.inner.handle_browser_callback(job_id, browser);
    }

    /// Queues a child job sharing its parent's id. The parent's callback is
    /// already registered, so no callback argument is accepted here.
    pub fn queue_child(&self, job: Box<dyn Job>) -> ClusterResult<()> {
        self.inner.queue(job, None)
    }

    /// Atomically checks-and-marks `action` as performed for `job_id`.
    /// Returns `true` if this is the first caller to mark it (the caller
    /// should proceed with the action); `false` if some other worker already
    /// performed it.
    pub fn skip(&self, job_id: JobId, action: &str) -> bool {
        self.inner.is_skipped_or_mark(job_id, action)
    }

    /// Pure membership query against the skip registry, without marking.
    pub fn is_skipped(&self, job_id: JobId, action: &str) -> bool {
        self.inner.is_skipped(job_id, action)
    }

    /// Unions `actions` into `job_id`'s skip set.
    pub fn merge_skips(&self, job_id: JobId, actions: Vec<String>) {
        self.inner.merge_skips(job_id, actions);
    }

    /// Appends a visited URL and its status to the process-wide sitemap, and
    /// counts this as one page served against this handle's owning worker's
    /// `time_to_live` budget.
    pub fn push_to_sitemap(&self, url: String, status: u16) {
        self.inner.push_to_sitemap(url, status);
        self.pages_loaded.fetch_add(1, Ordering::SeqCst);
    }

    /// The per-cluster random namespace token, shared read-only by every
    /// worker and job so DOM state injected during an audit (e.g. a probe
    /// object exposed to page JS) can be named without colliding across
    /// concurrent audits.
    #[must_use]
    pub fn js_token(&self) -> &str {
        &self.inner.js_token
    }
}

/// A bounded pool of controllable headless-browser workers.
///
/// Construct with [`Cluster::new`], submit work with [`Cluster::queue`] (or
/// the [`Cluster::explore`]/[`Cluster::trace_taint`]/[`Cluster::with_browser`]
/// conveniences), and either [`Cluster::wait`] for everything queued so far to
/// drain or [`Cluster::shutdown`] to tear the pool down.
pub struct Cluster {
    inner: Arc<ClusterInner>,
    workers: Mutex<Vec<Worker>>,
}

impl Cluster {
    /// Builds a cluster with `config`, spawning `config.pool_size` worker
    /// threads, each backed by a browser produced by `browser_factory`.
    ///
    /// # Errors
    ///
    /// Fails if the disk-spill directory for the job queue cannot be created.
    pub fn new(
        config: ClusterConfig,
        browser_factory: BrowserFactory,
    ) -> std::io::Result<Self> {
        let inner = Arc::new(ClusterInner {
            state: Mutex::new(ClusterState {
                accounting: Accounting::new(),
                sitemap: Sitemap::new(),
            }),
            idle_signal: Mutex::new(()),
            idle_condvar: Condvar::new(),
            queue: PersistentQueue::new(config.spill_threshold)?,
            shutdown: AtomicBool::new(false),
            js_token: js_token(),
            config,
        });

        let mut workers = Vec::with_capacity(inner.config.pool_size);
        for index in 0..inner.config.pool_size {
            workers.push(Worker::spawn(index, Arc::clone(&inner), Arc::clone(&browser_factory)));
        }

        Ok(Self {
            inner,
            workers: Mutex::new(workers),
        })
    }

    /// Queues `job`, registering `callback` for its id if this is the first
    /// time that id has been seen.
    ///
    /// # Errors
    ///
    /// See [`ClusterError`] for the contract violations this can raise.
    pub fn queue(
        &self,
        job: Box<dyn Job>,
        callback: impl Fn(JobResult) + Send + Sync + 'static,
    ) -> ClusterResult<()> {
        self.inner
            .queue(job, Some(Callback::Result(Arc::new(callback))))
    }

    /// Convenience that queues a distinguished `BrowserProvider` job whose
    /// sole effect is handing its assigned worker's browser to `callback`.
    ///
    /// # Errors
    ///
    /// See [`ClusterError`] for the contract violations this can raise.
    pub fn with_browser(
        &self,
        callback: impl Fn(&dyn Browser) + Send + Sync + 'static,
    ) -> ClusterResult<()> {
        self.inner.queue(
            Box::new(BrowserProviderJob::new()),
            Some(Callback::Browser(Arc::new(callback))),
        )
    }

    /// Queues a never-ending `BrowserProvider`, returning its id so later
    /// submissions can reuse the same callback via [`Cluster::resubmit_provider`].
    ///
    /// # Errors
    ///
    /// See [`ClusterError`] for the contract violations this can raise.
    pub fn with_browser_provider(
        &self,
        callback: impl Fn(&dyn Browser) + Send + Sync + 'static,
    ) -> ClusterResult<JobId> {
        let job = BrowserProviderJob::new_never_ending();
        let id = job.id();
        self.inner
            .queue(Box::new(job), Some(Callback::Browser(Arc::new(callback))))?;
        Ok(id)
    }

    /// Re-submits a never-ending provider id without re-registering a callback.
    ///
    /// # Errors
    ///
    /// See [`ClusterError`] for the contract violations this can raise.
    pub fn resubmit_provider(&self, id: JobId) -> ClusterResult<()> {
        self.inner.queue(Box::new(BrowserProviderJob::resubmit(id)), None)
    }

    /// Queues a resource-exploration job against `resource`.
    ///
    /// # Errors
    ///
    /// See [`ClusterError`] for the contract violations this can raise.
    pub fn explore(
        &self,
        resource: impl Into<String>,
        options: serde_json::Value,
        callback: impl Fn(JobResult) + Send + Sync + 'static,
    ) -> ClusterResult<()> {
        self.queue(
            Box::new(ResourceExplorationJob::new_root(resource, options)),
            callback,
        )
    }

    /// Queues a taint-trace job against `resource`.
    ///
    /// # Errors
    ///
    /// See [`ClusterError`] for the contract violations this can raise.
    pub fn trace_taint(
        &self,
        resource: impl Into<String>,
        options: serde_json::Value,
        callback: impl Fn(JobResult) + Send + Sync + 'static,
    ) -> ClusterResult<()> {
        self.queue(
            Box::new(TaintTraceJob::new_root(resource, options)),
            callback,
        )
    }

    /// Queues a custom job whose body is a closure, for ad hoc work and
    /// tests. See [`FnJob`] for why these never spill to disk.
    ///
    /// # Errors
    ///
    /// See [`ClusterError`] for the contract violations this can raise.
    pub fn queue_fn<F>(
        &self,
        body: F,
        callback: impl Fn(JobResult) + Send + Sync + 'static,
    ) -> ClusterResult<()>
    where
        F: Fn(&dyn Browser, &ClusterHandle) -> Result<JobOutcome, crate::error::JobError>
            + Send
            + Sync
            + 'static,
    {
        self.queue(Box::new(FnJob::new_root(body)), callback)
    }

    /// Blocks the calling thread until every job queued so far (and every
    /// descendant it spawned) has completed.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::AlreadyShutdown`] if the cluster was shut down
    /// while this call was waiting, or already was before it started.
    pub fn wait(&self) -> ClusterResult<()> {
        self.inner.wait()
    }

    /// Whether the cluster currently has no outstanding pending work.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.inner.is_globally_done()
    }

    /// A snapshot of the process-wide sitemap.
    #[must_use]
    pub fn sitemap(&self) -> std::collections::HashMap<String, u16> {
        let state = self.inner.state.lock();
        state.sitemap.snapshot()
    }

    /// Tears the cluster down: sets the shutdown flag, clears the queue
    /// (including its on-disk files), and terminates every worker.
    /// Idempotent.
    pub fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.queue.clear();
        self.inner.queue.wake_all();
        {
            let _guard = self.inner.idle_signal.lock();
            self.inner.idle_condvar.notify_all();
        }
        let mut workers = self.workers.lock();
        for worker in workers.drain(..) {
            worker.join();
        }
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        self.shutdown();
    }
}
