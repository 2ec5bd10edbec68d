//! Job accounting: pending counters, callback routing, and idle signaling.
//!
//! This is the fan-out/fan-in discipline the whole scheduler rests on: one
//! logical job (a `JobId`) may spawn any number of sub-job instances before
//! it can be declared done, and the callback registered for that id must see
//! every result they produce.

use std::collections::HashMap;
use std::sync::Arc;

use crate::browser::Browser;
use crate::error::{ClusterError, ClusterResult};
use crate::job::{Job, JobId, JobResult};
use crate::skip::SkipRegistry;

/// A callback registered for a job id.
///
/// Most jobs register a [`Callback::Result`]; the distinguished
/// `BrowserProvider` job kind registers a [`Callback::Browser`] instead so it
/// can hand its worker's browser directly to the caller. Both share the same
/// per-id pending counter, callback-removal, and never-ending bookkeeping —
/// only the invocation shape differs.
pub enum Callback {
    /// Invoked once per [`JobResult`] routed to this job id.
    Result(Arc<dyn Fn(JobResult) + Send + Sync>),
    /// Invoked once per browser handed off by a `BrowserProvider` instance.
    Browser(Arc<dyn Fn(&dyn Browser) + Send + Sync>),
}

impl Callback {
    fn invoke_result(&self, result: JobResult) {
        match self {
            Self::Result(f) => f(result),
            Self::Browser(_) => {
                #[cfg(feature = "tracing-integration")]
                tracing::warn!(job_id = ?result.job_id, "result routed to a browser callback, ignoring");
            }
        }
    }

    fn invoke_browser(&self, job_id: JobId, browser: &dyn Browser) {
        match self {
            Self::Browser(f) => f(browser),
            Self::Result(_) => {
                #[cfg(feature = "tracing-integration")]
                tracing::warn!(?job_id, "browser handoff routed to a result callback, ignoring");
            }
        }
    }
}

/// Per-id pending counters, the callback registry, and the skip registry.
///
/// All multi-step transitions run under the single supervisor lock that
/// wraps this struct (see [`crate::cluster::ClusterInner`]); `decrease_pending`
/// calling `job_done` is the reentrant case the spec calls out explicitly,
/// and the lock used to guard this struct must tolerate that.
#[derive(Default)]
pub struct Accounting {
    pending_by_id: HashMap<JobId, u64>,
    global_pending: u64,
    callbacks: HashMap<JobId, Callback>,
    never_ending: HashMap<JobId, bool>,
    idle: bool,
    skip: SkipRegistry,
}

impl Accounting {
    /// A fresh accounting table: no pending work, idle.
    pub fn new() -> Self {
        Self {
            idle: true,
            ..Self::default()
        }
    }

    /// Global pending counter, for tests and invariant checks.
    #[must_use]
    pub fn global_pending(&self) -> u64 {
        self.global_pending
    }

    /// Per-id pending counter. Zero for unknown ids.
    #[must_use]
    pub fn pending_for(&self, job_id: JobId) -> u64 {
        self.pending_by_id.get(&job_id).copied().unwrap_or(0)
    }

    /// Whether the global pending counter is zero.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.global_pending == 0
    }

    /// Whether the idle-signal is set (equivalent to `is_done`, exposed
    /// separately because the idle-signal is what `wait` actually blocks on).
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.idle
    }

    /// Registers (or re-uses) a callback and increments pending for `job`'s
    /// id. `callback` is only consulted the first time this id is seen;
    /// later calls for the same id reuse whatever was registered first.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::AlreadyDone`] if this id is still present in
    /// the pending table at zero and is not never-ending — `job_done` removes
    /// a finished id's entry entirely rather than leaving it zeroed, so in
    /// practice this only fires if a caller re-registers an id within the
    /// same lock acquisition that is driving it to zero.
    /// Returns [`ClusterError::MissingCallback`] if no callback has ever been
    /// registered for this id and `callback` is `None`; this is also what a
    /// finished id's re-registration surfaces once its entries have been
    /// forgotten, since it is then indistinguishable from a brand-new id.
    pub fn register(
        &mut self,
        job: &dyn Job,
        callback: Option<Callback>,
    ) -> ClusterResult<()> {
        let id = job.id();
        let already_known = self.callbacks.contains_key(&id) || self.pending_by_id.contains_key(&id);
        let is_never_ending = job.never_ending() || self.never_ending.get(&id).copied().unwrap_or(false);

        if already_known && !is_never_ending && self.pending_for(id) == 0 {
            return Err(ClusterError::AlreadyDone(id));
        }

        if !self.callbacks.contains_key(&id) {
            match callback {
                Some(cb) => {
                    self.callbacks.insert(id, cb);
                }
                None => return Err(ClusterError::MissingCallback(id)),
            }
        }

        self.never_ending.insert(id, is_never_ending);
        *self.pending_by_id.entry(id).or_insert(0) += 1;
        self.global_pending += 1;
        self.idle = false;
        Ok(())
    }

    /// Routes `result` to the callback registered for its job id. A no-op if
    /// that id is already done (its callback has been removed).
    ///
    /// The caller is responsible for the failure barrier around invoking the
    /// callback itself (see [`crate::cluster::ClusterInner::handle_result`]);
    /// this method only performs the lookup and dispatch.
    pub fn dispatch_result(&self, result: JobResult) {
        if let Some(callback) = self.callbacks.get(&result.job_id) {
            callback.invoke_result(result);
        }
    }

    /// Routes a browser handoff to the callback registered for `job_id`.
    pub fn dispatch_browser(&self, job_id: JobId, browser: &dyn Browser) {
        if let Some(callback) = self.callbacks.get(&job_id) {
            callback.invoke_browser(job_id, browser);
        }
    }

    /// Decrements global and per-id pending for `job`'s id by one. If the
    /// per-id counter reaches zero, triggers [`Self::job_done`] for that id.
    pub fn decrease_pending(&mut self, job: &dyn Job) {
        let id = job.id();
        let counter = self.pending_by_id.entry(id).or_insert(0);
        *counter = counter.saturating_sub(1);
        self.global_pending = self.global_pending.saturating_sub(1);
        if *counter == 0 {
            self.job_done(id);
        }
    }

    /// Declares `job_id` done.
    ///
    /// For non-never-ending jobs: removes the skip set, the callback, the
    /// per-id pending entry, and the never-ending marker entirely — not just
    /// zeroing the counter — reconciling the global counter by subtracting
    /// whatever remained in the per-id counter first (rather than trusting
    /// only the `decrease_pending` stream — see the design notes on the
    /// counter-drain discipline). Every root submission allocates a fresh
    /// `JobId`, so dropping these entries rather than leaving a zeroed
    /// tombstone behind is what keeps both maps bounded by the number of
    /// jobs currently in flight, not by the cluster's lifetime total. If the
    /// global counter is then zero or below, releases the idle-signal.
    ///
    /// For never-ending jobs this is a no-op with respect to callback and
    /// skip-set removal: their pending counters are allowed to oscillate
    /// above and below zero across repeated submissions.
    pub fn job_done(&mut self, job_id: JobId) {
        let never_ending = self.never_ending.get(&job_id).copied().unwrap_or(false);
        if never_ending {
            if self.global_pending == 0 {
                self.idle = true;
            }
            return;
        }

        self.skip.clear(job_id);
        self.callbacks.remove(&job_id);
        self.never_ending.remove(&job_id);

        if let Some(remaining) = self.pending_by_id.remove(&job_id) {
            self.global_pending = self.global_pending.saturating_sub(remaining);
        }

        if self.global_pending == 0 {
            self.idle = true;
        }
    }

    /// Whether `job_id` is done. Never-ending jobs always report `false`.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::JobNotFound`] if `fail_if_missing` is set and
    /// this id is unknown to both the pending table and the callback table.
    pub fn is_job_done(&self, job_id: JobId, fail_if_missing: bool) -> ClusterResult<bool> {
        if self.never_ending.get(&job_id).copied().unwrap_or(false) {
            return Ok(false);
        }
        let known = self.pending_by_id.contains_key(&job_id) || self.callbacks.contains_key(&job_id);
        if !known {
            if fail_if_missing {
                return Err(ClusterError::JobNotFound(job_id));
            }
            return Ok(true);
        }
        Ok(self.pending_for(job_id) == 0)
    }

    /// Query facet into the skip registry, kept alongside accounting because
    /// a skip set's lifetime is tied to its job id's accounting lifetime.
    pub fn skip_registry(&mut self) -> &mut SkipRegistry {
        &mut self.skip
    }

    /// Read-only facet into the skip registry.
    pub fn skip_registry_ref(&self) -> &SkipRegistry {
        &self.skip
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{BrowserProviderJob, FnJob, JobOutcome};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn dummy_job(id: JobId) -> FnJob<impl Fn(&dyn Browser, &crate::cluster::ClusterHandle) -> Result<JobOutcome, crate::error::JobError> + Send + Sync>
    {
        FnJob::new_child(id, |_b, _h| Ok(JobOutcome::empty()))
    }

    #[test]
    fn fresh_table_is_idle() {
        let acc = Accounting::new();
        assert!(acc.is_done());
        assert!(acc.is_idle());
    }

    #[test]
    fn register_without_callback_fails_for_unknown_id() {
        let mut acc = Accounting::new();
        let job = dummy_job(JobId::new_for_test(1));
        let err = acc.register(&job, None).unwrap_err();
        assert_eq!(err, ClusterError::MissingCallback(JobId::new_for_test(1)));
    }

    #[test]
    fn register_then_full_drain_marks_done_and_drops_callback() {
        let mut acc = Accounting::new();
        let id = JobId::new_for_test(1);
        let job = dummy_job(id);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        acc.register(
            &job,
            Some(Callback::Result(Arc::new(move |_| {
                calls2.fetch_add(1, Ordering::SeqCst);
            }))),
        )
        .unwrap();
        assert_eq!(acc.global_pending(), 1);
        assert!(!acc.is_idle());

        acc.dispatch_result(JobResult::new(id, serde_json::Value::Null));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        acc.decrease_pending(&job);
        assert!(acc.is_done());
        assert!(acc.is_idle());
        assert_eq!(acc.pending_for(id), 0);
    }

    #[test]
    fn a_done_jobs_id_is_fully_forgotten() {
        // Real ids are allocated fresh per root submission and never reused,
        // so once `job_done` has run there is nothing left to distinguish
        // this id from one that was never registered at all: re-registering
        // it behaves exactly like registering a brand-new id, not like
        // reviving a finished one.
        let mut acc = Accounting::new();
        let id = JobId::new_for_test(1);
        let job = dummy_job(id);
        acc.register(&job, Some(Callback::Result(Arc::new(|_| {}))))
            .unwrap();
        acc.decrease_pending(&job);
        assert_eq!(acc.pending_for(id), 0);

        let err = acc.register(&job, None).unwrap_err();
        assert_eq!(err, ClusterError::MissingCallback(id));

        acc.register(&job, Some(Callback::Result(Arc::new(|_| {}))))
            .unwrap();
        assert_eq!(acc.pending_for(id), 1);
    }

    #[test]
    fn never_ending_job_never_reports_done_and_keeps_callback() {
        let mut acc = Accounting::new();
        let provider = BrowserProviderJob::new_never_ending();
        let id = provider.id();
        acc.register(&provider, Some(Callback::Browser(Arc::new(|_| {}))))
            .unwrap();
        acc.decrease_pending(&provider);
        assert!(!acc.is_job_done(id, false).unwrap());
        // Callback must still be registered: a second `register` with no
        // callback argument must succeed, reusing the original.
        acc.register(&provider, None).unwrap();
        assert_eq!(acc.pending_for(id), 1);
    }

    #[test]
    fn unknown_job_done_query_fails_if_requested() {
        let acc = Accounting::new();
        let err = acc
            .is_job_done(JobId::new_for_test(99), true)
            .unwrap_err();
        assert_eq!(err, ClusterError::JobNotFound(JobId::new_for_test(99)));
    }

    #[test]
    fn fan_out_three_children_all_drain_before_done() {
        let mut acc = Accounting::new();
        let id = JobId::new_for_test(7);
        let parent = dummy_job(id);
        acc.register(&parent, Some(Callback::Result(Arc::new(|_| {}))))
            .unwrap();
        // Parent spawns two more instances sharing its id.
        acc.register(&dummy_job(id), None).unwrap();
        acc.register(&dummy_job(id), None).unwrap();
        assert_eq!(acc.global_pending(), 3);

        acc.decrease_pending(&dummy_job(id));
        acc.decrease_pending(&dummy_job(id));
        assert!(!acc.is_done());
        acc.decrease_pending(&dummy_job(id));
        assert!(acc.is_done());
    }
}
