//! Job identity, sub-job spawning semantics, and the result envelope.
//!
//! A [`Job`] carries the minimal data needed for a worker to resume it after
//! it has possibly round-tripped through the disk-backed queue: a resource
//! descriptor, kind-specific options, a [`Forwarder`] for spawning children
//! that share its [`JobId`], and the id itself. Identity equality is by id,
//! not by instance: a parent and all of its descendants answer the same
//! `JobId`, which is exactly what lets the accounting table track them as one
//! logical unit of work.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::browser::Browser;
use crate::cluster::ClusterHandle;
use crate::error::JobError;

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a logical job across all of its sub-jobs.
///
/// Every sub-job spawned by a job's [`Forwarder`] shares its parent's id, so
/// the accounting table, the callback registry, and the skip registry are all
/// keyed by `JobId` rather than by individual job instance.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(u64);

impl JobId {
    /// Allocates a fresh id for a brand-new root job.
    #[must_use]
    pub fn new_root() -> Self {
        Self(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Creates a job id for testing purposes with a caller-chosen value.
    #[doc(hidden)]
    #[must_use]
    pub const fn new_for_test(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Debug for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JobId({})", self.0)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Outcome of running one job instance against a browser.
///
/// `results` are routed to the parent id's callback one at a time via
/// [`ClusterHandle::handle_result`]; `children` are re-queued through
/// [`ClusterHandle::queue_child`] without a callback argument, since the
/// parent's callback is already registered.
#[derive(Default)]
pub struct JobOutcome {
    /// Results produced by this instance, to be routed to the parent callback.
    pub results: Vec<JobResult>,
    /// Sub-jobs spawned by this instance, sharing this job's id.
    pub children: Vec<Box<dyn Job>>,
}

impl JobOutcome {
    /// An outcome with no results and no children.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// An outcome carrying a single result payload.
    #[must_use]
    pub fn single(result: JobResult) -> Self {
        Self {
            results: vec![result],
            children: Vec::new(),
        }
    }
}

/// A `{job, payload}` envelope created by a worker during execution and
/// consumed only by the parent job's callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    /// Id of the job this result belongs to.
    pub job_id: JobId,
    /// Job-kind-specific payload, opaque to the scheduler.
    pub payload: serde_json::Value,
}

impl JobResult {
    /// Builds a result for `job_id` carrying `payload`.
    pub fn new(job_id: JobId, payload: impl Into<serde_json::Value>) -> Self {
        Self {
            job_id,
            payload: payload.into(),
        }
    }
}

/// The hook by which a worker runs a job.
///
/// `execute` is given a narrow capability (`ClusterHandle`), not the
/// supervisor itself, so job bodies can queue children, consult the skip
/// registry, and append to the sitemap, but cannot call `shutdown` or reach
/// into accounting directly.
pub trait Job: Send {
    /// Identity of the logical job this instance belongs to.
    fn id(&self) -> JobId;

    /// Whether this job's callback should survive `job_done` accounting
    /// (see [`crate::accounting`]).
    fn never_ending(&self) -> bool {
        false
    }

    /// Runs this job instance against `browser`, using `handle` to spawn
    /// children, route results, and touch shared cluster state.
    fn execute(
        &self,
        browser: &dyn Browser,
        handle: &ClusterHandle,
    ) -> Result<JobOutcome, JobError>;

    /// Encodes this instance for the disk-spill path of the persistent
    /// queue, if this job kind supports it.
    ///
    /// Job payloads that go on disk must be data-only (see the design notes
    /// on why callbacks never travel with a job); the closure-bodied
    /// [`FnJob`] escape hatch used by facade conveniences and tests cannot
    /// satisfy that and returns `None`, which keeps such instances resident
    /// in memory rather than spilling them. The named job kinds below
    /// (`ResourceExplorationJob`, `TaintTraceJob`, `BrowserProviderJob`) all
    /// support spilling.
    fn spill_encode(&self) -> Option<Vec<u8>> {
        None
    }
}

/// Closed set of job kinds the persistent queue knows how to rehydrate from
/// a spilled disk record. This is the wire format for [`Job::spill_encode`];
/// it never carries a callback (see the design notes on serialized jobs).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum JobRecord {
    Explore {
        id: JobId,
        resource: String,
        options: serde_json::Value,
    },
    TraceTaint {
        id: JobId,
        resource: String,
        options: serde_json::Value,
    },
    BrowserProvider {
        id: JobId,
        never_ending: bool,
    },
}

/// Rehydrates a job previously encoded by [`Job::spill_encode`].
pub(crate) fn decode_spilled(bytes: &[u8]) -> Box<dyn Job> {
    let (record, _): (JobRecord, usize) =
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .expect("spilled job record failed to deserialize");
    match record {
        JobRecord::Explore {
            id,
            resource,
            options,
        } => Box::new(ResourceExplorationJob {
            id,
            resource,
            options,
        }),
        JobRecord::TraceTaint {
            id,
            resource,
            options,
        } => Box::new(TaintTraceJob {
            id,
            resource,
            options,
        }),
        JobRecord::BrowserProvider { id, never_ending } => Box::new(BrowserProviderJob {
            id,
            never_ending,
        }),
    }
}

fn encode_record(record: &JobRecord) -> Option<Vec<u8>> {
    bincode::serde::encode_to_vec(record, bincode::config::standard()).ok()
}

/// Resource-exploration job: loads `resource` and reports the status
/// observed, recording the visit in the sitemap.
///
/// The concrete exploration strategy (which links to follow, which forms to
/// fill) is an external collaborator's concern; this body only demonstrates
/// the minimal, real interaction the scheduler requires of a job.
pub struct ResourceExplorationJob {
    id: JobId,
    resource: String,
    options: serde_json::Value,
}

impl ResourceExplorationJob {
    /// Builds a fresh root exploration job for `resource`.
    pub fn new_root(resource: impl Into<String>, options: serde_json::Value) -> Self {
        Self {
            id: JobId::new_root(),
            resource: resource.into(),
            options,
        }
    }
}

impl Job for ResourceExplorationJob {
    fn id(&self) -> JobId {
        self.id
    }

    fn execute(
        &self,
        browser: &dyn Browser,
        handle: &ClusterHandle,
    ) -> Result<JobOutcome, JobError> {
        let status = browser.load(&self.resource)?;
        handle.push_to_sitemap(self.resource.clone(), status);
        let mut outcome = JobOutcome::single(JobResult::new(
            self.id,
            serde_json::json!({ "resource": self.resource, "status": status }),
        ));
        // `options.follow` names sibling resources discovered ahead of time
        // (by the caller, or by a prior pass); each is forwarded as a child
        // sharing this job's id rather than re-queued as an unrelated root.
        if let Some(follow) = self.options.get("follow").and_then(serde_json::Value::as_array) {
            for resource in follow.iter().filter_map(serde_json::Value::as_str) {
                outcome
                    .children
                    .push(self.forward(serde_json::json!({ "resource": resource })));
            }
        }
        Ok(outcome)
    }

    fn spill_encode(&self) -> Option<Vec<u8>> {
        encode_record(&JobRecord::Explore {
            id: self.id,
            resource: self.resource.clone(),
            options: self.options.clone(),
        })
    }
}

impl Forwarder for ResourceExplorationJob {
    fn forward(&self, payload: serde_json::Value) -> Box<dyn Job> {
        let resource = payload
            .get("resource")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();
        let options = payload
            .get("options")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        Box::new(Self {
            id: self.id,
            resource,
            options,
        })
    }
}

/// Taint-trace job: loads `resource` and fires a probe event meant to flag
/// tainted data flowing into the DOM, reporting whatever the browser saw.
pub struct TaintTraceJob {
    id: JobId,
    resource: String,
    options: serde_json::Value,
}

impl TaintTraceJob {
    /// Builds a fresh root taint-trace job for `resource`.
    pub fn new_root(resource: impl Into<String>, options: serde_json::Value) -> Self {
        Self {
            id: JobId::new_root(),
            resource: resource.into(),
            options,
        }
    }
}

impl Job for TaintTraceJob {
    fn id(&self) -> JobId {
        self.id
    }

    fn execute(
        &self,
        browser: &dyn Browser,
        handle: &ClusterHandle,
    ) -> Result<JobOutcome, JobError> {
        let status = browser.load(&self.resource)?;
        handle.push_to_sitemap(self.resource.clone(), status);
        // The namespace token keeps whatever probe state this trace installs
        // in the page from colliding with a concurrent audit's.
        let probe_marker = format!("__audit_{}", handle.js_token());
        let page = browser.to_page();
        let mut outcome = JobOutcome::single(JobResult::new(
            self.id,
            serde_json::json!({
                "resource": self.resource,
                "page_url": page.url,
                "probe_marker": probe_marker,
            }),
        ));
        if let Some(follow) = self.options.get("follow").and_then(serde_json::Value::as_array) {
            for resource in follow.iter().filter_map(serde_json::Value::as_str) {
                outcome
                    .children
                    .push(self.forward(serde_json::json!({ "resource": resource })));
            }
        }
        Ok(outcome)
    }

    fn spill_encode(&self) -> Option<Vec<u8>> {
        encode_record(&JobRecord::TraceTaint {
            id: self.id,
            resource: self.resource.clone(),
            options: self.options.clone(),
        })
    }
}

impl Forwarder for TaintTraceJob {
    fn forward(&self, payload: serde_json::Value) -> Box<dyn Job> {
        let resource = payload
            .get("resource")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();
        let options = payload
            .get("options")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        Box::new(Self {
            id: self.id,
            resource,
            options,
        })
    }
}

/// A generic job whose body is a boxed closure.
///
/// This is the seam through which `Cluster::explore`/`Cluster::trace_taint`
/// and the test suite inject behavior without the scheduler depending on any
/// concrete DOM-exploration implementation.
pub struct FnJob<F>
where
    F: Fn(&dyn Browser, &ClusterHandle) -> Result<JobOutcome, JobError> + Send + Sync,
{
    id: JobId,
    body: F,
}

impl<F> FnJob<F>
where
    F: Fn(&dyn Browser, &ClusterHandle) -> Result<JobOutcome, JobError> + Send + Sync,
{
    /// Wraps `body` as a fresh root job with a newly allocated id.
    pub fn new_root(body: F) -> Self {
        Self {
            id: JobId::new_root(),
            body,
        }
    }

    /// Wraps `body` as a child job sharing `parent_id`.
    pub fn new_child(parent_id: JobId, body: F) -> Self {
        Self {
            id: parent_id,
            body,
        }
    }
}

impl<F> Job for FnJob<F>
where
    F: Fn(&dyn Browser, &ClusterHandle) -> Result<JobOutcome, JobError> + Send + Sync,
{
    fn id(&self) -> JobId {
        self.id
    }

    fn execute(
        &self,
        browser: &dyn Browser,
        handle: &ClusterHandle,
    ) -> Result<JobOutcome, JobError> {
        (self.body)(browser, handle)
    }
}

/// A forwarder lets a job spawn children that reuse its `JobId` without
/// exposing the job's full internal state to callers.
///
/// Source jobs capture a per-job callback closure at queue-time; because jobs
/// may be serialized to the on-disk queue, that closure cannot travel with
/// them. `Forwarder` only carries the data needed to build a sibling job; the
/// callback itself always lives in the accounting side-table, keyed by id.
pub trait Forwarder: Send {
    /// Produces a child job sharing the forwarder's job id.
    fn forward(&self, payload: serde_json::Value) -> Box<dyn Job>;
}

/// A distinguished job whose sole effect is handing its assigned worker's
/// browser to the registered callback.
///
/// `BrowserProvider` is the job kind behind [`crate::cluster::Cluster::with_browser`].
/// It is never-ending-*capable* (the accounting model will not remove its
/// callback or skip set on completion if `never_ending` is set), though
/// `with_browser` itself queues exactly one instance per call.
pub struct BrowserProviderJob {
    id: JobId,
    never_ending: bool,
}

impl BrowserProviderJob {
    /// A single-shot provider job with a fresh id.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: JobId::new_root(),
            never_ending: false,
        }
    }

    /// A provider job whose accounting treats it as never-ending: its
    /// callback and skip set are retained across repeated `queue` calls for
    /// the same id.
    #[must_use]
    pub fn new_never_ending() -> Self {
        Self {
            id: JobId::new_root(),
            never_ending: true,
        }
    }

    /// Reuses an existing never-ending provider's id for another submission.
    #[must_use]
    pub fn resubmit(id: JobId) -> Self {
        Self {
            id,
            never_ending: true,
        }
    }
}

impl Default for BrowserProviderJob {
    fn default() -> Self {
        Self::new()
    }
}

impl Job for BrowserProviderJob {
    fn id(&self) -> JobId {
        self.id
    }

    fn never_ending(&self) -> bool {
        self.never_ending
    }

    fn execute(
        &self,
        browser: &dyn Browser,
        handle: &ClusterHandle,
    ) -> Result<JobOutcome, JobError> {
        handle.handle_browser_callback(self.id, browser);
        Ok(JobOutcome::empty())
    }

    fn spill_encode(&self) -> Option<Vec<u8>> {
        encode_record(&JobRecord::BrowserProvider {
            id: self.id,
            never_ending: self.never_ending,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_explore_resource(job: &dyn Job) -> String {
        let bytes = job.spill_encode().expect("explore jobs support spilling");
        let (record, _): (JobRecord, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard()).unwrap();
        match record {
            JobRecord::Explore { resource, .. } => resource,
            other => panic!("expected an Explore record, got {other:?}"),
        }
    }

    #[test]
    fn resource_exploration_forwarder_shares_the_parent_id() {
        let parent = ResourceExplorationJob::new_root("https://example.com", serde_json::json!({}));
        let parent_id = parent.id();

        let child = parent.forward(serde_json::json!({ "resource": "https://example.com/child" }));

        assert_eq!(child.id(), parent_id);
        assert_eq!(decode_explore_resource(child.as_ref()), "https://example.com/child");
    }

    #[test]
    fn taint_trace_forwarder_shares_the_parent_id() {
        let parent = TaintTraceJob::new_root("https://example.com", serde_json::json!({}));
        let parent_id = parent.id();

        let child = parent.forward(serde_json::json!({ "resource": "https://example.com/child" }));

        assert_eq!(child.id(), parent_id);
        let bytes = child.spill_encode().expect("taint-trace jobs support spilling");
        let (record, _): (JobRecord, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard()).unwrap();
        match record {
            JobRecord::TraceTaint { resource, .. } => {
                assert_eq!(resource, "https://example.com/child");
            }
            other => panic!("expected a TraceTaint record, got {other:?}"),
        }
    }
}
