//! Per-job set of already-performed action fingerprints, consulted by all
//! workers before they repeat a DOM action.
//!
//! A fingerprint is an opaque string-typed action identifier supplied by
//! workers (e.g. `"click#btn"`). Entries are stored in a [`DetHashSet`] so
//! that fingerprints computed in different worker threads collide correctly
//! regardless of which thread's hasher state produced them.

use std::collections::HashMap;

use crate::job::JobId;
use crate::util::DetHashSet;

/// Registry of per-job skip sets.
///
/// Owned exclusively by the supervisor; all operations run under the
/// supervisor lock (see [`crate::cluster::ClusterInner`]).
#[derive(Debug, Default)]
pub struct SkipRegistry {
    sets: HashMap<JobId, DetHashSet<String>>,
}

impl SkipRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `action` has already been performed for `job_id`. Missing
    /// entries (no skip set created yet) report `false`.
    #[must_use]
    pub fn contains(&self, job_id: JobId, action: &str) -> bool {
        self.sets
            .get(&job_id)
            .is_some_and(|set| set.contains(action))
    }

    /// Records that `action` has been performed for `job_id`. The skip set
    /// is created lazily on first use. Returns `true` if this is the first
    /// time `action` has been recorded (i.e. the caller is the one that
    /// should proceed with the action).
    pub fn insert(&mut self, job_id: JobId, action: impl Into<String>) -> bool {
        self.sets.entry(job_id).or_default().insert(action.into())
    }

    /// Unions `actions` into `job_id`'s skip set.
    pub fn merge(&mut self, job_id: JobId, actions: impl IntoIterator<Item = String>) {
        let set = self.sets.entry(job_id).or_default();
        set.extend(actions);
    }

    /// Frees the skip set owned by `job_id`. Called by accounting's
    /// `job_done` for jobs that are not never-ending.
    pub fn clear(&mut self, job_id: JobId) {
        self.sets.remove(&job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_entries_yield_false() {
        let registry = SkipRegistry::new();
        assert!(!registry.contains(JobId::new_for_test(1), "click#btn"));
    }

    #[test]
    fn exactly_one_of_two_racing_inserts_wins() {
        let mut registry = SkipRegistry::new();
        let id = JobId::new_for_test(1);
        let first = registry.insert(id, "click#btn");
        let second = registry.insert(id, "click#btn");
        assert!(first);
        assert!(!second);
        assert!(registry.contains(id, "click#btn"));
    }

    #[test]
    fn clear_drops_the_set() {
        let mut registry = SkipRegistry::new();
        let id = JobId::new_for_test(1);
        registry.insert(id, "click#btn");
        registry.clear(id);
        assert!(!registry.contains(id, "click#btn"));
    }
}
