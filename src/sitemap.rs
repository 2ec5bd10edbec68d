//! Process-wide URL → status code map populated by workers as they load
//! pages.
//!
//! Order is irrelevant and entries are last-writer-wins: if two workers load
//! the same URL and observe different status codes (a redirect chain, a
//! flaky endpoint), whichever write lands last under the lock is what a
//! snapshot will report.

use std::collections::HashMap;

use crate::browser::StatusCode;

/// The cluster's sitemap. Owned exclusively by the supervisor; workers only
/// ever append through [`crate::cluster::ClusterHandle::push_to_sitemap`].
#[derive(Debug, Default)]
pub struct Sitemap {
    entries: HashMap<String, StatusCode>,
}

impl Sitemap {
    /// An empty sitemap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `url` was loaded and returned `status`, overwriting any
    /// prior entry for the same URL.
    pub fn record(&mut self, url: String, status: StatusCode) {
        self.entries.insert(url, status);
    }

    /// A point-in-time snapshot of the sitemap.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, StatusCode> {
        self.entries.clone()
    }

    /// Number of distinct URLs recorded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no URLs have been recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_write_wins() {
        let mut sitemap = Sitemap::new();
        sitemap.record("http://example.test/".to_string(), 200);
        sitemap.record("http://example.test/".to_string(), 404);
        assert_eq!(sitemap.snapshot()["http://example.test/"], 404);
    }

    #[test]
    fn empty_by_default() {
        let sitemap = Sitemap::new();
        assert!(sitemap.is_empty());
        assert_eq!(sitemap.len(), 0);
    }
}
