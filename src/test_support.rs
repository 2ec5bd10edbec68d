//! In-process fake [`Browser`] for tests and documentation examples, gated
//! behind the `test-internals` feature the way the rest of the crate's
//! fakes are.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::browser::{Browser, ElementHandle, Page, StatusCode};
use crate::error::JobError;

/// Shared counters a [`FakeBrowser`] reports into, so a test can observe how
/// many loads/events/shutdowns happened across every browser a factory built.
#[derive(Default)]
pub struct FakeBrowserStats {
    /// Total pages loaded across every `FakeBrowser` sharing this instance.
    pub loads: AtomicUsize,
    /// Total events fired across every `FakeBrowser` sharing this instance.
    pub events: AtomicUsize,
    /// Total `shutdown` calls across every `FakeBrowser` sharing this instance.
    pub shutdowns: AtomicUsize,
}

/// A browser that never touches a network: `load` always reports the status
/// configured at construction (default 200) and remembers the last URL it
/// loaded, for assertions.
pub struct FakeBrowser {
    stats: Arc<FakeBrowserStats>,
    status: StatusCode,
    current: Mutex<Option<String>>,
}

impl FakeBrowser {
    /// Builds a browser reporting `status` for every `load`, sharing
    /// `stats` with every other browser the same factory produces.
    #[must_use]
    pub fn new(stats: Arc<FakeBrowserStats>, status: StatusCode) -> Self {
        Self {
            stats,
            status,
            current: Mutex::new(None),
        }
    }

    /// Convenience factory closure builder: `pool_size` browsers all
    /// reporting `status` and sharing one `FakeBrowserStats`.
    #[must_use]
    pub fn factory(
        stats: Arc<FakeBrowserStats>,
        status: StatusCode,
    ) -> crate::worker::BrowserFactory {
        Arc::new(move || -> Box<dyn Browser> { Box::new(Self::new(Arc::clone(&stats), status)) })
    }
}

impl Browser for FakeBrowser {
    fn load(&self, url: &str) -> Result<StatusCode, JobError> {
        self.stats.loads.fetch_add(1, Ordering::SeqCst);
        *self.current.lock() = Some(url.to_string());
        Ok(self.status)
    }

    fn fire_event(
        &self,
        _element: &ElementHandle,
        _event: &str,
        _value: Option<&str>,
    ) -> Result<(), JobError> {
        self.stats.events.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn to_page(&self) -> Page {
        let url = self.current.lock().clone().unwrap_or_default();
        Page {
            url,
            status: self.status,
        }
    }

    fn shutdown(&self) {
        self.stats.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_then_to_page_reports_last_url() {
        let stats = Arc::new(FakeBrowserStats::default());
        let browser = FakeBrowser::new(stats, 200);
        browser.load("https://example.com/a").unwrap();
        let page = browser.to_page();
        assert_eq!(page.url, "https://example.com/a");
        assert_eq!(page.status, 200);
    }

    #[test]
    fn shutdown_increments_shared_counter() {
        let stats = Arc::new(FakeBrowserStats::default());
        let browser = FakeBrowser::new(Arc::clone(&stats), 200);
        browser.shutdown();
        browser.shutdown();
        assert_eq!(stats.shutdowns.load(Ordering::SeqCst), 2);
    }
}
