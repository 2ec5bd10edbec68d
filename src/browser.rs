//! The `Browser` collaborator interface.
//!
//! The browser driver itself (DOM inspection, JS evaluation, HTTP
//! interception) is out of scope for this crate: it is treated as an opaque
//! capability that workers drive through this trait. Concrete job bodies
//! consult only these methods; they never peek into driver internals.

use crate::error::JobError;

/// An HTTP status code observed while loading a page.
pub type StatusCode = u16;

/// A minimal, opaque handle to an element located in the DOM.
///
/// The scheduler never inspects this beyond passing it back to
/// [`Browser::fire_event`]; concrete locators are a job-body concern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle(pub String);

/// An opaque snapshot of the currently loaded page.
#[derive(Debug, Clone)]
pub struct Page {
    /// The URL the page was loaded from.
    pub url: String,
    /// The status code returned for that URL.
    pub status: StatusCode,
}

/// Capability a worker uses to drive one headless browser instance.
///
/// Each `Browser` is owned by exactly one worker for its entire lifetime and
/// mutated only by that worker; workers never share browsers.
pub trait Browser: Send {
    /// Navigates to `url`, returning the HTTP status observed.
    fn load(&self, url: &str) -> Result<StatusCode, JobError>;

    /// Fires a DOM event (`click`, `change`, ...) on `element`, optionally
    /// carrying `value` (e.g. for form inputs).
    fn fire_event(
        &self,
        element: &ElementHandle,
        event: &str,
        value: Option<&str>,
    ) -> Result<(), JobError>;

    /// Returns a snapshot of the currently loaded page.
    fn to_page(&self) -> Page;

    /// Terminates the underlying browser process. Called by the worker on
    /// recycle and on shutdown; never called concurrently with any other
    /// method on the same instance.
    fn shutdown(&self);
}
