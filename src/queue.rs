//! A bounded-memory FIFO feeding the worker pool: items above a configured
//! resident threshold are written to disk and lazily re-materialized on pop.
//!
//! The in-memory part is a `VecDeque`. Once it holds `spill_threshold` items,
//! further pushes are serialized (see [`crate::job::Job::spill_encode`]) into
//! individually named files under a `tempfile::TempDir` instead of being kept
//! resident; `pop` re-materializes the oldest spilled item transparently.
//! `clear` empties memory and drops the `TempDir`, which removes the
//! directory and every file in it.
//!
//! Job kinds whose bodies are closures (see [`crate::job::FnJob`]) cannot be
//! serialized and so are never spilled; they simply stay resident, which is
//! acceptable for the test/facade escape hatch they exist for.

use std::collections::VecDeque;
use std::fs;

use parking_lot::{Condvar, Mutex};
use tempfile::TempDir;

use crate::job::{Job, decode_spilled};

/// Persistent FIFO job queue.
///
/// `push`/`pop`/`clear` are thread-safe. Pops block until an item is
/// available and return items in submission order for a single producer;
/// order across multiple producers is unspecified, but every pushed item is
/// popped exactly once.
pub struct PersistentQueue {
    state: Mutex<QueueState>,
    not_empty: Condvar,
    spill_threshold: usize,
}

enum Resident {
    Live(Box<dyn Job>),
    /// A job that was spilled to disk, identified by its sequence number.
    Spilled(u64),
}

struct QueueState {
    items: VecDeque<Resident>,
    resident_count: usize,
    spill_dir: Option<TempDir>,
    next_seq: u64,
}

impl PersistentQueue {
    /// Creates a queue that spills to disk once `spill_threshold` items are
    /// resident in memory at once.
    pub fn new(spill_threshold: usize) -> std::io::Result<Self> {
        Ok(Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                resident_count: 0,
                spill_dir: Some(TempDir::new()?),
                next_seq: 0,
            }),
            not_empty: Condvar::new(),
            spill_threshold,
        })
    }

    /// Appends `job`. Never blocks, never drops. Wakes one blocked `pop`.
    pub fn push(&self, job: Box<dyn Job>) {
        let mut state = self.state.lock();
        let entry = if state.resident_count < self.spill_threshold {
            state.resident_count += 1;
            Resident::Live(job)
        } else {
            match job.spill_encode() {
                Some(bytes) => {
                    let seq = state.next_seq;
                    state.next_seq += 1;
                    let path = spill_path(state.spill_dir.as_ref(), seq);
                    fs::write(&path, bytes).expect("failed to write spilled job record");
                    Resident::Spilled(seq)
                }
                None => {
                    // This job kind cannot be serialized; keep it resident
                    // rather than drop it (push must never drop an item).
                    state.resident_count += 1;
                    Resident::Live(job)
                }
            }
        };
        state.items.push_back(entry);
        self.not_empty.notify_one();
    }

    /// Blocks until a job is available, then returns it in submission order.
    pub fn pop(&self) -> Box<dyn Job> {
        let mut state = self.state.lock();
        loop {
            if let Some(job) = Self::take_front(&mut state) {
                return job;
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Like [`Self::pop`], but re-checks `stop` each time the wait would
    /// otherwise block again, returning `None` once it flips. Used by worker
    /// threads so `wake_all` during shutdown actually lets them exit instead
    /// of looping back into an empty wait.
    pub fn pop_unless(&self, stop: &std::sync::atomic::AtomicBool) -> Option<Box<dyn Job>> {
        let mut state = self.state.lock();
        loop {
            if let Some(job) = Self::take_front(&mut state) {
                return Some(job);
            }
            if stop.load(std::sync::atomic::Ordering::SeqCst) {
                return None;
            }
            self.not_empty.wait(&mut state);
        }
    }

    fn take_front(state: &mut QueueState) -> Option<Box<dyn Job>> {
        let entry = state.items.pop_front()?;
        Some(match entry {
            Resident::Live(job) => {
                state.resident_count -= 1;
                job
            }
            Resident::Spilled(seq) => {
                let path = spill_path(state.spill_dir.as_ref(), seq);
                let bytes = fs::read(&path).expect("spilled job record vanished from disk");
                fs::remove_file(&path).ok();
                decode_spilled(&bytes)
            }
        })
    }

    /// Wakes every thread blocked in `pop` without returning an item, used by
    /// shutdown so worker threads parked on an empty queue can observe the
    /// shutdown flag and exit.
    pub fn wake_all(&self) {
        self.not_empty.notify_all();
    }

    /// Discards all in-memory items and their on-disk backing files. Safe to
    /// call during shutdown; idempotent.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.items.clear();
        state.resident_count = 0;
        // Dropping the TempDir removes the directory and everything in it;
        // a fresh one is created immediately so the queue remains usable.
        state.spill_dir = None;
        if let Ok(dir) = TempDir::new() {
            state.spill_dir = Some(dir);
        }
        state.next_seq = 0;
    }

    /// Approximate total item count (resident + spilled). Diagnostics/tests only.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Whether the queue currently holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn spill_path(dir: Option<&TempDir>, seq: u64) -> std::path::PathBuf {
    dir.expect("spill directory missing")
        .path()
        .join(format!("job-{seq:020}.bin"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{BrowserProviderJob, JobId};

    fn tagged(id: u64) -> Box<dyn Job> {
        Box::new(BrowserProviderJob::resubmit(JobId::new_for_test(id)))
    }

    #[test]
    fn fifo_order_without_spill() {
        let q = PersistentQueue::new(64).unwrap();
        q.push(tagged(1));
        q.push(tagged(2));
        q.push(tagged(3));
        assert_eq!(q.pop().id(), JobId::new_for_test(1));
        assert_eq!(q.pop().id(), JobId::new_for_test(2));
        assert_eq!(q.pop().id(), JobId::new_for_test(3));
    }

    #[test]
    fn fifo_order_with_spill() {
        let q = PersistentQueue::new(2).unwrap();
        for i in 0..10 {
            q.push(tagged(i));
        }
        assert_eq!(q.len(), 10);
        for i in 0..10 {
            assert_eq!(q.pop().id(), JobId::new_for_test(i));
        }
        assert!(q.is_empty());
    }

    #[test]
    fn clear_discards_resident_and_spilled_items() {
        let q = PersistentQueue::new(1).unwrap();
        q.push(tagged(1));
        q.push(tagged(2));
        q.push(tagged(3));
        q.clear();
        assert!(q.is_empty());
        // Queue remains usable after clear.
        q.push(tagged(42));
        assert_eq!(q.pop().id(), JobId::new_for_test(42));
    }

    #[test]
    fn pop_blocks_until_pushed() {
        use std::sync::Arc;
        use std::thread;
        use std::time::Duration;

        let q = Arc::new(PersistentQueue::new(64).unwrap());
        let q2 = q.clone();
        let handle = thread::spawn(move || q2.pop().id());
        thread::sleep(Duration::from_millis(50));
        q.push(tagged(7));
        let got = handle.join().unwrap();
        assert_eq!(got, JobId::new_for_test(7));
    }
}
