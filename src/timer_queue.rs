use std::cell::{Cell, RefCell};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use rquickjs::Ctx;

use crate::promise::ScriptPromise;

struct Entry {
    deadline: Instant,
    seq: u64,
    promise: ScriptPromise,
}

// Ordering considers the deadline only, with the insertion sequence breaking
// ties so same-deadline waits resolve in issue order.
impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Pending time-dependent promises, resolved once per frame.
///
/// `wait()` inserts an entry keyed by absolute deadline; the per-frame
/// resolution pass settles every overdue entry in non-decreasing deadline
/// order. A late frame resolves its whole backlog in one pass without
/// reordering anything.
#[derive(Default)]
pub struct TimerQueue {
    entries: RefCell<BinaryHeap<Reverse<Entry>>>,
    next_seq: Cell<u64>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `promise` for resolution `delay` from now.
    pub fn add(&self, promise: ScriptPromise, delay: Duration) {
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);

        self.entries.borrow_mut().push(Reverse(Entry {
            deadline: Instant::now() + delay,
            seq,
            promise,
        }));
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Resolves every entry whose deadline has passed. Returns the number of
    /// promises settled.
    pub fn resolve_due<'js>(&self, ctx: &Ctx<'js>, now: Instant) -> usize {
        // Snapshot the due entries before touching the engine: a resolution
        // job may call wait() again, which would otherwise re-enter the heap.
        let mut due = Vec::new();
        {
            let mut entries = self.entries.borrow_mut();
            loop {
                let overdue = matches!(entries.peek(), Some(Reverse(entry)) if entry.deadline <= now);
                if !overdue {
                    break;
                }
                let Reverse(entry) = entries.pop().expect("checked entry");
                due.push(entry);
            }
        }

        let count = due.len();
        for entry in due {
            if let Err(err) = entry.promise.resolve_undefined(ctx) {
                tracing::error!(target: "pawnhost", error = %err, "failed to resolve a timer promise");
            }
        }

        count
    }

    /// Drops every pending entry. Shutdown only; the promises never settle.
    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }
}
