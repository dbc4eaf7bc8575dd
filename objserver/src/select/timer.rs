use std::cell::Cell;
use std::cmp::Ordering;
use std::rc::Rc;
use std::time::Instant;

/// An entry in the select loop timeout queue.
///
/// `TimeoutEntry` represents a callback scheduled at a specific deadline.
/// It is stored inside a binary heap ordered by deadline, and may be
/// cancelled through its [`TimeoutUser`] before it fires.
pub(crate) struct TimeoutEntry {
    /// The time at which the callback should run.
    pub(crate) deadline: Instant,

    /// Insertion sequence, so equal deadlines fire in submission order.
    pub(crate) seq: u64,

    /// Callback to run when the deadline is reached.
    pub(crate) callback: Box<dyn FnOnce()>,

    /// Cancellation flag shared with the owning [`TimeoutUser`].
    pub(crate) cancelled: Rc<Cell<bool>>,
}

impl Eq for TimeoutEntry {}

impl PartialEq for TimeoutEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Ord for TimeoutEntry {
    /// Orders entries by deadline, then by submission order.
    ///
    /// The comparison is **reversed** so that a `BinaryHeap<TimeoutEntry>`
    /// behaves as a min-heap, where the earliest deadline is popped first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimeoutEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Handle to a scheduled timeout.
///
/// Dropping the handle does **not** cancel the timeout; call
/// [`cancel`](Self::cancel) for that.
#[derive(Debug, Clone)]
pub struct TimeoutUser {
    deadline: Instant,
    cancelled: Rc<Cell<bool>>,
}

impl TimeoutUser {
    pub(crate) fn new(deadline: Instant, cancelled: Rc<Cell<bool>>) -> Self {
        Self {
            deadline,
            cancelled,
        }
    }

    /// The deadline this timeout was scheduled for.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Cancels the timeout. Cancelling a fired timeout does nothing.
    pub fn cancel(&self) {
        self.cancelled.set(true);
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }
}
