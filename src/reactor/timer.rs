use crate::event::Inner;

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::rc::Rc;
use std::time::Instant;

/// An entry in the reactor timer queue.
///
/// `TimerEntry` represents one scheduled timeout dispatch for a
/// descriptor, stored inside a `BinaryHeap` ordered by deadline.
///
/// The entry holds a strong reference to the descriptor so a timed
/// registration stays alive even after the caller drops every handle;
/// the registration owns the descriptor until it fires or is deleted.
/// Cancellation happens through the shared flag rather than by heap
/// surgery: a cancelled entry is simply skipped when popped.
pub(crate) struct TimerEntry {
    /// The time at which the timeout should fire.
    pub(crate) deadline: Instant,

    /// Descriptor to dispatch when the deadline is reached.
    pub(crate) event: Rc<RefCell<Inner>>,

    /// Cancellation flag shared with the descriptor's timer state.
    pub(crate) cancelled: Rc<Cell<bool>>,
}

impl Eq for TimerEntry {}

impl PartialEq for TimerEntry {
    /// Two timer entries are equal if their deadlines are equal.
    fn eq(&self, other: &Self) -> bool {
        self.deadline.eq(&other.deadline)
    }
}

impl Ord for TimerEntry {
    /// Orders timer entries by deadline.
    ///
    /// Note that the comparison is **reversed** so that a
    /// `BinaryHeap<TimerEntry>` behaves as a min-heap,
    /// where the earliest deadline is popped first.
    fn cmp(&self, other: &Self) -> Ordering {
        other.deadline.cmp(&self.deadline)
    }
}

impl PartialOrd for TimerEntry {
    /// Partial ordering consistent with [`Ord`].
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
