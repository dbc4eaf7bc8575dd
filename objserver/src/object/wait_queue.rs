use std::task::Waker;

/// Identifies one waiter in an object's wait queue.
///
/// Returned by [`Object::add_queue`](crate::Object::add_queue) and handed
/// back to [`Object::remove_queue`](crate::Object::remove_queue).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WaitKey(u64);

/// The waiters attached to one object.
///
/// Entries are not owned by the object in any meaningful sense: the waker
/// belongs to whoever is waiting and is only parked here until the object
/// wakes it or the waiter removes itself.
#[derive(Default)]
pub(crate) struct WaitQueue {
    entries: Vec<(WaitKey, Waker)>,
    next_key: u64,
}

impl WaitQueue {
    pub(crate) fn push(&mut self, waker: Waker) -> WaitKey {
        let key = WaitKey(self.next_key);
        self.next_key += 1;
        self.entries.push((key, waker));
        key
    }

    /// Unlinks the waiter registered under `key`.
    ///
    /// Returns `false` if no such waiter is queued.
    pub(crate) fn remove(&mut self, key: WaitKey) -> bool {
        match self.entries.iter().position(|(k, _)| *k == key) {
            Some(pos) => {
                self.entries.swap_remove(pos);
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Clones every queued waker, leaving the queue intact.
    ///
    /// Waiters stay linked until they remove themselves.
    pub(crate) fn wakers(&self) -> Vec<Waker> {
        self.entries.iter().map(|(_, waker)| waker.clone()).collect()
    }
}
