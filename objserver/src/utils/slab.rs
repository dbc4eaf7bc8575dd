use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::mem::MaybeUninit;

/// A slot allocator with index reuse.
///
/// A `Slab` stores values of type `T` in a contiguous array and returns
/// stable indices. Released indices are reused lowest first, which keeps
/// poll table slots and handle values small and dense.
///
/// Internally, it keeps track of:
/// - initialized slots,
/// - free indices,
/// - and uninitialized memory using [`MaybeUninit`].
///
/// Unlike a plain vector, lookups are checked: asking for a released or
/// never-allocated index yields `None` instead of touching uninitialized
/// memory.
pub(crate) struct Slab<T> {
    /// Storage for items (may contain uninitialized slots).
    items: Vec<MaybeUninit<T>>,
    /// Min-heap of free indices that can be reused.
    free: BinaryHeap<Reverse<usize>>,
    /// Marks whether a slot is currently initialized.
    used: Vec<bool>,
    /// Number of initialized slots.
    len: usize,
}

impl<T> Slab<T> {
    /// Creates a new `Slab` with a fixed initial capacity.
    ///
    /// All slots are initially free and uninitialized. Free slots are
    /// handed out lowest index first.
    pub(crate) fn new(size: usize) -> Self {
        let items = (0..size).map(|_| MaybeUninit::<T>::uninit()).collect();
        let free = (0..size).map(Reverse).collect();
        let used = vec![false; size];

        Self {
            items,
            free,
            used,
            len: 0,
        }
    }

    /// Number of occupied slots.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Inserts a value into the slab and returns its index.
    ///
    /// If a free slot is available, it is reused.
    /// Otherwise, the slab grows exponentially.
    pub(crate) fn insert(&mut self, item: T) -> usize {
        let index = if let Some(Reverse(i)) = self.free.pop() {
            i
        } else {
            let len = self.items.len();
            let new_len = if len == 0 { 1 } else { 2 * len };

            self.items
                .extend((len..new_len).map(|_| MaybeUninit::<T>::uninit()));
            self.free.extend(((len + 1)..new_len).map(Reverse));
            self.used.extend((len..new_len).map(|_| false));

            len
        };

        self.items[index] = MaybeUninit::new(item);
        self.used[index] = true;
        self.len += 1;

        index
    }

    /// Removes and returns the value stored at `index`.
    ///
    /// The slot becomes free and may be reused by future insertions.
    /// Returns `None` if the slot is not in use.
    pub(crate) fn remove(&mut self, index: usize) -> Option<T> {
        if !self.is_used(index) {
            return None;
        }

        self.free.push(Reverse(index));
        self.used[index] = false;
        self.len -= 1;

        // SAFETY: `used[index]` was set, so the slot holds an initialized
        // value, and clearing the flag above prevents a second read.
        let item = unsafe { self.items[index].assume_init_read() };
        self.items[index] = MaybeUninit::uninit();

        Some(item)
    }

    /// Returns a reference to the value at `index`, if the slot is in use.
    pub(crate) fn get(&self, index: usize) -> Option<&T> {
        if !self.is_used(index) {
            return None;
        }

        // SAFETY: the slot is marked used, hence initialized.
        Some(unsafe { self.items[index].assume_init_ref() })
    }

    /// Returns a mutable reference to the value at `index`, if the slot is
    /// in use.
    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        if !self.is_used(index) {
            return None;
        }

        // SAFETY: the slot is marked used, hence initialized.
        Some(unsafe { self.items[index].assume_init_mut() })
    }

    /// Iterates over all occupied slots in index order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.items
            .iter()
            .zip(self.used.iter())
            .enumerate()
            .filter(|(_, (_, used))| **used)
            // SAFETY: filtered on the used flag.
            .map(|(index, (slot, _))| (index, unsafe { slot.assume_init_ref() }))
    }

    fn is_used(&self, index: usize) -> bool {
        self.used.get(index).copied().unwrap_or(false)
    }
}

impl<T> Drop for Slab<T> {
    /// Drops all initialized elements stored in the slab.
    ///
    /// Uninitialized slots are ignored.
    fn drop(&mut self) {
        for (slot, &used) in self.items.iter_mut().zip(self.used.iter()) {
            if used {
                unsafe {
                    slot.assume_init_drop();
                }
            }
        }
    }
}
