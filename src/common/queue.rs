//! Block-paged FIFO queue (spec §4.1).
//!
//! A linked list of fixed-capacity pages sized so one page occupies roughly
//! 4 KiB. Head and tail indices live in the queue header; a page is
//! allocated on push when the tail page is full or missing, and retired on
//! pop when the head page empties. Push and pop are both amortised O(1).
//! Freeing the queue (dropping it) releases every page; no entry
//! destructors beyond Rust's own `Drop` are invoked specially — that part
//! of the C original's contract ("no entry destructors are invoked") only
//! mattered because `kefir_queue_entry_t` stored raw words; here `T` drops
//! normally, which is the idiomatic equivalent.

use std::collections::VecDeque;

/// Page size chosen so a page of `u64`-sized entries occupies ~4 KiB.
const PAGE_CAPACITY: usize = 512;

struct Page<T> {
    items: VecDeque<T>,
}

impl<T> Page<T> {
    fn new() -> Self {
        Self { items: VecDeque::with_capacity(PAGE_CAPACITY) }
    }

    fn is_full(&self) -> bool {
        self.items.len() >= PAGE_CAPACITY
    }
}

/// A FIFO queue of opaque entries built on a linked list of pages.
pub struct Queue<T> {
    pages: VecDeque<Page<T>>,
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Queue<T> {
    pub fn new() -> Self {
        Self { pages: VecDeque::new() }
    }

    /// Amortised O(1). Allocates a new tail page when the current one is
    /// full or missing.
    pub fn push(&mut self, value: T) {
        if self.pages.back().map_or(true, |p| p.is_full()) {
            self.pages.push_back(Page::new());
        }
        self.pages.back_mut().unwrap().items.push_back(value);
    }

    /// Amortised O(1). Retires the head page once it empties.
    pub fn pop_first(&mut self) -> Option<T> {
        loop {
            let front = self.pages.front_mut()?;
            if let Some(value) = front.items.pop_front() {
                return Some(value);
            }
            // Head page exhausted: retire it.
            self.pages.pop_front();
            if self.pages.is_empty() {
                return None;
            }
        }
    }

    /// True iff no successful `pop_first` would succeed.
    pub fn is_empty(&self) -> bool {
        self.pages.iter().all(|p| p.items.is_empty())
    }

    pub fn len(&self) -> usize {
        self.pages.iter().map(|p| p.items.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_preserved_across_many_pages() {
        let mut q: Queue<i32> = Queue::new();
        for v in 0..(PAGE_CAPACITY as i32 * 3) {
            q.push(v);
        }
        for v in 0..(PAGE_CAPACITY as i32 * 3) {
            assert_eq!(q.pop_first(), Some(v));
        }
        assert_eq!(q.pop_first(), None);
        assert!(q.is_empty());
    }

    #[test]
    fn scenario_push_pop_interleaved() {
        // spec §8 concrete scenario 5: push [1,2,3,4,5]; pop four times
        // yields 1,2,3,4; push 6; pop until empty yields 5,6.
        let mut q: Queue<i32> = Queue::new();
        for v in [1, 2, 3, 4, 5] {
            q.push(v);
        }
        for expected in [1, 2, 3, 4] {
            assert_eq!(q.pop_first(), Some(expected));
        }
        q.push(6);
        assert_eq!(q.pop_first(), Some(5));
        assert_eq!(q.pop_first(), Some(6));
        assert!(q.is_empty());
        assert_eq!(q.pop_first(), None);
    }

    #[test]
    fn empty_queue_is_empty() {
        let q: Queue<u64> = Queue::new();
        assert!(q.is_empty());
    }

    #[derive(Debug, Clone, Copy)]
    enum Op {
        Push(i32),
        Pop,
    }

    fn op_strategy() -> impl proptest::strategy::Strategy<Value = Op> {
        use proptest::prelude::*;
        prop_oneof![any::<i32>().prop_map(Op::Push), Just(Op::Pop)]
    }

    proptest::proptest! {
        /// spec §8 invariant: for any interleaving of pushes and pops, the
        /// queue yields exactly the pushed values in order, and after N
        /// pushes and N pops (pop stopping only on an empty queue) the queue
        /// is empty.
        #[test]
        fn fifo_order_holds_for_any_push_pop_interleaving(
            ops in proptest::collection::vec(op_strategy(), 0..200)
        ) {
            let mut q: Queue<i32> = Queue::new();
            let mut model: std::collections::VecDeque<i32> = std::collections::VecDeque::new();
            for op in ops {
                match op {
                    Op::Push(v) => {
                        q.push(v);
                        model.push_back(v);
                    }
                    Op::Pop => {
                        assert_eq!(q.pop_first(), model.pop_front());
                    }
                }
            }
            while let Some(expected) = model.pop_front() {
                assert_eq!(q.pop_first(), Some(expected));
            }
            assert_eq!(q.pop_first(), None);
            assert!(q.is_empty());
        }
    }
}
