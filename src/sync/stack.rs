//! Intrusive lock-free LIFO stack.

use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};

/// A node type that carries its own link slot.
///
/// # Safety
///
/// `next_slot` must return the same slot for the whole lifetime of the node,
/// and nothing else may touch that slot while the node is enlisted in a stack.
pub unsafe trait Linked: Sized {
    fn next_slot(&self) -> &AtomicPtr<Self>;
}

/// Lock-free LIFO stack over caller-owned nodes.
///
/// Pushing is a CAS loop, popping takes the whole chain with one exchange.
/// Popped chains come back either in LIFO order ([`pop_all`]) or relinked
/// into push order ([`pop_reversed`]).
///
/// [`pop_all`]: AtomicIntrusiveStack::pop_all
/// [`pop_reversed`]: AtomicIntrusiveStack::pop_reversed
pub struct AtomicIntrusiveStack<T: Linked> {
    head: AtomicPtr<T>,
}

unsafe impl<T: Linked + Send> Send for AtomicIntrusiveStack<T> {}
unsafe impl<T: Linked + Send> Sync for AtomicIntrusiveStack<T> {}

impl<T: Linked> AtomicIntrusiveStack<T> {
    pub const fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    pub fn empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }

    /// Push a single node, returns `true` if the stack was empty before.
    ///
    /// # Safety
    ///
    /// `node` must stay valid until it is popped again and its link slot must
    /// not be in use by another container.
    pub unsafe fn push(&self, node: NonNull<T>) -> bool {
        unsafe { self.push_chain(node, node) }
    }

    /// Push a pre-linked run `first ..= last` with a single CAS.
    ///
    /// # Safety
    ///
    /// Same as [`push`](Self::push) for every node of the run, and `last` must
    /// be reachable from `first` through the link slots.
    pub unsafe fn push_chain(&self, first: NonNull<T>, last: NonNull<T>) -> bool {
        let last_slot = unsafe { last.as_ref() }.next_slot();
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            last_slot.store(head, Ordering::Relaxed);
            match self.head.compare_exchange_weak(
                head,
                first.as_ptr(),
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return head.is_null(),
                Err(current) => head = current,
            }
        }
    }

    /// Take every node, most recently pushed first.
    pub fn pop_all(&self) -> Chain<T> {
        Chain::new(self.head.swap(ptr::null_mut(), Ordering::Acquire))
    }

    /// Take every node in push order.
    pub fn pop_reversed(&self) -> Chain<T> {
        let mut current = self.head.swap(ptr::null_mut(), Ordering::Acquire);
        let mut reversed = ptr::null_mut();
        while !current.is_null() {
            // nodes stay valid while enlisted, see `push`
            let slot = unsafe { (*current).next_slot() };
            let next = slot.load(Ordering::Relaxed);
            slot.store(reversed, Ordering::Relaxed);
            reversed = current;
            current = next;
        }
        Chain::new(reversed)
    }
}

impl<T: Linked> Default for AtomicIntrusiveStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A detached run of nodes taken off a stack.
///
/// Iteration reads each node's link before yielding it and clears the slot,
/// so yielded nodes may be freed or pushed again right away.
pub struct Chain<T: Linked> {
    head: *mut T,
    _marker: PhantomData<T>,
}

impl<T: Linked> Chain<T> {
    fn new(head: *mut T) -> Self {
        Self {
            head,
            _marker: PhantomData,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_null()
    }
}

impl<T: Linked> Iterator for Chain<T> {
    type Item = NonNull<T>;

    fn next(&mut self) -> Option<NonNull<T>> {
        let node = NonNull::new(self.head)?;
        let slot = unsafe { node.as_ref() }.next_slot();
        self.head = slot.swap(ptr::null_mut(), Ordering::Relaxed);
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    struct Item {
        value: usize,
        next: AtomicPtr<Item>,
    }

    unsafe impl Linked for Item {
        fn next_slot(&self) -> &AtomicPtr<Self> {
            &self.next
        }
    }

    fn item(value: usize) -> NonNull<Item> {
        NonNull::from(Box::leak(Box::new(Item {
            value,
            next: AtomicPtr::new(ptr::null_mut()),
        })))
    }

    fn release(node: NonNull<Item>) -> usize {
        unsafe { Box::from_raw(node.as_ptr()) }.value
    }

    #[test]
    fn push_and_pop_all_sums_values() {
        let stack = AtomicIntrusiveStack::new();
        assert!(stack.empty());
        assert!(unsafe { stack.push(item(1)) }, "first push sees an empty stack");
        assert!(!unsafe { stack.push(item(2)) });
        assert!(!unsafe { stack.push(item(3)) });
        assert!(!stack.empty());

        let values: Vec<usize> = stack.pop_all().map(release).collect();
        assert_eq!(values, vec![3, 2, 1], "pop_all yields LIFO order");
        assert_eq!(values.iter().sum::<usize>(), 6);
        assert!(stack.empty());
    }

    #[test]
    fn pop_reversed_restores_push_order() {
        let stack = AtomicIntrusiveStack::new();
        for v in 0..10 {
            unsafe { stack.push(item(v)) };
        }
        let values: Vec<usize> = stack.pop_reversed().map(release).collect();
        assert_eq!(values, (0..10).collect::<Vec<_>>());
        assert!(stack.pop_reversed().is_empty());
    }

    #[test]
    fn push_chain_links_a_run_at_once() {
        let stack = AtomicIntrusiveStack::new();
        unsafe { stack.push(item(0)) };

        let first = item(1);
        let last = item(2);
        unsafe { first.as_ref() }
            .next
            .store(last.as_ptr(), Ordering::Relaxed);
        assert!(!unsafe { stack.push_chain(first, last) });

        let values: Vec<usize> = stack.pop_reversed().map(release).collect();
        assert_eq!(values, vec![0, 2, 1]);
    }

    #[test]
    fn concurrent_pushers_lose_nothing() {
        const THREADS: usize = 4;
        const PER_THREAD: usize = 2_000;

        let stack = Arc::new(AtomicIntrusiveStack::<Item>::new());
        let drained = Arc::new(std::sync::Mutex::new(Vec::new()));

        let workers: Vec<_> = (0..THREADS)
            .map(|t| {
                let stack = Arc::clone(&stack);
                let drained = Arc::clone(&drained);
                thread::spawn(move || {
                    for i in 0..PER_THREAD {
                        unsafe { stack.push(item(t * PER_THREAD + i)) };
                        if i % 128 == 0 {
                            let batch: Vec<usize> = stack.pop_all().map(release).collect();
                            drained.lock().unwrap().extend(batch);
                        }
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let mut values = drained.lock().unwrap().clone();
        values.extend(stack.pop_all().map(release));
        values.sort_unstable();
        assert_eq!(values, (0..THREADS * PER_THREAD).collect::<Vec<_>>());
        assert!(stack.empty());
    }
}
