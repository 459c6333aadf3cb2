//! Job lanes from the control thread to the render thread.
//!
//! Each lane is an intrusive stack of boxed closures. Submitters push from
//! any thread, the render thread takes the whole stack once per cycle with
//! `pop_reversed` and runs the jobs in submission order.

use std::ptr::{self, NonNull};
use std::sync::atomic::AtomicPtr;

use crate::graph::ProcessorGraph;
use crate::sync::{AtomicIntrusiveStack, Chain, Linked};

/// Runs with exclusive graph access, submitter does not wait.
pub type AsyncJob = Box<dyn FnOnce(&mut ProcessorGraph) + Send>;
/// Runs with shared graph access while the submitter waits.
pub type ConstJob = Box<dyn FnOnce(&ProcessorGraph) + Send>;

struct JobNode<J> {
    next: AtomicPtr<JobNode<J>>,
    job: J,
}

unsafe impl<J> Linked for JobNode<J> {
    fn next_slot(&self) -> &AtomicPtr<Self> {
        &self.next
    }
}

pub(crate) struct JobQueue<J> {
    stack: AtomicIntrusiveStack<JobNode<J>>,
}

impl<J: Send> JobQueue<J> {
    pub fn new() -> Self {
        Self {
            stack: AtomicIntrusiveStack::new(),
        }
    }

    pub fn push(&self, job: J) {
        let node = Box::new(JobNode {
            next: AtomicPtr::new(ptr::null_mut()),
            job,
        });
        // SAFETY: the node is leaked here and reclaimed by `Drain`
        unsafe { self.stack.push(NonNull::from(Box::leak(node))) };
    }

    pub fn pending(&self) -> bool {
        !self.stack.empty()
    }

    /// Take every queued job, oldest first.
    pub fn drain(&self) -> Drain<J> {
        Drain {
            chain: self.stack.pop_reversed(),
        }
    }
}

impl<J> Drop for JobQueue<J> {
    fn drop(&mut self) {
        for node in self.stack.pop_all() {
            drop(unsafe { Box::from_raw(node.as_ptr()) });
        }
    }
}

/// Jobs detached from a queue. Unconsumed jobs are dropped with it.
pub(crate) struct Drain<J> {
    chain: Chain<JobNode<J>>,
}

impl<J> Iterator for Drain<J> {
    type Item = J;

    fn next(&mut self) -> Option<J> {
        let node = self.chain.next()?;
        // SAFETY: every node was leaked from a box in `push`
        let node = unsafe { Box::from_raw(node.as_ptr()) };
        Some(node.job)
    }
}

impl<J> Drop for Drain<J> {
    fn drop(&mut self) {
        for _ in self.by_ref() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;

    #[test]
    fn drains_in_submission_order() {
        let queue: JobQueue<Box<dyn FnOnce(&mut Vec<u32>) + Send>> = JobQueue::new();
        assert!(!queue.pending());
        for i in 0..5 {
            queue.push(Box::new(move |log: &mut Vec<u32>| log.push(i)));
        }
        assert!(queue.pending());
        let mut log = Vec::new();
        for job in queue.drain() {
            job(&mut log);
        }
        assert_eq!(log, [0, 1, 2, 3, 4]);
        assert!(!queue.pending());
    }

    #[test]
    fn dropped_jobs_release_captures() {
        let token = Arc::new(());
        let queue: JobQueue<Box<dyn FnOnce() + Send>> = JobQueue::new();
        for _ in 0..3 {
            let token = Arc::clone(&token);
            queue.push(Box::new(move || drop(token)));
        }
        let mut drain = queue.drain();
        if let Some(job) = drain.next() {
            job();
        }
        drop(drain);
        assert_eq!(Arc::strong_count(&token), 1);

        let token2 = Arc::clone(&token);
        queue.push(Box::new(move || drop(token2)));
        drop(queue);
        assert_eq!(Arc::strong_count(&token), 1);
    }

    #[test]
    fn concurrent_submitters() {
        let queue: Arc<JobQueue<Box<dyn FnOnce(&AtomicUsize) + Send>>> = Arc::new(JobQueue::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let queue = Arc::clone(&queue);
                let order = Arc::clone(&order);
                thread::spawn(move || {
                    for i in 0..250 {
                        let order = Arc::clone(&order);
                        queue.push(Box::new(move |count: &AtomicUsize| {
                            count.fetch_add(1, Ordering::Relaxed);
                            order.lock().unwrap().push((t, i));
                        }));
                    }
                })
            })
            .collect();
        let count = AtomicUsize::new(0);
        while count.load(Ordering::Relaxed) < 1000 {
            for job in queue.drain() {
                job(&count);
            }
            if handles.iter().all(|h| h.is_finished()) && !queue.pending() {
                break;
            }
        }
        for handle in handles {
            handle.join().unwrap();
        }
        for job in queue.drain() {
            job(&count);
        }
        assert_eq!(count.load(Ordering::Relaxed), 1000);
        // per submitter order survives
        let order = order.lock().unwrap();
        for t in 0..4 {
            let seen: Vec<_> = order.iter().filter(|(s, _)| *s == t).map(|&(_, i)| i).collect();
            assert_eq!(seen, (0..250).collect::<Vec<_>>());
        }
    }
}
