//! Processor change notifications.
//!
//! Any thread may enlist a processor; the control thread drains the queue
//! and turns the pending flags into [`ProcessorEvent`]s. Each processor is
//! enlisted at most once at a time, its `nqueue_next` link doubles as the
//! enlisted marker.

use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use crate::graph::shared::ProcessorShared;
use crate::graph::{ParamId, ProcessorFlags, ProcessorId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotifyKind {
    BusConnect,
    BusDisconnect,
    Insert,
    Remove,
    ParamChange(ParamId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessorEvent {
    pub processor: ProcessorId,
    pub kind: NotifyKind,
}

/// LIFO list of enlisted processors, terminated by [`NotifyQueue::tail`].
pub struct NotifyQueue {
    head: AtomicPtr<ProcessorShared>,
}

unsafe impl Send for NotifyQueue {}
unsafe impl Sync for NotifyQueue {}

impl NotifyQueue {
    pub fn new() -> Self {
        Self {
            head: AtomicPtr::new(Self::tail()),
        }
    }

    /// End marker, distinct from null which means "not enlisted".
    pub(crate) fn tail() -> *mut ProcessorShared {
        NonNull::dangling().as_ptr()
    }

    pub fn pending(&self) -> bool {
        self.head.load(Ordering::Acquire) != Self::tail()
    }

    /// Push an enlisted processor. `node` must come from `Arc::into_raw` and
    /// its `nqueue_next` must already be non-null.
    pub(crate) fn push(&self, node: *mut ProcessorShared) {
        // SAFETY: the queue owns a strong reference to `node`
        let link = unsafe { &(*node).nqueue_next };
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            link.store(head, Ordering::Release);
            match self
                .head
                .compare_exchange_weak(head, node, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return,
                Err(current) => head = current,
            }
        }
    }

    /// Detach the whole list, unlink every entry and report its flags.
    pub fn dispatch(&self, mut sink: impl FnMut(ProcessorEvent)) {
        self.drain(|shared, flags| {
            let processor = shared.id;
            let mut emit = |kind| sink(ProcessorEvent { processor, kind });
            if flags.contains(ProcessorFlags::INSERTION) {
                emit(NotifyKind::Insert);
            }
            if flags.contains(ProcessorFlags::BUSDISCONNECT) {
                emit(NotifyKind::BusDisconnect);
            }
            if flags.contains(ProcessorFlags::BUSCONNECT) {
                emit(NotifyKind::BusConnect);
            }
            if flags.contains(ProcessorFlags::PARAMCHANGE) {
                for param in shared.params.iter().filter(|p| p.take_changed()) {
                    emit(NotifyKind::ParamChange(param.id));
                }
            }
            if flags.contains(ProcessorFlags::REMOVAL) {
                emit(NotifyKind::Remove);
            }
        });
    }

    /// Drop all pending entries without reporting them.
    pub fn discard(&self) {
        self.drain(|_, _| {});
    }

    fn drain(&self, mut visit: impl FnMut(&ProcessorShared, ProcessorFlags)) {
        let mut head = self.head.swap(Self::tail(), Ordering::AcqRel);
        while !head.is_null() && head != Self::tail() {
            // SAFETY: reclaims the reference taken in `enotify_enqueue_mt`
            let current = unsafe { Arc::from_raw(head.cast_const()) };
            // once unlinked the processor may be enlisted again
            head = current.nqueue_next.swap(ptr::null_mut(), Ordering::AcqRel);
            let flags = current.take_notify_flags();
            visit(&current, flags);
        }
    }
}

impl Default for NotifyQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for NotifyQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyQueue").field("pending", &self.pending()).finish()
    }
}

/// Collects events and hands each distinct one to the sink exactly once,
/// when the batch goes out of scope.
pub struct NotifyBatch<F: FnMut(ProcessorEvent)> {
    sink: F,
    events: Vec<ProcessorEvent>,
}

impl<F: FnMut(ProcessorEvent)> NotifyBatch<F> {
    pub fn new(sink: F) -> Self {
        Self {
            sink,
            events: Vec::new(),
        }
    }

    pub fn push(&mut self, event: ProcessorEvent) {
        if !self.events.contains(&event) {
            self.events.push(event);
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl<F: FnMut(ProcessorEvent)> Extend<ProcessorEvent> for NotifyBatch<F> {
    fn extend<I: IntoIterator<Item = ProcessorEvent>>(&mut self, iter: I) {
        for event in iter {
            self.push(event);
        }
    }
}

impl<F: FnMut(ProcessorEvent)> Drop for NotifyBatch<F> {
    fn drop(&mut self) {
        for event in self.events.drain(..) {
            (self.sink)(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::param::{Param, ParamInfo};
    use std::thread;

    fn processor(id: u32, queue: &Arc<NotifyQueue>) -> Arc<ProcessorShared> {
        let params = vec![
            Param::new(ParamId(1), ParamInfo::range("a", "A", "A", 0.0, 0.0, 1.0)),
            Param::new(ParamId(2), ParamInfo::range("b", "B", "B", 0.0, 0.0, 1.0)),
        ];
        Arc::new(ProcessorShared::new(
            ProcessorId(id),
            format!("p{id}"),
            params,
            Vec::new(),
            Vec::new(),
            false,
            false,
            Arc::clone(queue),
        ))
    }

    fn collect(queue: &NotifyQueue) -> Vec<ProcessorEvent> {
        let mut events = Vec::new();
        queue.dispatch(|e| events.push(e));
        events
    }

    #[test]
    fn flags_accumulate_while_enlisted() {
        let queue = Arc::new(NotifyQueue::new());
        let p = processor(1, &queue);
        p.enotify_enqueue_mt(ProcessorFlags::BUSCONNECT);
        p.enotify_enqueue_mt(ProcessorFlags::BUSCONNECT);
        p.enotify_enqueue_mt(ProcessorFlags::INSERTION);
        let events = collect(&queue);
        let kinds: Vec<_> = events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, [NotifyKind::Insert, NotifyKind::BusConnect]);
        assert!(collect(&queue).is_empty());

        p.enotify_enqueue_mt(ProcessorFlags::REMOVAL);
        assert_eq!(collect(&queue)[0].kind, NotifyKind::Remove);
    }

    #[test]
    fn only_changed_params_are_reported() {
        let queue = Arc::new(NotifyQueue::new());
        let p = processor(7, &queue);
        p.set_param(ParamId(2), 0.5);
        let events = collect(&queue);
        assert_eq!(
            events,
            [ProcessorEvent {
                processor: ProcessorId(7),
                kind: NotifyKind::ParamChange(ParamId(2))
            }]
        );
        p.set_param(ParamId(2), 0.5);
        assert!(!queue.pending(), "unchanged value does not notify");
    }

    #[test]
    fn concurrent_enlisting() {
        let queue = Arc::new(NotifyQueue::new());
        let procs: Vec<_> = (0..16).map(|i| processor(i, &queue)).collect();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let procs = procs.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        for p in &procs {
                            p.enotify_enqueue_mt(ProcessorFlags::BUSCONNECT);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let mut ids: Vec<_> = collect(&queue).iter().map(|e| e.processor.0).collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..16).collect::<Vec<_>>());
        for p in &procs {
            assert_eq!(Arc::strong_count(p), 1);
        }
    }

    #[test]
    fn batch_dedups_and_flushes_on_drop() {
        let mut seen = Vec::new();
        {
            let mut batch = NotifyBatch::new(|e| seen.push(e));
            let event = ProcessorEvent {
                processor: ProcessorId(1),
                kind: NotifyKind::BusConnect,
            };
            batch.push(event);
            batch.push(event);
            batch.extend([ProcessorEvent {
                processor: ProcessorId(2),
                kind: NotifyKind::Remove,
            }]);
            assert_eq!(batch.len(), 2);
        }
        assert_eq!(seen.len(), 2);
    }
}
