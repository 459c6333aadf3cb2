//! Bump allocation over huge page backed spans.
//!
//! Every span is a single mapping, the spans form an append-only list. An
//! allocation is a CAS on the offset of the first span with enough room, so
//! as long as the preallocated memory lasts no lock is taken. When no span
//! fits, `grow_spans` takes the growth mutex and either grows the last span
//! in place or appends a new one that is at least twice as large as needed.
//! Memory is handed back to the provider only when the allocator is dropped.

use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use super::config::ConfigCell;
use super::provider::{ArenaProvider, MINIMUM_HUGEPAGE};

/// Allocation granularity and alignment of every bump allocation.
pub const BUMP_ALIGN: usize = 64;

struct Span {
    start: NonNull<u8>,
    size: AtomicUsize,
    offset: AtomicUsize,
    next: AtomicPtr<Span>,
}

/// Snapshot of one span for statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaSpan {
    pub addr: usize,
    pub offset: usize,
    pub size: usize,
}

impl ArenaSpan {
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.addr && addr < self.addr + self.size
    }
}

pub struct BumpAllocator {
    provider: Box<dyn ArenaProvider>,
    spans: AtomicPtr<Span>,
    totalmem: AtomicUsize,
    grow_lock: Mutex<()>,
}

impl BumpAllocator {
    pub fn new(provider: Box<dyn ArenaProvider>) -> Self {
        Self {
            provider,
            spans: AtomicPtr::new(ptr::null_mut()),
            totalmem: AtomicUsize::new(0),
            grow_lock: Mutex::new(()),
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Bytes mapped over all spans.
    pub fn totalmem(&self) -> usize {
        self.totalmem.load(Ordering::Acquire)
    }

    /// Allocate `size` bytes, a non-zero multiple of [`BUMP_ALIGN`].
    ///
    /// Grows the spans at most once if nothing fits.
    pub(crate) fn bump_alloc(&self, size: usize, config: &ConfigCell) -> Option<NonNull<u8>> {
        debug_assert!(size != 0 && size % BUMP_ALIGN == 0, "bad bump size {size}");
        if let Some(block) = self.try_bump(size, config) {
            return Some(block);
        }
        self.grow_spans(size, false, config.prefault_pages());
        let block = self.try_bump(size, config);
        if block.is_none() {
            log::warn!("loft: arena exhausted, failed to allocate {size} bytes");
        }
        block
    }

    fn try_bump(&self, size: usize, config: &ConfigCell) -> Option<NonNull<u8>> {
        let mut cursor = self.spans.load(Ordering::Acquire);
        while let Some(span) = unsafe { cursor.as_ref() } {
            let mut omark = span.offset.load(Ordering::Relaxed);
            loop {
                let nmark = omark + size;
                if nmark > span.size.load(Ordering::Acquire) {
                    break;
                }
                match span.offset.compare_exchange_weak(
                    omark,
                    nmark,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // only the last span counts towards the watermark
                        if span.next.load(Ordering::Acquire).is_null() {
                            let remaining = span.size.load(Ordering::Acquire) - nmark;
                            config.check_watermark(remaining);
                        }
                        // SAFETY: nmark <= size, so the block is inside the span
                        return Some(unsafe { span.start.add(omark) });
                    }
                    Err(current) => omark = current,
                }
            }
            cursor = span.next.load(Ordering::Acquire);
        }
        None
    }

    /// Make at least `needed` more bytes available, returns the bytes added.
    ///
    /// Returns 0 if another thread grew the spans while this one waited for
    /// the lock, or if the provider failed.
    pub(crate) fn grow_spans(&self, needed: usize, preallocating: bool, prefault: bool) -> usize {
        let entry_total = self.totalmem();
        let _guard = self.grow_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if entry_total < self.totalmem() {
            return 0;
        }
        if !preallocating {
            log::warn!(
                "loft: growing arenas from within an allocation (total={}): need={} bytes",
                self.totalmem(),
                needed
            );
        }
        let page_size = self.provider.page_size();

        let mut totalmem = 0;
        let mut last: Option<&Span> = None;
        let mut cursor = self.spans.load(Ordering::Acquire);
        while let Some(span) = unsafe { cursor.as_ref() } {
            if let Some(prev) = last {
                totalmem += prev.size.load(Ordering::Relaxed);
            }
            last = Some(span);
            cursor = span.next.load(Ordering::Acquire);
        }

        if let Some(span) = last {
            let old_size = span.size.load(Ordering::Relaxed);
            let mut new_size = old_size * 2;
            while new_size - old_size < needed {
                new_size *= 2;
            }
            if self.provider.grow(span.start, old_size, new_size) {
                if prefault {
                    prefault_range(span.start, old_size, new_size, page_size);
                }
                span.size.store(new_size, Ordering::Release);
                self.totalmem.store(totalmem + new_size, Ordering::Release);
                log::debug!(
                    "loft: grew arena in place to {}M, total={}M",
                    new_size >> 20,
                    self.totalmem() >> 20
                );
                return new_size - old_size;
            }
            totalmem += old_size;
        }

        let mut mmsize = MINIMUM_HUGEPAGE;
        while mmsize < needed {
            mmsize *= 2;
        }
        let Some(start) = self.provider.map(mmsize) else {
            log::warn!("loft: failed to map a new arena of {} bytes", mmsize);
            return 0;
        };
        prefault_range(start, 0, mmsize, page_size);
        let span = Box::into_raw(Box::new(Span {
            start,
            size: AtomicUsize::new(mmsize),
            offset: AtomicUsize::new(0),
            next: AtomicPtr::new(ptr::null_mut()),
        }));
        match last {
            Some(prev) => prev.next.store(span, Ordering::Release),
            None => self.spans.store(span, Ordering::Release),
        }
        self.totalmem.store(totalmem + mmsize, Ordering::Release);
        log::info!(
            "loft: mapped {}M arena via {}, total={}M",
            mmsize >> 20,
            self.provider.name(),
            self.totalmem() >> 20
        );
        mmsize
    }

    /// Largest contiguous free block, i.e. the room left in the last span.
    pub fn free_block(&self) -> usize {
        let mut remaining = 0;
        let mut cursor = self.spans.load(Ordering::Acquire);
        while let Some(span) = unsafe { cursor.as_ref() } {
            remaining = span
                .size
                .load(Ordering::Acquire)
                .saturating_sub(span.offset.load(Ordering::Acquire));
            cursor = span.next.load(Ordering::Acquire);
        }
        remaining
    }

    pub fn list_arenas(&self) -> Vec<ArenaSpan> {
        let mut arenas = Vec::new();
        let mut cursor = self.spans.load(Ordering::Acquire);
        while let Some(span) = unsafe { cursor.as_ref() } {
            let size = span.size.load(Ordering::Acquire);
            arenas.push(ArenaSpan {
                addr: span.start.as_ptr() as usize,
                offset: span.offset.load(Ordering::Acquire).min(size),
                size,
            });
            cursor = span.next.load(Ordering::Acquire);
        }
        arenas
    }
}

fn prefault_range(start: NonNull<u8>, from: usize, to: usize, page_size: usize) {
    for offset in (from..to).step_by(page_size) {
        unsafe { start.as_ptr().add(offset).write_volatile(1) };
    }
}

impl Drop for BumpAllocator {
    fn drop(&mut self) {
        let mut cursor = *self.spans.get_mut();
        while !cursor.is_null() {
            let span = unsafe { Box::from_raw(cursor) };
            cursor = span.next.load(Ordering::Relaxed);
            unsafe {
                self.provider
                    .unmap(span.start, span.size.load(Ordering::Relaxed))
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loft::config::LoftConfig;
    use crate::loft::provider::HeapProvider;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn heap_bump() -> (BumpAllocator, ConfigCell) {
        (
            BumpAllocator::new(Box::new(HeapProvider)),
            ConfigCell::new(&LoftConfig::default()),
        )
    }

    #[test]
    fn first_allocation_maps_a_span() {
        let (bump, config) = heap_bump();
        assert_eq!(bump.totalmem(), 0);
        let a = bump.bump_alloc(64, &config).unwrap();
        let b = bump.bump_alloc(128, &config).unwrap();
        assert_eq!(bump.totalmem(), MINIMUM_HUGEPAGE);
        assert_eq!(b.as_ptr() as usize - a.as_ptr() as usize, 64);
        assert_eq!(a.as_ptr() as usize % BUMP_ALIGN, 0);

        let arenas = bump.list_arenas();
        assert_eq!(arenas.len(), 1);
        assert_eq!(arenas[0].offset, 192);
        assert_eq!(bump.free_block(), MINIMUM_HUGEPAGE - 192);
    }

    #[test]
    fn large_requests_append_bigger_spans() {
        let (bump, config) = heap_bump();
        bump.bump_alloc(64, &config).unwrap();
        let big = 3 * MINIMUM_HUGEPAGE;
        bump.bump_alloc(big, &config).unwrap();
        let arenas = bump.list_arenas();
        assert_eq!(arenas.len(), 2, "heap spans never grow in place");
        assert_eq!(arenas[1].size, 8 * MINIMUM_HUGEPAGE, "rounded up by doubling");
        assert_eq!(bump.totalmem(), 10 * MINIMUM_HUGEPAGE);
    }

    #[test]
    fn watermark_underrun_notifies_once() {
        let (bump, config) = heap_bump();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        config
            .set_notifier(Box::new(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            }))
            .unwrap();
        config.store(&LoftConfig {
            watermark: MINIMUM_HUGEPAGE / 2,
            ..LoftConfig::default()
        });
        for _ in 0..(MINIMUM_HUGEPAGE / 2 / 4096) {
            bump.bump_alloc(4096, &config).unwrap();
        }
        assert_eq!(hits.load(Ordering::Relaxed), 0);
        bump.bump_alloc(4096, &config).unwrap();
        bump.bump_alloc(4096, &config).unwrap();
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn concurrent_bumps_never_overlap() {
        let (bump, config) = heap_bump();
        bump.grow_spans(4 * MINIMUM_HUGEPAGE, true, false);
        let bump = Arc::new(bump);
        let config = Arc::new(config);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let bump = Arc::clone(&bump);
                let config = Arc::clone(&config);
                std::thread::spawn(move || {
                    (0..1000)
                        .map(|_| bump.bump_alloc(256, &config).unwrap().as_ptr() as usize)
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut seen = HashSet::new();
        for handle in handles {
            for addr in handle.join().unwrap() {
                assert!(seen.insert(addr), "block {addr:#x} handed out twice");
            }
        }
        assert_eq!(seen.len(), 4000);
    }
}
