//! Loft - lock-free, non-coalescing bucket allocator for the render path.
//!
//! Allocation requests are rounded up to a size class and served from that
//! class' free list, falling back to a bump allocation in huge page backed
//! arenas. Every block is 64 byte aligned to avoid false sharing. As long as
//! enough memory is preallocated, allocating and freeing are O(1) and never
//! take a lock, which makes Loft usable from the render thread. Memory is
//! never returned to the OS while the allocator lives.
//!
//! The process wide pool behind the free functions of this module is created
//! on first use. Setting `SAAVY_DEBUG=no-allocators` routes that pool through
//! the system allocator, which helps memory debuggers but forfeits the
//! realtime guarantees.

pub mod boxed;
pub mod buckets;
pub mod bump;
pub mod config;
pub mod provider;

use std::alloc::{self, Layout};
use std::fmt;
use std::mem::MaybeUninit;
use std::ptr::NonNull;
use std::sync::OnceLock;

pub use boxed::LoftBox;
pub use buckets::{bucket_index, bucket_size, NUMBER_OF_BUCKETS};
pub use config::{LoftConfig, LoftFlags};
pub use provider::{default_provider, ArenaProvider, HeapProvider, MINIMUM_HUGEPAGE};

use self::buckets::Buckets;
use self::bump::BumpAllocator;
use self::config::ConfigCell;
use crate::debug;
use crate::error::LoftError;

/// Largest supported alignment.
pub const MAX_ALIGN: usize = 64;

/// A bucket allocator instance.
pub struct Loft {
    config: ConfigCell,
    bump: BumpAllocator,
    buckets: Buckets,
    bypass: bool,
}

impl Loft {
    pub fn new(provider: Box<dyn ArenaProvider>) -> Self {
        Self {
            config: ConfigCell::new(&LoftConfig::default()),
            bump: BumpAllocator::new(provider),
            buckets: Buckets::new(),
            bypass: false,
        }
    }

    /// An instance that forwards everything to the system allocator.
    pub fn system() -> Self {
        Self {
            bypass: true,
            ..Self::new(Box::new(HeapProvider))
        }
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypass
    }

    /// Allocate at least `size` bytes aligned to `align` (at most 64).
    pub fn alloc(&self, size: usize, align: usize) -> Result<LoftPtr<'_>, LoftError> {
        if self.bypass {
            return self.system_alloc(size, align, false);
        }
        if align > MAX_ALIGN {
            return Err(LoftError::UnsupportedAlignment(align));
        }
        // zero sized requests still yield a distinct block
        let bindex = bucket_index(size);
        if bindex >= NUMBER_OF_BUCKETS {
            return Err(LoftError::UnsupportedSize(size));
        }
        let ptr = self
            .buckets
            .do_alloc(bindex, &self.bump, &self.config)
            .ok_or(LoftError::OutOfMemory(size))?;
        Ok(LoftPtr {
            ptr,
            size: bucket_size(bindex),
            align,
            loft: self,
        })
    }

    /// Allocate a zeroed array of `nelem` elements of `elemsize` bytes.
    pub fn calloc(
        &self,
        nelem: usize,
        elemsize: usize,
        align: usize,
    ) -> Result<LoftPtr<'_>, LoftError> {
        let size = nelem
            .checked_mul(elemsize)
            .ok_or(LoftError::SizeOverflow { nelem, elemsize })?;
        if self.bypass {
            return self.system_alloc(size, align, true);
        }
        let block = self.alloc(size, align)?;
        unsafe { block.ptr.as_ptr().write_bytes(0, size) };
        Ok(block)
    }

    fn system_alloc(&self, size: usize, align: usize, zeroed: bool) -> Result<LoftPtr<'_>, LoftError> {
        let size = size.max(1);
        let layout = Layout::from_size_align(size, align.max(1))
            .map_err(|_| LoftError::UnsupportedAlignment(align))?;
        let raw = unsafe {
            if zeroed {
                alloc::alloc_zeroed(layout)
            } else {
                alloc::alloc(layout)
            }
        };
        let ptr = NonNull::new(raw).ok_or(LoftError::OutOfMemory(size))?;
        Ok(LoftPtr {
            ptr,
            size,
            align: layout.align(),
            loft: self,
        })
    }

    unsafe fn release(&self, ptr: NonNull<u8>, size: usize, align: usize) {
        if self.bypass {
            if let Ok(layout) = Layout::from_size_align(size, align) {
                unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
            }
            return;
        }
        unsafe { self.buckets.do_free(ptr, size) };
    }

    /// Size of the block that serves an `nbytes` request, 0 if unsupported.
    pub fn bucket_size_for(&self, nbytes: usize) -> usize {
        if self.bypass {
            return nbytes;
        }
        let bindex = bucket_index(nbytes);
        if bindex >= NUMBER_OF_BUCKETS {
            return 0;
        }
        bucket_size(bindex)
    }

    pub fn set_config(&self, config: &LoftConfig) {
        self.config.store(config);
    }

    pub fn get_config(&self) -> LoftConfig {
        self.config.load()
    }

    /// Install the low memory callback. Only one callback can ever be set.
    ///
    /// The callback runs on whichever thread crossed the watermark, possibly
    /// the render thread, so it should just wake up the control thread which
    /// then calls [`grow_preallocate`](Self::grow_preallocate).
    pub fn set_notifier<F>(&self, lowmem: F) -> Result<(), LoftError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.config.set_notifier(Box::new(lowmem))
    }

    /// Grow the arenas ahead of demand, returns the bytes added.
    ///
    /// Blocks on the growth lock. Grows at least up to the configured
    /// preallocation and keeps the largest free chunk above the watermark.
    pub fn grow_preallocate(&self, amount: usize) -> usize {
        if self.bypass {
            return 0;
        }
        let totalmem = self.bump.totalmem();
        let mut amount = amount.max(self.config.preallocate().saturating_sub(totalmem));
        let watermark = self.config.watermark();
        let maxchunk = self.bump.free_block();
        if maxchunk <= watermark {
            amount = amount.max(watermark);
        }
        if maxchunk >= amount {
            return 0;
        }
        self.config.rearm();
        let added = self
            .bump
            .grow_spans(amount, true, self.config.prefault_pages());
        self.config.raise_preallocate(self.bump.totalmem());
        added
    }

    pub fn stats(&self) -> LoftStats {
        let arenas = self.bump.list_arenas();
        let mut stats = LoftStats {
            narenas: arenas.len(),
            ..LoftStats::default()
        };
        for arena in &arenas {
            let free = arena.size - arena.offset;
            stats.allocated += arena.size;
            stats.available += free;
            stats.maxchunk = stats.maxchunk.max(free);
        }
        stats.buckets = (0..NUMBER_OF_BUCKETS)
            .filter_map(|index| {
                let count = self.buckets.count(index, &arenas);
                (count > 0).then(|| (bucket_size(index), count))
            })
            .collect();
        stats
    }
}

/// Owning handle of a Loft block, freed on drop.
pub struct LoftPtr<'a> {
    ptr: NonNull<u8>,
    size: usize,
    align: usize,
    loft: &'a Loft,
}

unsafe impl Send for LoftPtr<'_> {}
unsafe impl Sync for LoftPtr<'_> {}

impl<'a> LoftPtr<'a> {
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Usable size, the size class of the block.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn as_uninit_mut(&mut self) -> &mut [MaybeUninit<u8>] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr().cast(), self.size) }
    }

    pub fn allocator(&self) -> &'a Loft {
        self.loft
    }
}

impl Drop for LoftPtr<'_> {
    fn drop(&mut self) {
        unsafe { self.loft.release(self.ptr, self.size, self.align) };
    }
}

impl fmt::Debug for LoftPtr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoftPtr")
            .field("ptr", &self.ptr)
            .field("size", &self.size)
            .finish()
    }
}

/// Allocator statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoftStats {
    pub narenas: usize,
    /// Bytes mapped in arenas.
    pub allocated: usize,
    /// Bytes never handed out by the bump allocator.
    pub available: usize,
    /// Largest contiguous unused chunk.
    pub maxchunk: usize,
    /// `(block size, free blocks)` per non-empty bucket, by size.
    pub buckets: Vec<(usize, usize)>,
}

impl LoftStats {
    /// Bytes parked in free lists.
    pub fn in_free_lists(&self) -> usize {
        self.buckets.iter().map(|&(size, count)| size * count).sum()
    }
}

impl fmt::Display for LoftStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const MB: usize = 1024 * 1024;
        writeln!(f, "{:8} Arenas", self.narenas)?;
        writeln!(f, "{:8} MB allocated", self.allocated / MB)?;
        writeln!(f, "{:8} MB available", self.available / MB)?;
        writeln!(f, "{:8} KB maximum chunk", self.maxchunk / 1024)?;
        for &(size, count) in &self.buckets {
            if size % 1024 == 0 {
                writeln!(f, "{:8} x {:4} KB", count, size / 1024)?;
            } else {
                writeln!(f, "{:8} x {:4} B", count, size)?;
            }
        }
        write!(f, "{:8.1} MB in use", self.in_free_lists() as f64 / MB as f64)
    }
}

static POOL: OnceLock<Loft> = OnceLock::new();

/// The process wide pool.
pub fn the_pool() -> &'static Loft {
    POOL.get_or_init(|| {
        if debug::enabled(debug::NO_ALLOCATORS) {
            log::warn!("loft: {} is set, using the system allocator", debug::NO_ALLOCATORS);
            Loft::system()
        } else {
            Loft::new(default_provider())
        }
    })
}

pub fn alloc(size: usize, align: usize) -> Result<LoftPtr<'static>, LoftError> {
    the_pool().alloc(size, align)
}

pub fn calloc(nelem: usize, elemsize: usize, align: usize) -> Result<LoftPtr<'static>, LoftError> {
    the_pool().calloc(nelem, elemsize, align)
}

pub fn bucket_size_for(nbytes: usize) -> usize {
    the_pool().bucket_size_for(nbytes)
}

pub fn set_config(config: &LoftConfig) {
    the_pool().set_config(config)
}

pub fn get_config() -> LoftConfig {
    the_pool().get_config()
}

pub fn set_notifier<F>(lowmem: F) -> Result<(), LoftError>
where
    F: Fn() + Send + Sync + 'static,
{
    the_pool().set_notifier(lowmem)
}

pub fn grow_preallocate(amount: usize) -> usize {
    the_pool().grow_preallocate(amount)
}

pub fn get_stats() -> LoftStats {
    the_pool().stats()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heap_loft() -> Loft {
        Loft::new(Box::new(HeapProvider))
    }

    #[test]
    fn rejects_large_alignment() {
        let loft = heap_loft();
        assert!(matches!(
            loft.alloc(64, 128),
            Err(LoftError::UnsupportedAlignment(128))
        ));
        assert!(loft.alloc(64, 64).is_ok());
    }

    #[test]
    fn zero_sized_requests_get_distinct_blocks() {
        let loft = heap_loft();
        let a = loft.alloc(0, 1).unwrap();
        let b = loft.alloc(0, 1).unwrap();
        assert_ne!(a.as_ptr(), b.as_ptr());
        assert_eq!(a.size(), 64);
    }

    #[test]
    fn freed_block_is_reused() {
        let loft = heap_loft();
        let first = loft.alloc(1000, 8).unwrap();
        let addr = first.as_ptr();
        drop(first);
        let second = loft.alloc(1010, 8).unwrap();
        assert_eq!(second.as_ptr(), addr, "same bucket reuses the block");
        assert_eq!(second.size(), 1024);
    }

    #[test]
    fn calloc_zeroes_and_checks_overflow() {
        let loft = heap_loft();
        {
            let mut dirty = loft.alloc(256, 8).unwrap();
            for byte in dirty.as_uninit_mut() {
                byte.write(0xa5);
            }
        }
        let block = loft.calloc(32, 8, 8).unwrap();
        let bytes = unsafe { std::slice::from_raw_parts(block.as_ptr(), 256) };
        assert!(bytes.iter().all(|&b| b == 0));
        assert!(matches!(
            loft.calloc(usize::MAX, 2, 8),
            Err(LoftError::SizeOverflow { .. })
        ));
    }

    #[test]
    fn unsupported_sizes() {
        let loft = heap_loft();
        assert_eq!(loft.bucket_size_for(usize::MAX), 0);
        assert_eq!(loft.bucket_size_for(65), 128);
        assert!(matches!(
            loft.alloc(usize::MAX, 8),
            Err(LoftError::UnsupportedSize(_))
        ));
    }

    #[test]
    fn grow_preallocate_reaches_configured_size() {
        let loft = heap_loft();
        loft.set_config(&LoftConfig {
            preallocate: 4 * MINIMUM_HUGEPAGE,
            watermark: MINIMUM_HUGEPAGE,
            ..LoftConfig::default()
        });
        let added = loft.grow_preallocate(0);
        assert_eq!(added, 4 * MINIMUM_HUGEPAGE);
        assert_eq!(loft.grow_preallocate(0), 0, "enough headroom already");

        let stats = loft.stats();
        assert_eq!(stats.narenas, 1);
        assert_eq!(stats.allocated, 4 * MINIMUM_HUGEPAGE);
        assert_eq!(stats.available, stats.allocated);
        assert_eq!(stats.maxchunk, stats.allocated);
    }

    #[test]
    fn stats_report_free_lists() {
        let loft = heap_loft();
        let blocks: Vec<_> = (0..3).map(|_| loft.alloc(2048, 8).unwrap()).collect();
        let big = loft.alloc(20_000, 8).unwrap();
        drop(blocks);
        drop(big);
        let stats = loft.stats();
        assert_eq!(stats.buckets, vec![(2048, 3), (32768, 1)]);
        assert!(stats.available <= stats.allocated);
        assert!(stats.maxchunk <= stats.allocated);

        let text = stats.to_string();
        assert!(text.contains("Arenas"));
        assert!(text.contains("       3 x    2 KB"), "{text}");
        assert!(text.contains("       1 x   32 KB"), "{text}");
        assert!(text.ends_with("MB in use"));
    }

    #[test]
    fn system_instance_bypasses_buckets() {
        let loft = Loft::system();
        assert!(loft.is_bypassed());
        let block = loft.alloc(100, 256).unwrap();
        assert_eq!(block.as_ptr() as usize % 256, 0);
        assert_eq!(loft.bucket_size_for(100), 100);
        drop(block);
        assert_eq!(loft.stats(), LoftStats::default());
    }
}
