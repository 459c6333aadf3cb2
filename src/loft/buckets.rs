//! Size classes and their free lists.
//!
//! Small blocks use 64 byte stepping up to [`SMALL_BLOCK_LIMIT`], larger
//! blocks round up to the next power of two. Every class owns one
//! [`MpmcStack`] of freed blocks. Blocks are never split, coalesced or
//! returned to the bump allocator.

use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};

use super::bump::{ArenaSpan, BumpAllocator};
use super::config::ConfigCell;
use crate::sync::{Linked, MpmcStack};

/// Blocks up to this size use 64 byte stepping.
pub const SMALL_BLOCK_LIMIT: usize = 8192;
pub const SMALL_BLOCK_BUCKETS: usize = SMALL_BLOCK_LIMIT / 64;
/// Power of two classes from `2 * SMALL_BLOCK_LIMIT` up to 128 TiB.
pub const POWER2_BUCKETS: usize = 34;
pub const NUMBER_OF_BUCKETS: usize = SMALL_BLOCK_BUCKETS + POWER2_BUCKETS;

const FIRST_POWER2_SHIFT: u32 = SMALL_BLOCK_LIMIT.trailing_zeros() + 1;

/// Size in bytes of the blocks handed out by bucket `index`.
#[inline]
pub const fn bucket_size(index: usize) -> usize {
    if index < SMALL_BLOCK_BUCKETS {
        (index + 1) * 64
    } else {
        1 << (index - SMALL_BLOCK_BUCKETS + FIRST_POWER2_SHIFT as usize)
    }
}

/// Bucket serving requests of `n` bytes, 0 is treated like 1.
///
/// The result may be out of range for huge `n`, see [`NUMBER_OF_BUCKETS`].
#[inline]
pub const fn bucket_index(n: usize) -> usize {
    let n = if n == 0 { 1 } else { n };
    if n <= SMALL_BLOCK_LIMIT {
        return (n - 1) / 64;
    }
    let upper_power2_shift = usize::BITS - (n - 1).leading_zeros();
    SMALL_BLOCK_BUCKETS + (upper_power2_shift - FIRST_POWER2_SHIFT) as usize
}

const CANARY0: u64 = 0xbe4da62f087c3519;

/// Header written over a freed block.
#[repr(C, align(64))]
struct Block {
    canary0: u64,
    next: AtomicPtr<Block>,
}

unsafe impl Linked for Block {
    fn next_slot(&self) -> &AtomicPtr<Self> {
        &self.next
    }
}

pub(crate) struct Buckets {
    stacks: Box<[MpmcStack<Block>]>,
}

impl Buckets {
    pub(crate) fn new() -> Self {
        Self {
            stacks: (0..NUMBER_OF_BUCKETS).map(|_| MpmcStack::new()).collect(),
        }
    }

    /// Returns the block and its class size, `None` if the arenas are exhausted.
    ///
    /// `bindex` must be a valid bucket index.
    pub(crate) fn do_alloc(
        &self,
        bindex: usize,
        bump: &BumpAllocator,
        config: &ConfigCell,
    ) -> Option<NonNull<u8>> {
        let bsize = bucket_size(bindex);
        let block = match self.stacks[bindex].pop() {
            Some(block) => {
                // simple overwrite check
                let canary = unsafe { ptr::addr_of!((*block.as_ptr()).canary0).read() };
                if canary != CANARY0 {
                    log::warn!(
                        "loft: corrupted free block at {:p} in {} byte bucket",
                        block,
                        bsize
                    );
                }
                block.cast::<u8>()
            }
            None => bump.bump_alloc(bsize, config)?,
        };
        unsafe { block.cast::<u64>().write(0) };
        Some(block)
    }

    /// Put a block of class size `bsize` back on its free list.
    ///
    /// # Safety
    ///
    /// `mem` must come from [`do_alloc`](Self::do_alloc) with the same class
    /// size and must not be used afterwards.
    pub(crate) unsafe fn do_free(&self, mem: NonNull<u8>, bsize: usize) {
        let bindex = bucket_index(bsize);
        debug_assert!(bindex < NUMBER_OF_BUCKETS && bucket_size(bindex) == bsize);
        let block = mem.cast::<Block>();
        unsafe {
            block.as_ptr().write(Block {
                canary0: CANARY0,
                next: AtomicPtr::new(ptr::null_mut()),
            });
            self.stacks[bindex].push(block);
        }
    }

    /// Free blocks in bucket `bindex`, counted while they look sane.
    pub(crate) fn count(&self, bindex: usize, arenas: &[ArenaSpan]) -> usize {
        let Some(stack) = self.stacks.get(bindex) else {
            return 0;
        };
        let mut counter = 0;
        let mut cursor = stack.peek().map_or(ptr::null_mut(), NonNull::as_ptr);
        while !cursor.is_null() && !MpmcStack::<Block>::is_tail(cursor) {
            if !maybe_free(cursor, arenas) {
                break; // may not dereference the link
            }
            counter += 1;
            cursor = unsafe { (*cursor).next.load(Ordering::Acquire) };
        }
        counter
    }
}

/// Aligned, inside a known arena and carrying the free canary.
fn maybe_free(block: *const Block, arenas: &[ArenaSpan]) -> bool {
    let addr = block as usize;
    if addr & 63 != 0 {
        return false;
    }
    let contained = arenas.iter().any(|a| a.contains(addr));
    contained && unsafe { ptr::addr_of!((*block).canary0).read_volatile() } == CANARY0
}

impl Drop for Buckets {
    fn drop(&mut self) {
        // the blocks live in arenas that go away together with the buckets
        for stack in self.stacks.iter_mut() {
            stack.forget_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loft::config::LoftConfig;
    use crate::loft::provider::HeapProvider;

    #[test]
    fn small_bucket_boundaries() {
        assert_eq!(bucket_index(0), bucket_index(1));
        for (n, size, index) in [
            (1, 64, 0),
            (63, 64, 0),
            (64, 64, 0),
            (65, 128, 1),
            (127, 128, 1),
            (128, 128, 1),
            (129, 192, 2),
        ] {
            assert_eq!(bucket_index(n), index, "index of {n}");
            assert_eq!(bucket_size(bucket_index(n)), size, "size for {n}");
        }
        assert_eq!(bucket_size(bucket_index(SMALL_BLOCK_LIMIT - 1)), SMALL_BLOCK_LIMIT);
        assert_eq!(bucket_index(SMALL_BLOCK_LIMIT), SMALL_BLOCK_BUCKETS - 1);
    }

    #[test]
    fn power2_bucket_boundaries() {
        let limit = SMALL_BLOCK_LIMIT;
        assert_eq!(bucket_index(limit + 1), SMALL_BLOCK_BUCKETS);
        assert_eq!(bucket_size(bucket_index(limit + 1)), limit * 2);
        assert_eq!(bucket_size(bucket_index(limit * 2)), limit * 2);
        assert_eq!(bucket_size(bucket_index(limit * 2 + 1)), limit * 4);
        assert_eq!(bucket_size(NUMBER_OF_BUCKETS - 1), 1 << 47);
        assert_eq!(bucket_index((1 << 47) + 1), NUMBER_OF_BUCKETS);
    }

    #[test]
    fn sizes_cover_requests_and_increase() {
        for n in (0..70_000).chain([1 << 20, (1 << 20) + 1, 3 << 30]) {
            let index = bucket_index(n);
            assert!(index < NUMBER_OF_BUCKETS);
            assert!(bucket_size(index) >= n, "bucket too small for {n}");
        }
        for index in 1..NUMBER_OF_BUCKETS {
            assert!(bucket_size(index) > bucket_size(index - 1));
        }
    }

    #[test]
    fn freed_blocks_are_reused_and_counted() {
        let bump = BumpAllocator::new(Box::new(HeapProvider));
        let config = ConfigCell::new(&LoftConfig::default());
        let buckets = Buckets::new();
        let bindex = bucket_index(100);

        let a = buckets.do_alloc(bindex, &bump, &config).unwrap();
        let b = buckets.do_alloc(bindex, &bump, &config).unwrap();
        assert_ne!(a, b);
        unsafe {
            buckets.do_free(a, 128);
            buckets.do_free(b, 128);
        }
        let arenas = bump.list_arenas();
        assert_eq!(buckets.count(bindex, &arenas), 2);
        assert_eq!(buckets.count(bindex + 1, &arenas), 0);

        let c = buckets.do_alloc(bindex, &bump, &config).unwrap();
        assert_eq!(c, b, "last freed block comes back first");
        assert_eq!(buckets.count(bindex, &arenas), 1);
        unsafe { buckets.do_free(c, 128) };
    }
}
