//! ABA-tagged multi-producer multi-consumer free-list stack.
//!
//! The head packs a 64-byte aligned node address together with a pop
//! counter into one `AtomicU64`: the low 42 bits hold `addr >> 6`, the upper
//! 22 bits hold the counter. Push leaves the counter untouched, pop bumps
//! it, so a stale head observed by a slow popper fails its CAS.
//!
//! Nodes are never reclaimed by the stack. A popper may still read the link
//! of a node that another thread has popped meanwhile, so node memory must
//! stay mapped for as long as the stack is in use. The Loft arenas give that
//! guarantee.

use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::utils::CachePadded;

use super::stack::Linked;

/// Required node alignment.
pub const NODE_ALIGN: usize = 64;

const ADDR_SHIFT: u32 = NODE_ALIGN.trailing_zeros();
const ADDR_BITS: u32 = 42;
const ADDR_MASK: u64 = (1 << ADDR_BITS) - 1;
const TAG_MASK: u64 = (1 << (64 - ADDR_BITS)) - 1;
/// Address field value of the end marker, never a valid node.
const TAIL: u64 = ADDR_MASK;

pub struct MpmcStack<T: Linked> {
    head: CachePadded<AtomicU64>,
    _marker: PhantomData<*mut T>,
}

unsafe impl<T: Linked + Send> Send for MpmcStack<T> {}
unsafe impl<T: Linked + Send> Sync for MpmcStack<T> {}

impl<T: Linked> MpmcStack<T> {
    pub fn new() -> Self {
        Self {
            head: CachePadded::new(AtomicU64::new(TAIL)),
            _marker: PhantomData,
        }
    }

    /// Link value marking the end of a chain.
    #[inline]
    pub fn tail() -> *mut T {
        (TAIL << ADDR_SHIFT) as usize as *mut T
    }

    #[inline]
    pub fn is_tail(node: *const T) -> bool {
        node as usize as u64 == TAIL << ADDR_SHIFT
    }

    pub fn empty(&self) -> bool {
        self.head.load(Ordering::Acquire) & ADDR_MASK == TAIL
    }

    /// Push `node` on top.
    ///
    /// # Safety
    ///
    /// `node` must be aligned to [`NODE_ALIGN`], must not currently be
    /// enlisted, and its memory must outlive the stack.
    pub unsafe fn push(&self, node: NonNull<T>) {
        let desired_addr = pack_addr(node.as_ptr());
        let slot = unsafe { node.as_ref() }.next_slot();
        let mut current = self.head.load(Ordering::Relaxed);
        loop {
            slot.store(unpack_addr(current), Ordering::Relaxed);
            let desired = (current & !ADDR_MASK) | desired_addr;
            match self.head.compare_exchange_weak(
                current,
                desired,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Pop the top node, if any.
    pub fn pop(&self) -> Option<NonNull<T>> {
        let mut current = self.head.load(Ordering::Acquire);
        loop {
            if current & ADDR_MASK == TAIL {
                return None;
            }
            let node: *mut T = unpack_addr(current);
            // may be stale, the memory stays mapped and the tag check below
            // rejects the swap in that case
            let next = unsafe { (*node).next_slot() }.load(Ordering::Relaxed);
            let tag = ((current >> ADDR_BITS) + 1) & TAG_MASK;
            let desired = (tag << ADDR_BITS) | pack_addr(next);
            match self.head.compare_exchange_weak(
                current,
                desired,
                Ordering::Acquire,
                Ordering::Acquire,
            ) {
                Ok(_) => return NonNull::new(node),
                Err(actual) => current = actual,
            }
        }
    }

    /// Top node without removing it.
    pub fn peek(&self) -> Option<NonNull<T>> {
        let current = self.head.load(Ordering::Acquire);
        if current & ADDR_MASK == TAIL {
            return None;
        }
        NonNull::new(unpack_addr(current))
    }

    /// Drop all entries without touching them.
    ///
    /// Used when the backing memory of every node goes away together with
    /// the stack.
    pub fn forget_all(&mut self) {
        *self.head.get_mut() = TAIL;
    }
}

impl<T: Linked> Default for MpmcStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Linked> Drop for MpmcStack<T> {
    fn drop(&mut self) {
        debug_assert!(
            *self.head.get_mut() & ADDR_MASK == TAIL,
            "MpmcStack dropped while nodes are enlisted"
        );
    }
}

#[inline]
fn pack_addr<T>(node: *mut T) -> u64 {
    let addr = node as usize as u64;
    debug_assert_eq!(addr & (NODE_ALIGN as u64 - 1), 0, "misaligned MpmcStack node");
    debug_assert!(addr >> (ADDR_BITS + ADDR_SHIFT) == 0, "node address out of range");
    addr >> ADDR_SHIFT
}

#[inline]
fn unpack_addr<T>(word: u64) -> *mut T {
    ((word & ADDR_MASK) << ADDR_SHIFT) as usize as *mut T
}
