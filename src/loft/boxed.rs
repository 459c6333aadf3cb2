//! `Box`-like owner for values stored in Loft memory.

use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use super::{Loft, LoftPtr};
use crate::error::LoftError;

/// A value living in a Loft block, dropped in place and then freed.
pub struct LoftBox<'a, T> {
    value: NonNull<T>,
    block: LoftPtr<'a>,
    _marker: PhantomData<T>,
}

unsafe impl<T: Send> Send for LoftBox<'_, T> {}
unsafe impl<T: Sync> Sync for LoftBox<'_, T> {}

impl<T> LoftBox<'static, T> {
    /// Move `value` into the process wide pool.
    pub fn new(value: T) -> Result<Self, LoftError> {
        Self::new_in(super::the_pool(), value)
    }
}

impl<'a, T> LoftBox<'a, T> {
    pub fn new_in(loft: &'a Loft, value: T) -> Result<Self, LoftError> {
        let block = loft.alloc(mem::size_of::<T>(), mem::align_of::<T>())?;
        let value_ptr = block.as_ptr().cast::<T>();
        unsafe { value_ptr.write(value) };
        Ok(Self {
            // SAFETY: block pointers are never null
            value: unsafe { NonNull::new_unchecked(value_ptr) },
            block,
            _marker: PhantomData,
        })
    }

    /// Bytes reserved for the value, the size class of its block.
    pub fn block_size(&self) -> usize {
        self.block.size()
    }
}

impl<T> Deref for LoftBox<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { self.value.as_ref() }
    }
}

impl<T> DerefMut for LoftBox<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { self.value.as_mut() }
    }
}

impl<T> Drop for LoftBox<'_, T> {
    fn drop(&mut self) {
        // the block itself is released when `self.block` drops afterwards
        unsafe { self.value.as_ptr().drop_in_place() };
    }
}

impl<T: fmt::Debug> fmt::Debug for LoftBox<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}
