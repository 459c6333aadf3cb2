//! Loft configuration and the low memory notifier.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::OnceLock;

use super::provider::MINIMUM_HUGEPAGE;
use crate::error::LoftError;

/// Default headroom below which the low memory notifier fires.
pub const DEFAULT_WATERMARK: usize = MINIMUM_HUGEPAGE;
/// Default amount of memory to keep mapped.
pub const DEFAULT_PREALLOCATE: usize = 2 * MINIMUM_HUGEPAGE;

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoftFlags {
    /// Touch every page of a span when it grows in place.
    pub prefault_pages: bool,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoftConfig {
    /// Total arena size `grow_preallocate` grows to.
    pub preallocate: usize,
    /// Remaining bytes in the last arena that trigger the notifier.
    pub watermark: usize,
    pub flags: LoftFlags,
}

impl Default for LoftConfig {
    fn default() -> Self {
        Self {
            preallocate: DEFAULT_PREALLOCATE,
            watermark: DEFAULT_WATERMARK,
            flags: LoftFlags::default(),
        }
    }
}

type LowMemCallback = Box<dyn Fn() + Send + Sync>;

/// Live configuration shared by all allocating threads.
pub(crate) struct ConfigCell {
    prefault_pages: AtomicBool,
    preallocate: AtomicUsize,
    watermark: AtomicUsize,
    lowmem_notified: AtomicUsize,
    lowmem_cb: OnceLock<LowMemCallback>,
}

impl ConfigCell {
    pub(crate) fn new(config: &LoftConfig) -> Self {
        Self {
            prefault_pages: AtomicBool::new(config.flags.prefault_pages),
            preallocate: AtomicUsize::new(config.preallocate),
            watermark: AtomicUsize::new(config.watermark),
            lowmem_notified: AtomicUsize::new(0),
            lowmem_cb: OnceLock::new(),
        }
    }

    pub(crate) fn store(&self, config: &LoftConfig) {
        // no watermark notifications while the fields are inconsistent
        self.watermark.store(0, Ordering::SeqCst);
        self.prefault_pages
            .store(config.flags.prefault_pages, Ordering::SeqCst);
        self.preallocate.store(config.preallocate, Ordering::SeqCst);
        self.watermark.store(config.watermark, Ordering::SeqCst);
    }

    pub(crate) fn load(&self) -> LoftConfig {
        LoftConfig {
            preallocate: self.preallocate(),
            watermark: self.watermark(),
            flags: LoftFlags {
                prefault_pages: self.prefault_pages(),
            },
        }
    }

    pub(crate) fn prefault_pages(&self) -> bool {
        self.prefault_pages.load(Ordering::Relaxed)
    }

    pub(crate) fn preallocate(&self) -> usize {
        self.preallocate.load(Ordering::Relaxed)
    }

    pub(crate) fn raise_preallocate(&self, total: usize) {
        self.preallocate.fetch_max(total, Ordering::Relaxed);
    }

    pub(crate) fn watermark(&self) -> usize {
        self.watermark.load(Ordering::Relaxed)
    }

    pub(crate) fn set_notifier(&self, callback: LowMemCallback) -> Result<(), LoftError> {
        self.lowmem_cb
            .set(callback)
            .map_err(|_| LoftError::NotifierInstalled)
    }

    /// Called after a bump in the last span left `remaining` bytes.
    pub(crate) fn check_watermark(&self, remaining: usize) {
        if remaining >= self.watermark() {
            return;
        }
        // block further notifications before calling out
        if self.lowmem_notified.fetch_add(1, Ordering::AcqRel) == 0 {
            if let Some(callback) = self.lowmem_cb.get() {
                callback();
            }
        }
    }

    /// Re-arm the notifier for the next underrun.
    pub(crate) fn rearm(&self) {
        self.lowmem_notified.store(0, Ordering::Release);
    }
}
