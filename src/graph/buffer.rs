//! Sample block storage for output bus channels.

use std::fmt;

use crate::MAX_BLOCK_SIZE;

const CANARY: u64 = 0xE14D8A302B97C56F;

#[repr(C, align(64))]
struct AlignedBlock([f32; MAX_BLOCK_SIZE]);

/// One channel worth of samples, cache line aligned and bracketed by guard
/// words so overruns show up in [`check`](FloatBuffer::check).
#[repr(C, align(64))]
pub struct FloatBuffer {
    canary0: u64,
    fblock: AlignedBlock,
    canary1: u64,
}

impl FloatBuffer {
    pub fn new() -> Self {
        Self {
            canary0: CANARY,
            fblock: AlignedBlock([0.0; MAX_BLOCK_SIZE]),
            canary1: CANARY,
        }
    }

    /// `true` while both guard words are intact.
    pub fn check(&self) -> bool {
        self.canary0 == CANARY && self.canary1 == CANARY
    }

    pub fn samples(&self) -> &[f32; MAX_BLOCK_SIZE] {
        &self.fblock.0
    }

    pub fn samples_mut(&mut self) -> &mut [f32; MAX_BLOCK_SIZE] {
        &mut self.fblock.0
    }

    pub fn fill(&mut self, value: f32) {
        self.fblock.0.fill(value);
    }
}

impl Default for FloatBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FloatBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FloatBuffer")
            .field("intact", &self.check())
            .finish_non_exhaustive()
    }
}

/// Shared block of silence for unconnected inputs.
pub(crate) static ZERO_BLOCK: [f32; MAX_BLOCK_SIZE] = [0.0; MAX_BLOCK_SIZE];
