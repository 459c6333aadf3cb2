//! Engine configuration.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::MAX_BLOCK_SIZE;

pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;
pub const DEFAULT_BLOCK_SIZE: usize = 128;
pub const DEFAULT_MAX_PROCESSORS: usize = 256;

/// How the render thread decides when to render the next block.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pacing {
    /// One block per block duration of wall clock time.
    #[default]
    WallClock,
    /// Render whenever the output ring has room for a block.
    OutputRing,
    /// Render as fast as possible, for offline use and benchmarks.
    FreeRun,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub sample_rate: u32,
    /// Frames per render cycle.
    pub block_size: usize,
    /// Processor slots reserved up front.
    pub max_processors: usize,
    /// Capacity of the output ring in blocks.
    pub output_ring_blocks: usize,
    pub pacing: Pacing,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            block_size: DEFAULT_BLOCK_SIZE,
            max_processors: DEFAULT_MAX_PROCESSORS,
            output_ring_blocks: 8,
            pacing: Pacing::default(),
        }
    }
}

impl EngineConfig {
    /// Clamp every field into its legal range.
    pub fn validated(mut self) -> Self {
        self.sample_rate = self.sample_rate.clamp(8_000, 384_000);
        self.block_size = self.block_size.clamp(1, MAX_BLOCK_SIZE);
        self.max_processors = self.max_processors.max(1);
        self.output_ring_blocks = self.output_ring_blocks.max(2);
        self
    }

    /// Duration of one block in seconds.
    pub fn block_seconds(&self) -> f64 {
        self.block_size as f64 / self.sample_rate as f64
    }
}
