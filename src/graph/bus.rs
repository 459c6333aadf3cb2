//! Audio buses and speaker arrangements.

use std::fmt;
use std::ops::{BitAnd, BitOr};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::buffer::FloatBuffer;
use super::ProcessorId;
use crate::loft::LoftBox;

/// Speaker positions carried by a bus, one bit per channel plus flags.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SpeakerArrangement(pub u64);

impl SpeakerArrangement {
    pub const NONE: Self = Self(0);
    pub const FRONT_LEFT: Self = Self(0x1);
    pub const FRONT_RIGHT: Self = Self(0x2);
    pub const FRONT_CENTER: Self = Self(0x4);
    pub const LOW_FREQUENCY: Self = Self(0x8);
    pub const BACK_LEFT: Self = Self(0x10);
    pub const BACK_RIGHT: Self = Self(0x20);
    /// Flag for side-chain style auxiliary buses, not a channel.
    pub const AUX: Self = Self(1 << 40);

    pub const MONO: Self = Self::FRONT_LEFT;
    pub const STEREO: Self = Self(Self::FRONT_LEFT.0 | Self::FRONT_RIGHT.0);

    const CHANNEL_MASK: u64 = (1 << 32) - 1;

    pub const fn count_channels(self) -> u32 {
        (self.0 & Self::CHANNEL_MASK).count_ones()
    }

    pub const fn is_aux(self) -> bool {
        self.0 & Self::AUX.0 != 0
    }

    /// Channel bits only.
    pub const fn channels(self) -> Self {
        Self(self.0 & Self::CHANNEL_MASK)
    }
}

impl BitOr for SpeakerArrangement {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitAnd for SpeakerArrangement {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

/// Index of an input bus of a processor.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IBusId(pub u32);

/// Index of an output bus of a processor.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OBusId(pub u32);

impl IBusId {
    /// Returned for rejected declarations. Never names a bus.
    pub const INVALID: Self = Self(u32::MAX);
}

impl OBusId {
    /// Returned for rejected declarations. Never names a bus.
    pub const INVALID: Self = Self(u32::MAX);
}

impl fmt::Display for IBusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ibus#{}", self.0)
    }
}

impl fmt::Display for OBusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obus#{}", self.0)
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusInfo {
    pub ident: String,
    pub label: String,
    pub speakers: SpeakerArrangement,
}

impl BusInfo {
    pub fn n_channels(&self) -> u32 {
        self.speakers.count_channels()
    }
}

/// Whether `output` may feed `input`: the input must not carry more
/// channels than the output, except for mono into stereo fan-out.
pub fn channels_compatible(input: SpeakerArrangement, output: SpeakerArrangement) -> bool {
    let (ni, no) = (input.count_channels(), output.count_channels());
    ni <= no || (ni == 2 && no == 1)
}

#[derive(Debug)]
pub(crate) struct InputBus {
    pub info: BusInfo,
    pub source: Option<(ProcessorId, OBusId)>,
}

#[derive(Debug)]
pub(crate) struct OutputBus {
    pub info: BusInfo,
    pub buffers: Vec<LoftBox<'static, FloatBuffer>>,
    /// Number of inputs currently linked to this bus.
    pub connections: u32,
}

impl OutputBus {
    /// Output channel read by input channel `channel`. Stereo reads of a
    /// mono bus both map to channel 0.
    pub fn source_channel(&self, channel: usize) -> usize {
        channel.min(self.buffers.len().saturating_sub(1))
    }
}
