//! The processor graph owned by the render thread.
//!
//! Processors are created on the control thread, initialized there, and then
//! handed to the render thread through an async job. From then on the render
//! thread owns the processor's DSP state, buses and event streams, while the
//! control thread keeps a [`ProcessorHandle`] to the parts that are safe to
//! share: parameters, flags and static bus metadata.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Cache aligned, canary guarded sample blocks.
pub mod buffer;
/// Speaker arrangements and bus bookkeeping.
pub mod bus;
/// Graph storage, connections and rendering.
pub mod network;
/// Parameter metadata and atomic parameter state.
pub mod param;
/// The `Processor` trait, setup and render contexts.
pub mod processor;
/// Topological ordering of reachable processors.
pub mod schedule;
/// State shared between the control and render threads.
pub mod shared;

pub use buffer::FloatBuffer;
pub use bus::{channels_compatible, BusInfo, IBusId, OBusId, SpeakerArrangement};
pub use network::ProcessorGraph;
pub use param::{ChoiceEntry, Param, ParamId, ParamInfo};
pub use processor::{Processor, RenderIo, Setup};
pub use shared::{ProcessorFlags, ProcessorHandle};

/// Identifies a processor for the lifetime of its engine.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessorId(pub u32);

impl ProcessorId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ProcessorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "proc#{}", self.0)
    }
}
