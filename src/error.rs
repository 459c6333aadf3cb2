//! Error types for the allocator, the graph, the engine and the registry.

use thiserror::Error;

use crate::graph::{IBusId, OBusId, ProcessorId};

/// Loft allocation and configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoftError {
    #[error("alignment of {0} bytes is not supported, the limit is 64")]
    UnsupportedAlignment(usize),

    #[error("allocation of {0} bytes exceeds the largest size class")]
    UnsupportedSize(usize),

    #[error("allocation size overflows: {nelem} x {elemsize} bytes")]
    SizeOverflow { nelem: usize, elemsize: usize },

    #[error("arena memory exhausted while allocating {0} bytes")]
    OutOfMemory(usize),

    #[error("low memory notifier is already installed")]
    NotifierInstalled,
}

/// Invalid graph edits.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("unknown processor {0}")]
    UnknownProcessor(ProcessorId),

    #[error("processor {processor} has no input bus {bus}")]
    UnknownInputBus { processor: ProcessorId, bus: IBusId },

    #[error("processor {processor} has no output bus {bus}")]
    UnknownOutputBus { processor: ProcessorId, bus: OBusId },

    #[error("cannot feed a {output} channel output into a {input} channel input")]
    ChannelMismatch { input: u32, output: u32 },

    #[error("connecting to processor {0} would create a cycle")]
    Cycle(ProcessorId),

    #[error("processor {0} has no event input")]
    NoEventInput(ProcessorId),

    #[error("processor {0} has no event output")]
    NoEventOutput(ProcessorId),

    #[error("processor {0} is already part of the graph")]
    DuplicateProcessor(ProcessorId),

    #[error("graph is full, it holds at most {capacity} processors")]
    CapacityExceeded { capacity: usize },

    #[error("failed to allocate bus buffers: {0}")]
    Allocation(#[from] LoftError),
}

/// Engine lifecycle errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("engine is already running")]
    AlreadyRunning,

    #[error("engine is not running")]
    NotRunning,

    #[error("failed to spawn render thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("render thread panicked")]
    RenderThreadPanicked,

    #[error("engine shut down before the job completed")]
    Disconnected,
}

/// Processor registry errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("processor type '{0}' is already registered")]
    Duplicate(String),

    #[error("unknown processor type '{0}'")]
    Unknown(String),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Loft(#[from] LoftError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
