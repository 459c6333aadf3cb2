//! Realtime audio engine core.
//!
//! - [`sync`]: lock-free stacks and atomic bit sets
//! - [`loft`]: the lock-free bucket allocator used for render memory
//! - [`engine`]: the render thread, its job lanes and notifications
//! - [`graph`]: processors, parameters, buses and scheduling

pub mod debug;
pub mod devices;
pub mod dsp; // Primitives used by the built-in devices
pub mod engine;
pub mod error;
pub mod graph;
pub mod io;
pub mod loft;
pub mod registry;
pub mod sync;

pub use error::{Error, Result};

/// Largest block a processor is ever asked to render.
pub const MAX_BLOCK_SIZE: usize = 2048;
