//! Lock-free building blocks shared by the allocator and the engine.
//!
//! Nothing in here allocates or blocks. Node lifetime for the intrusive
//! containers is always the caller's business.

pub mod bits;
pub mod mpmc;
pub mod stack;

pub use bits::AtomicBits;
pub use mpmc::MpmcStack;
pub use stack::{AtomicIntrusiveStack, Chain, Linked};
