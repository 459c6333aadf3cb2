//! Benchmarks for the lock-free building blocks.

mod loft;
mod stacks;

pub use loft::bench_loft;
pub use stacks::bench_stacks;
