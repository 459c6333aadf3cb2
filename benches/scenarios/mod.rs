//! Processor chains rendered the way the engine renders them.

mod graph;

pub use graph::{bench_engine, bench_graph};
