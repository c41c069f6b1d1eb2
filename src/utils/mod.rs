//! Shared utilities

pub mod parallel;

pub use parallel::{chunk_ranges, ParallelExecutor, Serial};
