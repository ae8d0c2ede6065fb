//! Storage seams of the pipeline: staging buffer and target tables.

pub mod base;
pub mod memory;

pub use base::{BufferStore, TargetStore};
pub use memory::MemoryStore;
