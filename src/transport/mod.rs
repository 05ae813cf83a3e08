//! Adapters connecting the pipeline to concrete log sources and destinations.

pub mod http;
pub mod memory;

pub use http::{HttpCommandEndpoint, HttpLogSource, HttpOptions};
pub use memory::{MemoryCommandEndpoint, MemoryLogSource};
