//! In-memory collaborator implementations.

#[cfg(feature = "memory")]
pub mod broker;

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "memory")]
pub use broker::{MemoryBroker, MemoryTransport};

#[cfg(feature = "memory")]
pub use memory::MemoryLogStore;
