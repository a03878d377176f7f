//! Versioned, resumable fan-out sessions.
//!
//! Provides:
//! - `Session` - Message cache, live dispatch, resync and membership
//! - `Registry` - One session per id for the process
//! - In-memory store and broker (feature: memory)

pub mod cache;
pub mod registry;
pub mod session;
pub mod storage;

#[cfg(all(test, feature = "memory"))]
mod testing;

pub use cache::MessageCache;
pub use registry::{Registry, SessionHandle};
pub use session::{Session, SessionError};
