//! Core model for versioned, resumable fan-out sessions.
//!
//! This crate provides the fundamental building blocks:
//! - `BaseMessage` - A versioned, timestamped payload
//! - `frame` - Broadcast frame and stored body encoding
//! - `SessionKeys` - Store resource names for a session
//! - `LogStore`, `BroadcastTransport`, `Client` - Collaborator traits
//! - `EngineConfig` - Collaborators and tunables
//! - `StreamClient` - A client backed by an async stream

pub mod config;
pub mod frame;
pub mod keys;
pub mod message;
pub mod stream_client;
pub mod traits;

pub use config::EngineConfig;
pub use keys::SessionKeys;
pub use message::{BaseMessage, now_nanos};
pub use stream_client::{ClientStream, Delivery, StreamClient};
pub use traits::{
    BroadcastTransport, ChannelHandler, Client, LogStore, StoreError, SubscriptionId,
    TransportError,
};
