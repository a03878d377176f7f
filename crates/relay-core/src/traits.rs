//! Collaborator contracts: durable log store, broadcast transport, clients.

use std::{ops::RangeInclusive, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::BaseMessage;

/// Log store error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Store error: {0}")]
    Internal(String),
}

/// Durable keyed store backing a session's version counter and bodies.
///
/// Must be safe for concurrent use by every session in the process.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Check the store is reachable.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Atomically increment a counter and return the new value.
    async fn incr(&self, key: &str) -> Result<u64, StoreError>;

    /// Read a counter or marker. Missing keys read as 0.
    async fn get_counter(&self, key: &str) -> Result<u64, StoreError>;

    /// Store a body under `version` in `table`.
    async fn put_body(&self, table: &str, version: u64, body: Bytes) -> Result<(), StoreError>;

    /// Fetch the bodies for every version in `versions`, in order.
    ///
    /// The result has one slot per version; `None` when the store holds nothing.
    async fn get_bodies(
        &self,
        table: &str,
        versions: RangeInclusive<u64>,
    ) -> Result<Vec<Option<Bytes>>, StoreError>;

    /// Whether any value exists under `key`.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;
}

/// Handle for one subscription on a transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Transport error.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport not connected")]
    NotConnected,
    #[error("Unknown subscription: {0:?}")]
    UnknownSubscription(SubscriptionId),
    #[error("Transport error: {0}")]
    Internal(String),
}

/// Callbacks a transport invokes for one subscription.
#[async_trait]
pub trait ChannelHandler: Send + Sync {
    /// The subscription was established or re-established.
    async fn on_resume(&self);

    /// A frame was delivered on the channel.
    async fn on_message(&self, frame: Bytes);
}

/// Pub/sub transport for live frames. Not assumed durable.
///
/// Reconnection is the transport's concern; after connectivity returns it
/// must call `on_resume` for each live subscription.
#[async_trait]
pub trait BroadcastTransport: Send + Sync {
    /// Subscribe to a channel. Implementations call `on_resume` once the
    /// subscription is live.
    async fn subscribe(
        &self,
        channel: &str,
        handler: Arc<dyn ChannelHandler>,
    ) -> Result<SubscriptionId, TransportError>;

    /// Publish a frame to every subscriber of a channel.
    async fn publish(&self, channel: &str, frame: Bytes) -> Result<(), TransportError>;

    /// Drop a subscription.
    async fn unsubscribe(&self, subscription: SubscriptionId) -> Result<(), TransportError>;
}

/// A consumer attached to a session.
///
/// Callbacks run while the session holds its locks, so they should hand
/// work off quickly. A slow client delays its peers.
pub trait Client: Send + Sync {
    /// Deliver one message.
    fn recv(&self, msg: &BaseMessage);

    /// Deliver a batch in order. Slot `i` holds version `first + i`;
    /// `None` marks a version with no data available.
    fn recv_bulk(&self, _first: u64, msgs: &[Option<BaseMessage>]) {
        for msg in msgs.iter().flatten() {
            self.recv(msg);
        }
    }
}
