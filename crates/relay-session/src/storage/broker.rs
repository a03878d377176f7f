//! In-memory broadcast transport.
//!
//! A `MemoryBroker` is the shared hub; each process (or registry under test)
//! gets its own `MemoryTransport` connection from `connect`.

use std::{
    collections::HashMap,
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use relay_core::{BroadcastTransport, ChannelHandler, SubscriptionId, TransportError};

struct Subscriber {
    id: SubscriptionId,
    connection: u64,
    handler: Arc<dyn ChannelHandler>,
}

#[derive(Default)]
struct BrokerInner {
    channels: RwLock<HashMap<String, Vec<Subscriber>>>,
    online: RwLock<HashMap<u64, bool>>,
    next_id: AtomicU64,
}

impl BrokerInner {
    fn is_online(&self, connection: u64) -> bool {
        self.online
            .read()
            .map(|online| online.get(&connection).copied().unwrap_or(false))
            .unwrap_or(false)
    }
}

/// Shared in-memory pub/sub hub.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

impl MemoryBroker {
    /// Create a new broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a connection to the broker.
    #[must_use]
    pub fn connect(&self) -> MemoryTransport {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut online) = self.inner.online.write() {
            online.insert(id, true);
        }
        MemoryTransport {
            inner: Arc::clone(&self.inner),
            connection: id,
            connected: AtomicBool::new(true),
        }
    }

    /// Number of live subscriptions on a channel, across connections.
    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .channels
            .read()
            .map(|channels| channels.get(channel).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

/// One connection to a `MemoryBroker`.
///
/// Frames are delivered synchronously inside `publish`. While disconnected,
/// frames addressed to this connection are dropped, as a real broker would
/// during an outage.
pub struct MemoryTransport {
    inner: Arc<BrokerInner>,
    connection: u64,
    connected: AtomicBool,
}

impl MemoryTransport {
    /// Whether the connection is up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Drop the connection. Subscriptions survive and resume on `reconnect`.
    pub fn disconnect(&self) {
        self.set_online(false);
        tracing::debug!(connection = self.connection, "Memory transport disconnected");
    }

    /// Restore the connection and resume every subscription on it.
    pub async fn reconnect(&self) {
        self.set_online(true);
        tracing::debug!(connection = self.connection, "Memory transport reconnected");
        for handler in self.own_handlers() {
            handler.on_resume().await;
        }
    }

    fn set_online(&self, online: bool) {
        self.connected.store(online, Ordering::Release);
        if let Ok(mut map) = self.inner.online.write() {
            map.insert(self.connection, online);
        }
    }

    fn own_handlers(&self) -> Vec<Arc<dyn ChannelHandler>> {
        self.inner
            .channels
            .read()
            .map(|channels| {
                channels
                    .values()
                    .flatten()
                    .filter(|s| s.connection == self.connection)
                    .map(|s| Arc::clone(&s.handler))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        if let Ok(mut channels) = self.inner.channels.write() {
            for subscribers in channels.values_mut() {
                subscribers.retain(|s| s.connection != self.connection);
            }
            channels.retain(|_, subscribers| !subscribers.is_empty());
        }
        if let Ok(mut online) = self.inner.online.write() {
            online.remove(&self.connection);
        }
    }
}

#[async_trait]
impl BroadcastTransport for MemoryTransport {
    async fn subscribe(
        &self,
        channel: &str,
        handler: Arc<dyn ChannelHandler>,
    ) -> Result<SubscriptionId, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .channels
            .write()
            .map_err(|e| TransportError::Internal(e.to_string()))?
            .entry(channel.to_string())
            .or_default()
            .push(Subscriber {
                id,
                connection: self.connection,
                handler: Arc::clone(&handler),
            });

        handler.on_resume().await;
        Ok(id)
    }

    async fn publish(&self, channel: &str, frame: Bytes) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let handlers: Vec<Arc<dyn ChannelHandler>> = self
            .inner
            .channels
            .read()
            .map_err(|e| TransportError::Internal(e.to_string()))?
            .get(channel)
            .map(|subscribers| {
                subscribers
                    .iter()
                    .filter(|s| self.inner.is_online(s.connection))
                    .map(|s| Arc::clone(&s.handler))
                    .collect()
            })
            .unwrap_or_default();

        for handler in handlers {
            handler.on_message(frame.clone()).await;
        }
        Ok(())
    }

    async fn unsubscribe(&self, subscription: SubscriptionId) -> Result<(), TransportError> {
        let mut channels = self
            .inner
            .channels
            .write()
            .map_err(|e| TransportError::Internal(e.to_string()))?;

        let mut found = false;
        for subscribers in channels.values_mut() {
            let before = subscribers.len();
            subscribers.retain(|s| !(s.id == subscription && s.connection == self.connection));
            found |= subscribers.len() != before;
        }
        channels.retain(|_, subscribers| !subscribers.is_empty());

        if found {
            Ok(())
        } else {
            Err(TransportError::UnknownSubscription(subscription))
        }
    }
}
