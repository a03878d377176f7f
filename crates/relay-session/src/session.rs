//! Session: message cache, live dispatch, resync and membership.

use std::{
    collections::HashMap,
    ptr,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use relay_core::{
    BaseMessage, ChannelHandler, Client, EngineConfig, SessionKeys, StoreError, SubscriptionId,
    TransportError, frame, now_nanos,
};
use tokio::sync::Mutex;

use crate::{
    cache::{Accept, MessageCache},
    registry::SessionMap,
};

/// Session error.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Message engine not initialized")]
    Uninitialized,
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Session closed: {0}")]
    Closed(String),
    #[error("No free session id after {0} attempts")]
    IdsExhausted(usize),
}

/// A registered client and the version it had seen when it joined.
struct Member {
    client: Arc<dyn Client>,
    floor: u64,
}

impl Member {
    fn recv(&self, msg: &BaseMessage) {
        if msg.version > self.floor {
            self.client.recv(msg);
        }
    }

    /// Deliver the part of a batch starting at `first` that lies above the floor.
    fn recv_bulk(&self, first: u64, batch: &[Option<BaseMessage>]) {
        let seen = self.floor.saturating_add(1).saturating_sub(first);
        let skip = usize::try_from(seen).unwrap_or(usize::MAX);
        if let Some(rest) = batch.get(skip..).filter(|rest| !rest.is_empty()) {
            self.client.recv_bulk(first + seen, rest);
        }
    }
}

/// Result of reading the store past the high-water mark.
struct CatchUp {
    /// Version of `batch[0]`.
    first: u64,
    batch: Vec<Option<BaseMessage>>,
    /// Store counter at the time of the read.
    remote_max: u64,
}

/// One named channel and everything this process knows about it.
///
/// Lock order is cache then clients. Live dispatch, resync and join hold
/// both; leave holds only the clients lock.
pub struct Session {
    id: String,
    keys: SessionKeys,
    config: EngineConfig,
    cache: Mutex<MessageCache>,
    clients: Mutex<HashMap<String, Member>>,
    holders: AtomicUsize,
    closed: AtomicBool,
    subscription: Mutex<Option<SubscriptionId>>,
    last_used: AtomicI64,
    sessions: Weak<SessionMap>,
    this: Weak<Session>,
}

impl Session {
    /// Create a session and subscribe it to its channel.
    ///
    /// The transport calls back into `resync` once the subscription is live.
    ///
    /// # Errors
    /// Returns error if the store is unreachable or the subscription fails.
    pub(crate) async fn open(
        id: &str,
        config: EngineConfig,
        sessions: Weak<SessionMap>,
    ) -> Result<Arc<Self>, SessionError> {
        config.store.ping().await?;

        let session = Arc::new_cyclic(|this| Self {
            id: id.to_string(),
            keys: SessionKeys::new(id),
            config,
            cache: Mutex::new(MessageCache::new()),
            clients: Mutex::new(HashMap::new()),
            holders: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            subscription: Mutex::new(None),
            last_used: AtomicI64::new(now_nanos()),
            sessions,
            this: this.clone(),
        });

        let handler = Arc::new(SessionHandler {
            session: Arc::downgrade(&session),
        });
        let subscription = session
            .config
            .transport
            .subscribe(&session.keys.channel, handler)
            .await?;
        *session.subscription.lock().await = Some(subscription);

        tracing::info!(session = %session.id, "Session opened");
        Ok(session)
    }

    /// Session identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Store resource names for this session.
    #[must_use]
    pub const fn keys(&self) -> &SessionKeys {
        &self.keys
    }

    /// Whether the session has been torn down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Last send or join, nanoseconds since the Unix epoch.
    #[must_use]
    pub fn last_used(&self) -> i64 {
        self.last_used.load(Ordering::Relaxed)
    }

    /// Highest version this process has accounted for.
    pub async fn max_version(&self) -> u64 {
        self.cache.lock().await.max_version()
    }

    /// Number of registered clients.
    pub async fn client_count(&self) -> usize {
        self.clients.lock().await.len()
    }

    /// Send a payload to every subscriber of the session, this process included.
    ///
    /// The body is stored before the frame is published, so a subscriber that
    /// misses the frame can always recover it through resync. Local clients
    /// see the message only when the transport delivers it back.
    ///
    /// # Errors
    /// Returns error if the store or the transport fails. Nothing is retried.
    pub async fn send(&self, data: impl Into<Bytes>) -> Result<u64, SessionError> {
        let data = data.into();
        let store = &self.config.store;

        let version = store.incr(&self.keys.max_version).await?;
        let frame = frame::encode_frame(version, now_nanos(), &data);
        store
            .put_body(&self.keys.bodies, version, frame::body_of(&frame))
            .await?;
        self.config
            .transport
            .publish(&self.keys.channel, frame)
            .await?;

        self.touch();
        Ok(version)
    }

    /// Register a client that has seen everything up to `start_version`.
    ///
    /// The client first receives the cached backlog after `start_version` as
    /// one bulk delivery, then live messages. Nothing at or below
    /// `start_version` is delivered, even when this process has not caught up
    /// to it yet. Re-joining under an existing id replaces the previous client.
    ///
    /// # Errors
    /// Returns `SessionError::Closed` if the session was torn down.
    pub async fn join(
        &self,
        client_id: &str,
        client: Arc<dyn Client>,
        start_version: u64,
    ) -> Result<(), SessionError> {
        let cache = self.cache.lock().await;
        let backlog = cache.backlog(start_version);
        let mut clients = self.clients.lock().await;
        drop(cache);

        if self.is_closed() {
            return Err(SessionError::Closed(self.id.clone()));
        }
        if !backlog.is_empty() {
            client.recv_bulk(start_version + 1, &backlog);
        }
        let member = Member {
            client,
            floor: start_version,
        };
        if clients.insert(client_id.to_string(), member).is_some() {
            tracing::debug!(session = %self.id, client = client_id, "Replaced client");
        }

        self.touch();
        tracing::debug!(
            session = %self.id,
            client = client_id,
            start_version,
            backlog = backlog.len(),
            "Client joined"
        );
        Ok(())
    }

    /// Remove a client. The last client out tears the session down.
    ///
    /// Returns whether the client was registered.
    ///
    /// # Errors
    /// Returns error if unsubscribing fails during teardown.
    pub async fn leave(&self, client_id: &str) -> Result<bool, SessionError> {
        let teardown = {
            let mut clients = self.clients.lock().await;
            if clients.remove(client_id).is_none() {
                return Ok(false);
            }
            clients.is_empty() && !self.closed.swap(true, Ordering::AcqRel)
        };
        tracing::debug!(session = %self.id, client = client_id, "Client left");

        if teardown {
            self.teardown().await?;
        }
        Ok(true)
    }

    pub(crate) fn hold(&self) {
        self.holders.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns true when the last holder let go.
    pub(crate) fn release(&self) -> bool {
        self.holders.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// Tear the session down if nobody joined it and nobody holds it.
    ///
    /// # Errors
    /// Returns error if unsubscribing fails.
    pub(crate) async fn close_if_idle(&self) -> Result<bool, SessionError> {
        {
            let clients = self.clients.lock().await;
            if !clients.is_empty()
                || self.holders.load(Ordering::Acquire) > 0
                || self.closed.swap(true, Ordering::AcqRel)
            {
                return Ok(false);
            }
        }
        tracing::debug!(session = %self.id, "Closing session nobody joined");
        self.teardown().await?;
        Ok(true)
    }

    /// Tear the session down regardless of membership.
    ///
    /// # Errors
    /// Returns error if unsubscribing fails.
    pub async fn close(&self) -> Result<(), SessionError> {
        {
            let _clients = self.clients.lock().await;
            if self.closed.swap(true, Ordering::AcqRel) {
                return Ok(());
            }
        }
        self.teardown().await
    }

    /// Fetch everything the store holds beyond what this process has seen and
    /// deliver it to every client as one batch.
    ///
    /// Runs with the cache locked, so live frames wait until the batch is out.
    /// Returns the size of the delivered batch.
    ///
    /// # Errors
    /// Returns error if the store fails.
    pub async fn resync(&self) -> Result<usize, SessionError> {
        let mut cache = self.cache.lock().await;
        let CatchUp { first, batch, .. } = self.catch_up(&mut cache).await?;
        if cache.arm_gap_timer() {
            self.spawn_gap_timer();
        }
        self.deliver_bulk(first, &batch).await;

        tracing::debug!(
            session = %self.id,
            delivered = batch.len(),
            max_version = cache.max_version(),
            "Resynced"
        );
        Ok(batch.len())
    }

    /// Resync, then give up on versions still missing before the oldest
    /// buffered frame.
    ///
    /// Buffered frames above the store's counter were never handed out and
    /// are dropped.
    ///
    /// # Errors
    /// Returns error if the store fails.
    pub async fn fill_gap(&self) -> Result<usize, SessionError> {
        let mut cache = self.cache.lock().await;
        let CatchUp {
            first,
            mut batch,
            remote_max,
        } = self.catch_up(&mut cache).await?;
        let bogus = cache.discard_pending_above(remote_max);
        if bogus > 0 {
            tracing::debug!(
                session = %self.id,
                remote_max,
                dropped = bogus,
                "Dropping frames beyond the store counter"
            );
        }
        batch.extend(cache.skip_gap());
        if cache.arm_gap_timer() {
            self.spawn_gap_timer();
        }
        self.deliver_bulk(first, &batch).await;

        tracing::debug!(session = %self.id, delivered = batch.len(), "Gap filled");
        Ok(batch.len())
    }

    /// Apply one frame delivered by the transport.
    pub async fn receive(&self, frame: Bytes) {
        let msg = match frame::decode_frame(&frame) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(session = %self.id, "Dropping malformed frame: {e}");
                return;
            }
        };
        let version = msg.version;

        let mut cache = self.cache.lock().await;
        let accepted = cache.accept(msg);
        match accepted {
            Accept::Ready(ready) => {
                let clients = self.clients.lock().await;
                for msg in &ready {
                    for member in clients.values() {
                        member.recv(msg);
                    }
                }
            }
            Accept::Duplicate | Accept::Stale => {
                tracing::trace!(session = %self.id, version, "Dropping already delivered frame");
            }
            Accept::Buffered { pending } if pending > self.config.reorder_window => {
                drop(cache);
                tracing::debug!(session = %self.id, version, pending, "Reorder window full");
                if let Err(e) = self.fill_gap().await {
                    tracing::warn!(session = %self.id, "Gap fill failed: {e}");
                }
            }
            Accept::Buffered { pending } => {
                tracing::trace!(session = %self.id, version, pending, "Buffered out-of-order frame");
                if cache.arm_gap_timer() {
                    self.spawn_gap_timer();
                }
            }
        }
    }

    async fn catch_up(&self, cache: &mut MessageCache) -> Result<CatchUp, SessionError> {
        let store = &self.config.store;
        let start = if cache.max_version() > 0 {
            cache.max_version()
        } else {
            store.get_counter(&self.keys.min_version).await?
        };
        let remote_max = store.get_counter(&self.keys.max_version).await?;
        let first = cache.max_version().max(start).saturating_add(1);
        if remote_max <= start {
            let batch = cache.apply_resync(start, Vec::new());
            return Ok(CatchUp {
                first,
                batch,
                remote_max,
            });
        }

        let bodies = store
            .get_bodies(&self.keys.bodies, start + 1..=remote_max)
            .await?;
        let slots = bodies
            .into_iter()
            .zip(start + 1..)
            .map(|(body, version)| {
                body.and_then(|body| match frame::decode_body(version, &body) {
                    Ok(msg) => Some(msg),
                    Err(e) => {
                        tracing::debug!(session = %self.id, version, "Unreadable stored body: {e}");
                        None
                    }
                })
            })
            .collect();
        let batch = cache.apply_resync(start, slots);
        Ok(CatchUp {
            first,
            batch,
            remote_max,
        })
    }

    async fn deliver_bulk(&self, first: u64, batch: &[Option<BaseMessage>]) {
        if batch.is_empty() {
            return;
        }
        let clients = self.clients.lock().await;
        for member in clients.values() {
            member.recv_bulk(first, batch);
        }
    }

    fn spawn_gap_timer(&self) {
        let session = self.this.clone();
        let timeout = self.config.reorder_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(session) = session.upgrade() else {
                return;
            };
            session.cache.lock().await.disarm_gap_timer();
            if let Err(e) = session.fill_gap().await {
                tracing::warn!(session = %session.id, "Gap fill failed: {e}");
            }
        });
    }

    async fn teardown(&self) -> Result<(), SessionError> {
        if let Some(sessions) = self.sessions.upgrade() {
            sessions.remove_if(&self.id, |_, slot| {
                slot.get().is_some_and(|s| ptr::eq(Arc::as_ptr(s), self))
            });
        }

        let subscription = self.subscription.lock().await.take();
        if let Some(subscription) = subscription {
            self.config.transport.unsubscribe(subscription).await?;
        }

        tracing::info!(session = %self.id, "Session closed");
        Ok(())
    }

    fn touch(&self) {
        self.last_used.store(now_nanos(), Ordering::Relaxed);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Transport callbacks for one session.
struct SessionHandler {
    session: Weak<Session>,
}

#[async_trait]
impl ChannelHandler for SessionHandler {
    async fn on_resume(&self) {
        let Some(session) = self.session.upgrade() else {
            return;
        };
        if let Err(e) = session.resync().await {
            tracing::warn!(session = %session.id, "Resync failed: {e}");
        }
    }

    async fn on_message(&self, frame: Bytes) {
        if let Some(session) = self.session.upgrade() {
            session.receive(frame).await;
        }
    }
}
