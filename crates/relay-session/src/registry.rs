//! Process-wide session registry.

use std::{
    ops::Deref,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use dashmap::DashMap;
use relay_core::{Client, EngineConfig, SessionKeys};
use tokio::sync::OnceCell;

use crate::session::{Session, SessionError};

/// Lazily initialized slot for one session id.
pub(crate) type SessionSlot = Arc<OnceCell<Arc<Session>>>;

/// Session id to session.
pub(crate) type SessionMap = DashMap<String, SessionSlot>;

/// A caller's hold on a registry session.
///
/// When the last handle is dropped and the session never gained a client, it
/// is closed and removed from the registry.
#[derive(Debug)]
pub struct SessionHandle {
    session: Arc<Session>,
}

impl SessionHandle {
    fn new(session: Arc<Session>) -> Self {
        session.hold();
        Self { session }
    }

    /// The underlying shared session.
    #[must_use]
    pub const fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

impl Deref for SessionHandle {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl Clone for SessionHandle {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.session))
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if !self.session.release() || self.session.is_closed() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let session = Arc::clone(&self.session);
        runtime.spawn(async move {
            if let Err(e) = session.close_if_idle().await {
                tracing::warn!(session = session.id(), "Failed to close idle session: {e}");
            }
        });
    }
}

/// Registry of live sessions for one process.
///
/// Holds exactly one `Session` (and one transport subscription) per id while
/// that session has members. Independent registries never share sessions.
pub struct Registry {
    config: EngineConfig,
    sessions: Arc<SessionMap>,
    initialized: AtomicBool,
}

impl Registry {
    /// Create a registry. Call `init` before use.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            sessions: Arc::new(DashMap::new()),
            initialized: AtomicBool::new(false),
        }
    }

    /// Confirm the store is reachable and enable the registry.
    ///
    /// # Errors
    /// Returns error if the store cannot be reached.
    pub async fn init(&self) -> Result<(), SessionError> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        self.config.store.ping().await?;
        self.initialized.store(true, Ordering::Release);
        tracing::info!(config = ?self.config, "Message engine initialized");
        Ok(())
    }

    /// Shared configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Get the session for an id, creating and subscribing it if needed.
    ///
    /// Concurrent callers for the same id get the same instance. A session
    /// nobody joins is closed once every handle to it is dropped.
    ///
    /// # Errors
    /// Returns error if the registry is not initialized or the session
    /// cannot be created.
    pub async fn get_session(&self, id: &str) -> Result<SessionHandle, SessionError> {
        self.check_init()?;
        loop {
            let slot = Arc::clone(&*self.sessions.entry(id.to_string()).or_default());
            let created = slot
                .get_or_try_init(|| {
                    Session::open(id, self.config.clone(), Arc::downgrade(&self.sessions))
                })
                .await;

            let session = match created {
                Ok(session) => Arc::clone(session),
                Err(e) => {
                    self.sessions
                        .remove_if(id, |_, s| Arc::ptr_eq(s, &slot) && s.get().is_none());
                    return Err(e);
                }
            };

            if session.is_closed() {
                self.sessions.remove_if(id, |_, s| Arc::ptr_eq(s, &slot));
                continue;
            }
            let current = self
                .sessions
                .get(id)
                .is_some_and(|s| Arc::ptr_eq(s.value(), &slot));
            if current {
                return Ok(SessionHandle::new(session));
            }

            // The slot was dropped by a failed concurrent creation after we
            // initialized it.
            session.close().await?;
        }
    }

    /// Create a session under a fresh id.
    ///
    /// Ids come from the configured generator; an id is taken if this
    /// process has it live or the store already holds its counter.
    ///
    /// # Errors
    /// Returns `SessionError::IdsExhausted` if no free id is found.
    pub async fn new_session(&self) -> Result<(String, SessionHandle), SessionError> {
        self.check_init()?;
        for _ in 0..self.config.id_attempts {
            let id = self.config.make_id();
            if self.sessions.contains_key(&id) {
                continue;
            }
            if self
                .config
                .store
                .exists(&SessionKeys::new(&id).max_version)
                .await?
            {
                continue;
            }
            let session = self.get_session(&id).await?;
            return Ok((id, session));
        }
        Err(SessionError::IdsExhausted(self.config.id_attempts))
    }

    /// Join a client to a session, creating the session if needed.
    ///
    /// # Errors
    /// Returns error if the session cannot be created.
    pub async fn join(
        &self,
        session_id: &str,
        client_id: &str,
        client: Arc<dyn Client>,
        start_version: u64,
    ) -> Result<SessionHandle, SessionError> {
        loop {
            let session = self.get_session(session_id).await?;
            match session.join(client_id, Arc::clone(&client), start_version).await {
                Ok(()) => return Ok(session),
                Err(SessionError::Closed(_)) => {}
                Err(e) => return Err(e),
            }
        }
    }

    /// Remove a client from a session. Returns whether it was a member.
    ///
    /// # Errors
    /// Returns error if teardown of the emptied session fails.
    pub async fn leave(&self, session_id: &str, client_id: &str) -> Result<bool, SessionError> {
        self.check_init()?;
        match self.lookup(session_id) {
            Some(session) => session.leave(client_id).await,
            None => Ok(false),
        }
    }

    /// Live session for an id, without creating one.
    #[must_use]
    pub fn lookup(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions
            .get(id)
            .and_then(|slot| slot.get().cloned())
            .filter(|session| !session.is_closed())
    }

    /// Whether a live session exists for an id.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.lookup(id).is_some()
    }

    /// Number of sessions in the registry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the registry holds no sessions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Close every session.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .filter_map(|slot| slot.get().cloned())
            .collect();
        for session in sessions {
            if let Err(e) = session.close().await {
                tracing::warn!(session = session.id(), "Failed to close session: {e}");
            }
        }
        self.sessions.clear();
    }

    fn check_init(&self) -> Result<(), SessionError> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            tracing::error!("Message engine never initialized");
            Err(SessionError::Uninitialized)
        }
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use std::time::Duration;

    use relay_core::StreamClient;
    use tokio_test::assert_ok;

    use super::*;
    use crate::testing::{Fixture, Recorder};

    async fn registry(fixture: &Fixture) -> Registry {
        let registry = Registry::new(fixture.config());
        registry.init().await.unwrap();
        registry
    }

    async fn wait_for(rec: &Recorder, version: u64) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while rec.last_version() < version && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_canonical_join_send_leave_rejoin() {
        let fixture = Fixture::new();
        let registry = registry(&fixture).await;
        let sess = registry.get_session("s1").await.unwrap();

        let c1 = Recorder::new();
        let c2 = Recorder::new();
        let c3 = Recorder::new();
        sess.join("c1", c1.clone(), 0).await.unwrap();
        sess.join("c2", c2.clone(), 0).await.unwrap();

        sess.send("c1:hello1").await.unwrap();
        sess.send("c2:hello2").await.unwrap();
        sess.send("c1:hello3").await.unwrap();
        sess.send("c2:hello4").await.unwrap();
        sess.send("c1:hello5").await.unwrap();

        for c in [&c1, &c2] {
            assert_eq!(c.versions(), vec![1, 2, 3, 4, 5]);
            assert_eq!(c.froms(), "c1c2c1c2c1");
            assert_eq!(c.texts(), "hello1hello2hello3hello4hello5");
        }

        sess.send("c2:hello6").await.unwrap();
        sess.send("c1:hello7").await.unwrap();
        assert_eq!(c1.versions(), (1..=7).collect::<Vec<_>>());
        assert_eq!(c2.versions(), (1..=7).collect::<Vec<_>>());

        sess.join("c3", c3.clone(), 0).await.unwrap();
        assert_eq!(c3.versions(), (1..=7).collect::<Vec<_>>());

        sess.send("c3:hello8").await.unwrap();
        assert_eq!(c1.versions(), (1..=8).collect::<Vec<_>>());
        assert_eq!(c2.froms(), "c1c2c1c2c1c2c1c3");
        assert_eq!(
            c3.texts(),
            "hello1hello2hello3hello4hello5hello6hello7hello8"
        );

        sess.send("c1:hello9").await.unwrap();
        sess.send("c2:hello10").await.unwrap();
        assert!(sess.leave("c2").await.unwrap());
        sess.send("c2:hello11").await.unwrap();

        assert_eq!(c1.versions(), (1..=11).collect::<Vec<_>>());
        assert_eq!(c2.versions(), (1..=10).collect::<Vec<_>>());
        assert_eq!(c3.versions(), (1..=11).collect::<Vec<_>>());

        sess.send("c1:hello12").await.unwrap();
        sess.join("c2", c2.clone(), c2.last_version()).await.unwrap();
        sess.send("c3:hello13").await.unwrap();

        let all: Vec<u64> = (1..=13).collect();
        assert_eq!(c1.versions(), all);
        assert_eq!(c2.versions(), all);
        assert_eq!(c3.versions(), all);
    }

    #[tokio::test]
    async fn test_uninitialized_registry_rejects_use() {
        let fixture = Fixture::new();
        let registry = Registry::new(fixture.config());

        assert!(matches!(
            registry.get_session("s").await,
            Err(SessionError::Uninitialized)
        ));
        assert!(matches!(
            registry.new_session().await,
            Err(SessionError::Uninitialized)
        ));
        assert_eq!(fixture.broker.subscriber_count("msg:ch:s"), 0);
    }

    #[tokio::test]
    async fn test_init_fails_on_unreachable_store() {
        let fixture = Fixture::new();
        fixture.store.set_available(false);
        let registry = Registry::new(fixture.config());

        assert!(matches!(registry.init().await, Err(SessionError::Store(_))));
        assert!(matches!(
            registry.get_session("s").await,
            Err(SessionError::Uninitialized)
        ));
    }

    #[tokio::test]
    async fn test_get_session_returns_same_instance() {
        let fixture = Fixture::new();
        let registry = registry(&fixture).await;

        let a = registry.get_session("s").await.unwrap();
        let b = registry.get_session("s").await.unwrap();
        assert!(Arc::ptr_eq(a.session(), b.session()));
        assert_eq!(registry.len(), 1);
        assert_eq!(fixture.broker.subscriber_count("msg:ch:s"), 1);
    }

    #[tokio::test]
    async fn test_concurrent_get_session_subscribes_once() {
        let fixture = Fixture::new();
        let registry = Arc::new(registry(&fixture).await);

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.get_session("s").await.unwrap() })
            })
            .collect();
        let mut sessions = Vec::new();
        for task in tasks {
            sessions.push(task.await.unwrap());
        }

        assert!(
            sessions
                .windows(2)
                .all(|w| Arc::ptr_eq(w[0].session(), w[1].session()))
        );
        assert_eq!(fixture.broker.subscriber_count("msg:ch:s"), 1);
    }

    #[tokio::test]
    async fn test_failed_creation_leaves_no_entry() {
        let fixture = Fixture::new();
        let registry = registry(&fixture).await;
        fixture.store.set_available(false);

        assert!(registry.get_session("s").await.is_err());
        assert!(registry.is_empty());

        fixture.store.set_available(true);
        assert_ok!(registry.get_session("s").await);
    }

    #[tokio::test]
    async fn test_empty_session_is_removed_and_rebuilt_from_store() {
        let fixture = Fixture::new();
        let registry = registry(&fixture).await;

        let c1 = Recorder::new();
        let first = registry.join("s", "c1", c1.clone(), 0).await.unwrap();
        first.send("c1:a").await.unwrap();
        first.send("c1:b").await.unwrap();

        assert!(registry.leave("s", "c1").await.unwrap());
        assert!(first.is_closed());
        assert!(!registry.contains("s"));
        assert!(registry.is_empty());
        assert_eq!(fixture.broker.subscriber_count("msg:ch:s"), 0);

        let c2 = Recorder::new();
        let second = registry.join("s", "c2", c2.clone(), 0).await.unwrap();
        assert!(!Arc::ptr_eq(first.session(), second.session()));
        assert_eq!(c2.versions(), vec![1, 2]);
        assert_eq!(c2.texts(), "ab");
        assert_eq!(fixture.broker.subscriber_count("msg:ch:s"), 1);
    }

    #[tokio::test]
    async fn test_stale_handle_join_goes_to_fresh_session() {
        let fixture = Fixture::new();
        let registry = registry(&fixture).await;

        let stale = registry.join("s", "c1", Recorder::new(), 0).await.unwrap();
        registry.leave("s", "c1").await.unwrap();
        assert!(stale.join("c2", Recorder::new(), 0).await.is_err());

        let fresh = registry.join("s", "c2", Recorder::new(), 0).await.unwrap();
        assert!(!fresh.is_closed());
        assert_eq!(fresh.client_count().await, 1);
    }

    #[tokio::test]
    async fn test_rejoin_at_last_version_has_no_gap_or_duplicate() {
        let fixture = Fixture::new();
        let registry = registry(&fixture).await;

        let stay = Recorder::new();
        let roam = Recorder::new();
        let sess = registry.join("s", "stay", stay.clone(), 0).await.unwrap();
        registry.join("s", "roam", roam.clone(), 0).await.unwrap();

        sess.send("stay:1").await.unwrap();
        registry.leave("s", "roam").await.unwrap();
        sess.send("stay:2").await.unwrap();
        sess.send("stay:3").await.unwrap();
        registry
            .join("s", "roam", roam.clone(), roam.last_version())
            .await
            .unwrap();
        sess.send("stay:4").await.unwrap();

        assert_eq!(roam.versions(), vec![1, 2, 3, 4]);
        assert_eq!(stay.versions(), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_processes_share_one_ordered_stream() {
        let fixture = Fixture::new();
        let peer = fixture.peer();
        let left = registry(&fixture).await;
        let right = registry(&peer).await;

        let a = Recorder::new();
        let b = Recorder::new();
        let sa = left.join("s", "a", a.clone(), 0).await.unwrap();
        let sb = right.join("s", "b", b.clone(), 0).await.unwrap();

        sa.send("a:1").await.unwrap();
        sb.send("b:2").await.unwrap();
        sa.send("a:3").await.unwrap();

        assert_eq!(a.versions(), vec![1, 2, 3]);
        assert_eq!(b.versions(), vec![1, 2, 3]);
        assert_eq!(a.froms(), "aba");
        assert_eq!(fixture.broker.subscriber_count("msg:ch:s"), 2);
    }

    #[tokio::test]
    async fn test_reconnect_resyncs_missed_versions_exactly_once() {
        let fixture = Fixture::new();
        let peer = fixture.peer();
        let sender = registry(&fixture).await;
        let receiver = registry(&peer).await;

        let (client, mut stream) = StreamClient::new();
        let sa = sender.join("s", "a", Recorder::new(), 0).await.unwrap();
        receiver.join("s", "b", Arc::new(client), 0).await.unwrap();

        sa.send("a:1").await.unwrap();
        peer.transport.disconnect();
        sa.send("a:2").await.unwrap();
        sa.send("a:3").await.unwrap();
        assert_eq!(stream.drain().len(), 1);

        peer.transport.reconnect().await;
        sa.send("a:4").await.unwrap();

        let versions: Vec<u64> = stream.drain().iter().map(|d| d.version()).collect();
        assert_eq!(versions, vec![2, 3, 4]);
        assert_eq!(stream.last_version(), 4);
    }

    #[tokio::test]
    async fn test_late_process_catches_up_from_store() {
        let fixture = Fixture::new();
        let peer = fixture.peer();
        let early = registry(&fixture).await;
        let sa = early.join("s", "a", Recorder::new(), 0).await.unwrap();
        for i in 1..=3 {
            sa.send(format!("a:{i}")).await.unwrap();
        }

        let late = registry(&peer).await;
        let b = Recorder::new();
        late.join("s", "b", b.clone(), 1).await.unwrap();
        sa.send("a:4").await.unwrap();

        assert_eq!(b.versions(), vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn test_new_session_skips_taken_ids() {
        let fixture = Fixture::new();
        fixture.bump_counter("taken").await;

        let ids = std::sync::Mutex::new(vec!["fresh", "live", "taken"]);
        let config = fixture
            .config()
            .with_id_maker(move || ids.lock().unwrap().pop().unwrap_or("x").to_string());
        let registry = Registry::new(config);
        registry.init().await.unwrap();
        let _live = registry.get_session("live").await.unwrap();

        let (id, session) = registry.new_session().await.unwrap();
        assert_eq!(id, "fresh");
        assert_eq!(session.id(), "fresh");
        assert!(registry.contains("fresh"));
    }

    #[tokio::test]
    async fn test_new_session_gives_up_after_bounded_attempts() {
        let fixture = Fixture::new();
        fixture.bump_counter("dup").await;
        let config = fixture
            .config()
            .with_id_maker(|| "dup".to_string())
            .with_id_attempts(5);
        let registry = Registry::new(config);
        registry.init().await.unwrap();

        assert!(matches!(
            registry.new_session().await,
            Err(SessionError::IdsExhausted(5))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let fixture = Fixture::new();
        let registry = registry(&fixture).await;
        let a = registry.join("a", "c", Recorder::new(), 0).await.unwrap();
        let b = registry.join("b", "c", Recorder::new(), 0).await.unwrap();

        registry.shutdown().await;

        assert!(a.is_closed() && b.is_closed());
        assert!(registry.is_empty());
        assert_eq!(fixture.broker.subscriber_count("msg:ch:a"), 0);
    }

    #[tokio::test]
    async fn test_unjoined_new_session_closed_on_drop() {
        let fixture = Fixture::new();
        let registry = registry(&fixture).await;

        let (id, handle) = registry.new_session().await.unwrap();
        let channel = SessionKeys::new(&id).channel;
        assert!(registry.contains(&id));
        assert_eq!(fixture.broker.subscriber_count(&channel), 1);

        drop(handle);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(!registry.contains(&id));
        assert!(registry.is_empty());
        assert_eq!(fixture.broker.subscriber_count(&channel), 0);
    }

    #[tokio::test]
    async fn test_joined_session_outlives_handles() {
        let fixture = Fixture::new();
        let registry = registry(&fixture).await;

        let handle = registry.get_session("s").await.unwrap();
        let extra = handle.clone();
        drop(handle);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(registry.contains("s"));

        extra.join("c1", Recorder::new(), 0).await.unwrap();
        drop(extra);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(registry.contains("s"));
        assert_eq!(registry.lookup("s").unwrap().client_count().await, 1);

        assert!(registry.leave("s", "c1").await.unwrap());
        assert!(!registry.contains("s"));
    }

    #[tokio::test]
    async fn test_join_ahead_of_lagging_process() {
        let fixture = Fixture::new();
        let peer = fixture.peer();
        let sender = registry(&fixture).await;
        let lagging = registry(&peer).await;

        let sa = sender.join("s", "a", Recorder::new(), 0).await.unwrap();
        let _watch = lagging.join("s", "w", Recorder::new(), 0).await.unwrap();
        peer.transport.disconnect();
        for i in 1..=3 {
            sa.send(format!("a:{i}")).await.unwrap();
        }

        // The client saw 1..=3 on the sender's process and moves over.
        let late = Recorder::new();
        lagging.join("s", "late", late.clone(), 3).await.unwrap();
        peer.transport.reconnect().await;
        sa.send("a:4").await.unwrap();

        assert_eq!(late.versions(), vec![4]);
        assert_eq!(late.gaps(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_senders_churn_and_reconnects_keep_one_order() {
        const PER_SENDER: u64 = 40;
        let fixture = Fixture::with_reorder(256, Duration::from_secs(5));
        let other = fixture.peer();
        let flaky = fixture.peer();
        let origin = Arc::new(registry(&fixture).await);
        let remote = Arc::new(registry(&other).await);
        let receiver = Arc::new(registry(&flaky).await);

        let local = Recorder::new();
        let stay = Recorder::new();
        let roam = Recorder::new();
        let _local = origin.join("s", "local", local.clone(), 0).await.unwrap();
        let _stay = receiver.join("s", "stay", stay.clone(), 0).await.unwrap();

        let senders: Vec<_> = [&origin, &origin, &remote, &remote]
            .into_iter()
            .enumerate()
            .map(|(n, registry)| {
                let registry = Arc::clone(registry);
                tokio::spawn(async move {
                    let session = registry.get_session("s").await.unwrap();
                    let mut versions = Vec::new();
                    for i in 0..PER_SENDER {
                        versions.push(session.send(format!("p{n}:{i}")).await.unwrap());
                        tokio::task::yield_now().await;
                    }
                    versions
                })
            })
            .collect();

        let churn = {
            let receiver = Arc::clone(&receiver);
            let roam = Arc::clone(&roam);
            tokio::spawn(async move {
                for _ in 0..25 {
                    let from = roam.last_version();
                    receiver.join("s", "roam", roam.clone(), from).await.unwrap();
                    tokio::task::yield_now().await;
                    receiver.leave("s", "roam").await.unwrap();
                }
                let from = roam.last_version();
                receiver.join("s", "roam", roam.clone(), from).await.unwrap()
            })
        };

        let flap = {
            let transport = Arc::clone(&flaky.transport);
            tokio::spawn(async move {
                for _ in 0..5 {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    transport.disconnect();
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    transport.reconnect().await;
                }
            })
        };

        let mut sent = Vec::new();
        for sender in senders {
            sent.extend(sender.await.unwrap());
        }
        let _roam = churn.await.unwrap();
        flap.await.unwrap();

        let total = 4 * PER_SENDER;
        let everything: Vec<u64> = (1..=total).collect();
        sent.sort_unstable();
        assert_eq!(sent, everything);

        for rec in [&local, &stay, &roam] {
            wait_for(rec, total).await;
            assert_eq!(rec.versions(), everything);
            assert_eq!(rec.gaps(), 0);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_joins_during_live_dispatch_see_every_version_once() {
        const SENDS: u64 = 100;
        let fixture = Fixture::with_reorder(256, Duration::from_secs(5));
        let registry = Arc::new(registry(&fixture).await);
        let anchor = registry
            .join("s", "anchor", Recorder::new(), 0)
            .await
            .unwrap();

        let sender = {
            let session = anchor.clone();
            tokio::spawn(async move {
                for i in 0..SENDS {
                    session.send(format!("a:{i}")).await.unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };
        let joiners: Vec<_> = (0..8)
            .map(|n| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    for _ in 0..n * 4 {
                        tokio::task::yield_now().await;
                    }
                    let rec = Recorder::new();
                    let client_id = format!("j{n}");
                    let handle = registry.join("s", &client_id, rec.clone(), 0).await.unwrap();
                    (rec, handle)
                })
            })
            .collect();

        sender.await.unwrap();
        let everything: Vec<u64> = (1..=SENDS).collect();
        for joiner in joiners {
            let (rec, _handle) = joiner.await.unwrap();
            wait_for(&rec, SENDS).await;
            assert_eq!(rec.versions(), everything);
        }
    }
}
