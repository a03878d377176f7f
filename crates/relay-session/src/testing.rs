//! Shared fixtures for session and registry tests.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use relay_core::{BaseMessage, Client, EngineConfig, LogStore, SessionKeys, frame};

use crate::storage::{MemoryBroker, MemoryLogStore, MemoryTransport};

/// One process worth of collaborators on a shared broker and store.
pub struct Fixture {
    pub store: Arc<MemoryLogStore>,
    pub broker: MemoryBroker,
    pub transport: Arc<MemoryTransport>,
    window: usize,
    timeout: Duration,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_reorder(
            relay_core::config::DEFAULT_REORDER_WINDOW,
            relay_core::config::DEFAULT_REORDER_TIMEOUT,
        )
    }

    pub fn with_reorder(window: usize, timeout: Duration) -> Self {
        let broker = MemoryBroker::new();
        Self {
            store: Arc::new(MemoryLogStore::new()),
            transport: Arc::new(broker.connect()),
            broker,
            window,
            timeout,
        }
    }

    /// Another process sharing this fixture's store and broker.
    pub fn peer(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            transport: Arc::new(self.broker.connect()),
            broker: self.broker.clone(),
            window: self.window,
            timeout: self.timeout,
        }
    }

    pub fn config(&self) -> EngineConfig {
        EngineConfig::new(self.store.clone(), self.transport.clone())
            .with_reorder(self.window, self.timeout)
    }

    /// Write a body as another process would, without publishing it.
    pub async fn store_message(&self, session_id: &str, version: u64, data: &[u8]) {
        let keys = SessionKeys::new(session_id);
        let frame = frame::encode_frame(version, 1, data);
        self.store
            .put_body(&keys.bodies, version, frame::body_of(&frame))
            .await
            .unwrap();
        let current = self.store.get_counter(&keys.max_version).await.unwrap();
        self.store
            .set_counter(&keys.max_version, current.max(version))
            .unwrap();
    }

    /// Burn a version without storing a body.
    pub async fn bump_counter(&self, session_id: &str) -> u64 {
        self.store
            .incr(&SessionKeys::new(session_id).max_version)
            .await
            .unwrap()
    }
}

/// Client that records what it sees. Payloads are `from:text`.
#[derive(Default)]
pub struct Recorder {
    seen: Mutex<Vec<BaseMessage>>,
    gaps: Mutex<Vec<u64>>,
    bulk_calls: Mutex<usize>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn versions(&self) -> Vec<u64> {
        self.seen.lock().unwrap().iter().map(|m| m.version).collect()
    }

    pub fn last_version(&self) -> u64 {
        self.seen.lock().unwrap().last().map_or(0, |m| m.version)
    }

    pub fn froms(&self) -> String {
        self.parts().into_iter().map(|(from, _)| from).collect()
    }

    pub fn texts(&self) -> String {
        self.parts().into_iter().map(|(_, text)| text).collect()
    }

    pub fn gaps(&self) -> usize {
        self.gaps.lock().unwrap().len()
    }

    pub fn gap_versions(&self) -> Vec<u64> {
        self.gaps.lock().unwrap().clone()
    }

    pub fn bulk_calls(&self) -> usize {
        *self.bulk_calls.lock().unwrap()
    }

    fn parts(&self) -> Vec<(String, String)> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|m| {
                let raw = String::from_utf8_lossy(&m.data).into_owned();
                match raw.split_once(':') {
                    Some((from, text)) => (from.to_string(), text.to_string()),
                    None => (String::new(), raw),
                }
            })
            .collect()
    }
}

impl Client for Recorder {
    fn recv(&self, msg: &BaseMessage) {
        self.seen.lock().unwrap().push(msg.clone());
    }

    fn recv_bulk(&self, first: u64, msgs: &[Option<BaseMessage>]) {
        *self.bulk_calls.lock().unwrap() += 1;
        for (version, slot) in (first..).zip(msgs) {
            match slot {
                Some(msg) => self.recv(msg),
                None => self.gaps.lock().unwrap().push(version),
            }
        }
    }
}
