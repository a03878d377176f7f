//! Per-session message cache with an in-order release buffer.

use std::collections::BTreeMap;

use relay_core::BaseMessage;

/// Outcome of offering a live message to the cache.
#[derive(Debug, PartialEq, Eq)]
pub enum Accept {
    /// Apply and fan out these messages, in order.
    Ready(Vec<BaseMessage>),
    /// Already cached or already buffered.
    Duplicate,
    /// At or below the high-water mark but never cached; the slot was
    /// already handed out as a gap.
    Stale,
    /// Held until the versions before it arrive.
    Buffered { pending: usize },
}

/// Everything this process has observed for one session.
///
/// `min_version == 0` means nothing is cached yet. `max_version` never
/// decreases.
#[derive(Debug, Default)]
pub struct MessageCache {
    messages: BTreeMap<u64, BaseMessage>,
    min_version: u64,
    max_version: u64,
    pending: BTreeMap<u64, BaseMessage>,
    gap_timer_armed: bool,
}

impl MessageCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lowest cached version, 0 when empty.
    #[must_use]
    pub const fn min_version(&self) -> u64 {
        self.min_version
    }

    /// Highest version accounted for.
    #[must_use]
    pub const fn max_version(&self) -> u64 {
        self.max_version
    }

    /// Number of cached messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of out-of-order messages waiting for their predecessors.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Cached message for a version.
    #[must_use]
    pub fn get(&self, version: u64) -> Option<&BaseMessage> {
        self.messages.get(&version)
    }

    /// Offer a live message.
    pub fn accept(&mut self, msg: BaseMessage) -> Accept {
        let version = msg.version;
        if self.messages.contains_key(&version) || self.pending.contains_key(&version) {
            return Accept::Duplicate;
        }
        if version <= self.max_version {
            return Accept::Stale;
        }
        if version == self.next_version() {
            self.insert(msg.clone());
            let mut ready = vec![msg];
            ready.extend(self.release_pending());
            return Accept::Ready(ready);
        }
        self.pending.insert(version, msg);
        Accept::Buffered {
            pending: self.pending.len(),
        }
    }

    /// Cached messages for `(after, max_version]`, one slot per version.
    #[must_use]
    pub fn backlog(&self, after: u64) -> Vec<Option<BaseMessage>> {
        if after >= self.max_version {
            return Vec::new();
        }
        (after + 1..=self.max_version)
            .map(|version| self.messages.get(&version).cloned())
            .collect()
    }

    /// Apply a catch-up batch read from the store.
    ///
    /// `slots[i]` holds version `start + 1 + i`. The unbroken run after the
    /// high-water mark is applied. A missing slot may still be being written,
    /// so everything found after it is buffered like an out-of-order live
    /// message and waits for the gap timer. Buffered messages that now follow
    /// the high-water mark are appended.
    pub fn apply_resync(
        &mut self,
        start: u64,
        slots: Vec<Option<BaseMessage>>,
    ) -> Vec<Option<BaseMessage>> {
        self.max_version = self.max_version.max(start);

        let mut batch = Vec::with_capacity(slots.len());
        let mut broken = false;
        for (slot, version) in slots.into_iter().zip(start.saturating_add(1)..) {
            if version <= self.max_version {
                continue;
            }
            match slot {
                Some(msg) if !broken => {
                    self.pending.remove(&version);
                    self.insert(msg.clone());
                    batch.push(Some(msg));
                }
                Some(msg) => {
                    self.pending.entry(version).or_insert(msg);
                }
                None => broken = true,
            }
        }

        batch.extend(self.release_pending().into_iter().map(Some));
        batch
    }

    /// Drop buffered messages beyond `limit`, the highest version the store
    /// has handed out. Returns how many were dropped.
    pub fn discard_pending_above(&mut self, limit: u64) -> usize {
        let Some(above) = limit.checked_add(1) else {
            return 0;
        };
        self.pending.split_off(&above).len()
    }

    /// Declare the versions before the oldest buffered message lost.
    ///
    /// Returns the gap slots followed by every buffered message that can now
    /// be released.
    pub fn skip_gap(&mut self) -> Vec<Option<BaseMessage>> {
        let Some(&first) = self.pending.keys().next() else {
            return Vec::new();
        };
        let mut batch = Vec::new();
        if first > self.next_version() {
            batch.extend((self.next_version()..first).map(|_| None));
            self.max_version = first - 1;
        }
        batch.extend(self.release_pending().into_iter().map(Some));
        batch
    }

    /// Mark the gap timer armed. Returns false if it already was or there is
    /// nothing to wait for.
    pub fn arm_gap_timer(&mut self) -> bool {
        if self.gap_timer_armed || self.pending.is_empty() {
            return false;
        }
        self.gap_timer_armed = true;
        true
    }

    /// Mark the gap timer fired.
    pub const fn disarm_gap_timer(&mut self) {
        self.gap_timer_armed = false;
    }

    const fn next_version(&self) -> u64 {
        self.max_version.saturating_add(1)
    }

    fn insert(&mut self, msg: BaseMessage) {
        let version = msg.version;
        if self.min_version == 0 {
            self.min_version = version;
        }
        self.max_version = self.max_version.max(version);
        self.messages.insert(version, msg);
    }

    fn release_pending(&mut self) -> Vec<BaseMessage> {
        let unsettled = self.pending.split_off(&self.next_version());
        self.pending = unsettled;

        let mut released = Vec::new();
        while let Some(msg) = self.pending.remove(&self.next_version()) {
            self.insert(msg.clone());
            released.push(msg);
        }
        released
    }
}
