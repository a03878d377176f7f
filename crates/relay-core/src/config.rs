//! Engine configuration.

use std::{fmt, sync::Arc, time::Duration};

use uuid::Uuid;

use crate::traits::{BroadcastTransport, LogStore};

/// Generates candidate session ids.
pub type IdMaker = Arc<dyn Fn() -> String + Send + Sync>;

/// Default bound on `new_session` id probes.
pub const DEFAULT_ID_ATTEMPTS: usize = 10_000;

/// Default advisory message retention.
pub const DEFAULT_MESSAGE_TTL: Duration = Duration::from_secs(4 * 60 * 60);

/// Default number of out-of-order frames held before forcing a gap fill.
pub const DEFAULT_REORDER_WINDOW: usize = 256;

/// Default wait for a missing frame before forcing a gap fill.
pub const DEFAULT_REORDER_TIMEOUT: Duration = Duration::from_millis(250);

/// Collaborators and tunables shared by every session of a registry.
///
/// Logging goes through `tracing`; install a subscriber to route it.
#[derive(Clone)]
pub struct EngineConfig {
    /// Durable log store handle.
    pub store: Arc<dyn LogStore>,
    /// Broadcast transport connection for this process.
    pub transport: Arc<dyn BroadcastTransport>,
    /// Session id generator used by `new_session`.
    pub id_maker: IdMaker,
    /// How many ids `new_session` probes before giving up.
    pub id_attempts: usize,
    /// Advisory retention for stored bodies. Not enforced by the sessions.
    pub message_ttl: Duration,
    /// Out-of-order frames buffered before a gap fill is forced.
    pub reorder_window: usize,
    /// How long a gap may stay open before a gap fill is forced.
    pub reorder_timeout: Duration,
}

impl EngineConfig {
    /// Create a configuration with default tunables.
    #[must_use]
    pub fn new(store: Arc<dyn LogStore>, transport: Arc<dyn BroadcastTransport>) -> Self {
        Self {
            store,
            transport,
            id_maker: Arc::new(short_id),
            id_attempts: DEFAULT_ID_ATTEMPTS,
            message_ttl: DEFAULT_MESSAGE_TTL,
            reorder_window: DEFAULT_REORDER_WINDOW,
            reorder_timeout: DEFAULT_REORDER_TIMEOUT,
        }
    }

    /// Replace the session id generator.
    #[must_use]
    pub fn with_id_maker(mut self, id_maker: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.id_maker = Arc::new(id_maker);
        self
    }

    /// Set the id probe bound.
    #[must_use]
    pub const fn with_id_attempts(mut self, attempts: usize) -> Self {
        self.id_attempts = attempts;
        self
    }

    /// Set the advisory message retention.
    #[must_use]
    pub const fn with_message_ttl(mut self, ttl: Duration) -> Self {
        self.message_ttl = ttl;
        self
    }

    /// Set the reorder buffer bounds.
    #[must_use]
    pub fn with_reorder(mut self, window: usize, timeout: Duration) -> Self {
        self.reorder_window = window.max(1);
        self.reorder_timeout = timeout;
        self
    }

    /// Generate a session id candidate.
    #[must_use]
    pub fn make_id(&self) -> String {
        (self.id_maker)()
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("id_attempts", &self.id_attempts)
            .field("message_ttl", &self.message_ttl)
            .field("reorder_window", &self.reorder_window)
            .field("reorder_timeout", &self.reorder_timeout)
            .finish_non_exhaustive()
    }
}

/// Eight lowercase hex characters from a random uuid.
#[must_use]
pub fn short_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}
