//! Store-side resource names derived from a session id.

/// The four store resources that back one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKeys {
    /// Broadcast channel for live frames.
    pub channel: String,
    /// Durable body table, keyed by version.
    pub bodies: String,
    /// Lowest version the store still guarantees.
    pub min_version: String,
    /// Atomic version counter.
    pub max_version: String,
}

impl SessionKeys {
    /// Derive the keys for a session id.
    #[must_use]
    pub fn new(session_id: &str) -> Self {
        Self {
            channel: format!("msg:ch:{session_id}"),
            bodies: format!("msg:body:{session_id}"),
            min_version: format!("msg:min:{session_id}"),
            max_version: format!("msg:ver:{session_id}"),
        }
    }
}
