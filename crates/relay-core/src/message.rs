//! Versioned message model.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

/// A message as delivered to clients.
///
/// The version is the sole ordering key inside a session. Versions are
/// dense and assigned by the log store's atomic counter, so they start at 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseMessage {
    /// Per-session sequence number.
    pub version: u64,
    /// Send time, nanoseconds since the Unix epoch.
    pub time: i64,
    /// Opaque payload.
    pub data: Bytes,
}

impl BaseMessage {
    /// Create a new message.
    #[must_use]
    pub fn new(version: u64, time: i64, data: impl Into<Bytes>) -> Self {
        Self {
            version,
            time,
            data: data.into(),
        }
    }
}

/// Current wall clock time in nanoseconds since the Unix epoch.
#[must_use]
pub fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
