//! Wire protocol for client-server communication.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use relay_core::{BaseMessage, Delivery};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Protocol error.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid message: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("Invalid base64 payload: {0}")]
    InvalidPayload(#[from] base64::DecodeError),
}

/// Message from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a session, having seen everything up to `start_version`.
    Join {
        session_id: String,
        #[serde(default)]
        start_version: u64,
    },
    /// Leave the current session.
    Leave,
    /// Send a payload (base64 encoded) to the current session.
    Send { data: String },
    /// Ping for keepalive.
    Ping,
}

impl ClientMessage {
    /// Parse a text frame.
    ///
    /// # Errors
    /// Returns error if the text is not a valid client message.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Create a send message from raw bytes.
    #[must_use]
    pub fn send(data: &[u8]) -> Self {
        Self::Send {
            data: BASE64.encode(data),
        }
    }

    /// Decode send data from base64.
    ///
    /// # Errors
    /// Returns error if the payload is not valid base64.
    pub fn decode_send(&self) -> Result<Option<Vec<u8>>, ProtocolError> {
        if let Self::Send { data } = self {
            Ok(Some(BASE64.decode(data)?))
        } else {
            Ok(None)
        }
    }
}

/// Message from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Joined a session.
    Joined { session_id: String },
    /// A session message (payload base64 encoded).
    Message { version: u64, time: i64, data: String },
    /// No data is available for this version.
    Gap { version: u64 },
    /// A send was accepted under this version.
    Sent { version: u64 },
    /// Left the session.
    Left,
    /// Error message.
    Error { message: String },
    /// Pong response.
    Pong,
}

impl ServerMessage {
    /// Create a message frame.
    #[must_use]
    pub fn message(msg: &BaseMessage) -> Self {
        Self::Message {
            version: msg.version,
            time: msg.time,
            data: BASE64.encode(&msg.data),
        }
    }

    /// Create an error frame.
    #[must_use]
    pub fn error(message: impl std::fmt::Display) -> Self {
        Self::Error {
            message: message.to_string(),
        }
    }

    /// Decode message data from base64.
    #[must_use]
    pub fn decode_data(&self) -> Option<Vec<u8>> {
        if let Self::Message { data, .. } = self {
            BASE64.decode(data).ok()
        } else {
            None
        }
    }
}

impl From<Delivery> for ServerMessage {
    fn from(delivery: Delivery) -> Self {
        match delivery {
            Delivery::Message(msg) => Self::message(&msg),
            Delivery::Gap(version) => Self::Gap { version },
        }
    }
}
