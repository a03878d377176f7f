//! WebSocket transport: one session membership per socket.

use std::sync::Arc;

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use relay_core::StreamClient;
use relay_session::{Registry, SessionHandle};
use tokio::{sync::mpsc, task::JoinHandle};
use uuid::Uuid;

use crate::protocol::{ClientMessage, ServerMessage};

/// WebSocket handler state.
#[derive(Clone)]
pub struct WsState {
    /// Session registry shared by every socket.
    pub registry: Arc<Registry>,
}

impl WsState {
    /// Create new WebSocket state.
    #[must_use]
    pub const fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }
}

/// WebSocket upgrade handler.
///
/// Use this as an Axum route handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// The session a socket is currently joined to.
struct Membership {
    session: SessionHandle,
    forwarder: JoinHandle<()>,
}

/// Per-socket state.
struct Connection {
    client_id: String,
    registry: Arc<Registry>,
    tx: mpsc::UnboundedSender<ServerMessage>,
    membership: Option<Membership>,
}

impl Connection {
    async fn handle(&mut self, msg: ClientMessage) {
        match msg {
            ClientMessage::Ping => self.reply(ServerMessage::Pong),
            ClientMessage::Join {
                session_id,
                start_version,
            } => self.join(&session_id, start_version).await,
            ClientMessage::Leave => {
                self.leave().await;
                self.reply(ServerMessage::Left);
            }
            ClientMessage::Send { .. } => self.send(&msg).await,
        }
    }

    async fn join(&mut self, session_id: &str, start_version: u64) {
        self.leave().await;

        let (client, stream) = StreamClient::starting_at(start_version);
        let session = match self
            .registry
            .join(session_id, &self.client_id, Arc::new(client), start_version)
            .await
        {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(session = session_id, "Join failed: {e}");
                self.reply(ServerMessage::error(e));
                return;
            }
        };
        self.reply(ServerMessage::Joined {
            session_id: session_id.to_string(),
        });

        // The backlog waits in the stream until the forwarder starts, so it follows Joined.
        let tx = self.tx.clone();
        let forwarder = tokio::spawn(async move {
            let mut stream = stream.map(ServerMessage::from);
            while let Some(msg) = stream.next().await {
                if tx.send(msg).is_err() {
                    break;
                }
            }
        });
        self.membership = Some(Membership { session, forwarder });
    }

    async fn leave(&mut self) {
        let Some(Membership { session, forwarder }) = self.membership.take() else {
            return;
        };
        if let Err(e) = session.leave(&self.client_id).await {
            tracing::warn!(session = session.id(), "Leave failed: {e}");
        }
        forwarder.abort();
    }

    async fn send(&self, msg: &ClientMessage) {
        let Some(Membership { session, .. }) = &self.membership else {
            self.reply(ServerMessage::error("Not joined to a session"));
            return;
        };
        let data = match msg.decode_send() {
            Ok(Some(data)) => data,
            Ok(None) => return,
            Err(e) => {
                self.reply(ServerMessage::error(e));
                return;
            }
        };
        match session.send(data).await {
            Ok(version) => self.reply(ServerMessage::Sent { version }),
            Err(e) => {
                tracing::warn!(session = session.id(), "Send failed: {e}");
                self.reply(ServerMessage::error(e));
            }
        }
    }

    fn reply(&self, msg: ServerMessage) {
        let _ = self.tx.send(msg);
    }
}

async fn handle_socket(socket: WebSocket, state: WsState) {
    let (mut sender, mut receiver) = socket.split();

    // Channel for sending messages to the client
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    // Spawn task to forward messages to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize message: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let mut conn = Connection {
        client_id: Uuid::new_v4().to_string(),
        registry: state.registry,
        tx,
        membership: None,
    };
    tracing::debug!(client = %conn.client_id, "WebSocket connected");

    // Handle incoming messages
    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!("WebSocket error: {e}");
                break;
            }
        };

        match ClientMessage::parse(&text) {
            Ok(client_msg) => conn.handle(client_msg).await,
            Err(e) => {
                tracing::warn!("Invalid client message: {e}");
                conn.reply(ServerMessage::error(e));
            }
        }
    }

    conn.leave().await;
    tracing::debug!(client = %conn.client_id, "WebSocket disconnected");
    send_task.abort();
}

/// Create WebSocket router.
///
/// # Example
/// ```ignore
/// let app = Router::new()
///     .merge(create_ws_router(registry));
/// ```
#[must_use]
pub fn create_ws_router(registry: Arc<Registry>) -> axum::Router {
    axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(WsState::new(registry))
}
