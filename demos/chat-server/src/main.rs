//! Chat server on top of in-memory fan-out sessions.
//!
//! Run with: cargo run -p chat-server
//!
//! Then open http://localhost:3000 in two browser tabs. Set `RELAY_ADDR` to
//! listen elsewhere.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context as _;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use relay_core::EngineConfig;
use relay_session::{
    Registry,
    storage::{MemoryBroker, MemoryLogStore},
};
use relay_transport::websocket::create_ws_router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_ADDR: &str = "127.0.0.1:3000";

#[derive(serde::Serialize)]
struct NewSession {
    session_id: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let broker = MemoryBroker::new();
    let config = EngineConfig::new(Arc::new(MemoryLogStore::new()), Arc::new(broker.connect()));
    let registry = Arc::new(Registry::new(config));
    registry
        .init()
        .await
        .context("Failed to initialize session registry")?;

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/sessions", post(new_session_handler))
        .with_state(registry.clone())
        .merge(create_ws_router(registry.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = std::env::var("RELAY_ADDR")
        .unwrap_or_else(|_| DEFAULT_ADDR.to_string())
        .parse()
        .context("RELAY_ADDR is not a socket address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("Server listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    registry.shutdown().await;
    tracing::info!("Server stopped");
    Ok(())
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn new_session_handler(State(registry): State<Arc<Registry>>) -> Response {
    // The session is closed again unless a socket joins it.
    match registry.new_session().await {
        Ok((session_id, _)) => Json(NewSession { session_id }).into_response(),
        Err(e) => {
            tracing::error!("Failed to create session: {e}");
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
        }
    }
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Relay Chat</title>
    <style>
        body { margin: 0; padding: 20px; background: #1e1e1e; color: #d4d4d4; font-family: system-ui, sans-serif; }
        #log { height: calc(100vh - 160px); overflow-y: auto; font-family: Menlo, Monaco, monospace; font-size: 14px; }
        .gap { color: #a44; }
        .status { color: #888; font-size: 14px; margin-bottom: 10px; }
        .connected { color: #4a4; }
        .disconnected { color: #a44; }
    </style>
</head>
<body>
    <h1>Relay Chat</h1>
    <div class="status" id="status">Connecting...</div>
    <div>
        <input id="session" placeholder="session id" />
        <button id="create">New</button>
        <button id="join">Join</button>
    </div>
    <div id="log"></div>
    <input id="text" placeholder="message" size="60" />

    <script>
        const status = document.getElementById('status');
        const log = document.getElementById('log');
        const session = document.getElementById('session');
        const text = document.getElementById('text');
        let ws;
        let joined = null;
        let lastVersion = 0;

        function line(content, cls) {
            const div = document.createElement('div');
            div.textContent = content;
            if (cls) div.className = cls;
            log.appendChild(div);
            log.scrollTop = log.scrollHeight;
        }

        function join(id) {
            if (id !== joined) lastVersion = 0;
            joined = id;
            ws.send(JSON.stringify({ type: 'join', session_id: id, start_version: lastVersion }));
        }

        function connect() {
            const protocol = window.location.protocol === 'https:' ? 'wss:' : 'ws:';
            ws = new WebSocket(`${protocol}//${window.location.host}/ws`);

            ws.onopen = () => {
                status.textContent = 'Connected';
                status.className = 'status connected';
                // Resume where we left off
                if (joined) join(joined);
            };

            ws.onclose = () => {
                status.textContent = 'Disconnected - reconnecting...';
                status.className = 'status disconnected';
                setTimeout(connect, 2000);
            };

            ws.onmessage = (event) => {
                const msg = JSON.parse(event.data);
                if (msg.type === 'message') {
                    lastVersion = msg.version;
                    line(`[${msg.version}] ${atob(msg.data)}`);
                } else if (msg.type === 'gap') {
                    lastVersion = msg.version;
                    line(`[${msg.version}] (lost)`, 'gap');
                } else if (msg.type === 'joined') {
                    line(`Joined ${msg.session_id}`);
                } else if (msg.type === 'error') {
                    line(`Error: ${msg.message}`, 'gap');
                }
            };
        }

        document.getElementById('create').onclick = async () => {
            const res = await fetch('/sessions', { method: 'POST' });
            if (!res.ok) { line(`Error: ${await res.text()}`, 'gap'); return; }
            const body = await res.json();
            session.value = body.session_id;
            join(body.session_id);
        };

        document.getElementById('join').onclick = () => join(session.value);

        text.addEventListener('keydown', (e) => {
            if (e.key === 'Enter' && text.value && ws.readyState === WebSocket.OPEN) {
                ws.send(JSON.stringify({ type: 'send', data: btoa(text.value) }));
                text.value = '';
            }
        });

        connect();
    </script>
</body>
</html>
"#;
