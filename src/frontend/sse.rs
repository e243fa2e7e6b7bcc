//! HTTP frontend: MCP over server-sent events, plus a backend status endpoint.
//!
//! - `GET /sse` opens a session. The first event (`endpoint`) names the URL
//!   the client posts its messages to; every response follows as a `message`
//!   event on the same stream.
//! - `POST /messages/?session_id=...` queues one JSON-RPC message for the
//!   session and answers `202 Accepted`.
//! - `GET /servers` returns `[{id, status}]` for every backend.
//!
//! Each session runs its own dispatch loop, so requests are concurrent and
//! cancellable exactly as on stdio. Closing the event stream ends the session.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{Method, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use super::rpc::{dispatch_raw, InFlight};
use crate::proxy::{BackendReport, ProxySession};

// ─── Constants ───────────────────────────────────────────────────────────────

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 1598;

/// Path clients post their messages to.
pub const MESSAGES_PATH: &str = "/messages/";

const INBOX_CAPACITY: usize = 32;
const OUTBOX_CAPACITY: usize = 64;

// ─── Shared State ────────────────────────────────────────────────────────────

/// State shared by all HTTP handlers.
pub struct SseState {
    proxy: Arc<ProxySession>,
    /// Session id → queue of raw messages posted for it.
    sessions: RwLock<HashMap<String, mpsc::Sender<Bytes>>>,
    shutdown: CancellationToken,
}

impl SseState {
    pub fn new(proxy: Arc<ProxySession>, shutdown: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            proxy,
            sessions: RwLock::new(HashMap::new()),
            shutdown,
        })
    }

    /// Register a session and start its dispatch loop. Returns the session
    /// id and the stream of encoded responses.
    pub async fn open_session(self: &Arc<Self>) -> (String, mpsc::Receiver<String>) {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        let (outbox_tx, outbox_rx) = mpsc::channel(OUTBOX_CAPACITY);

        self.sessions.write().await.insert(id.clone(), inbox_tx);
        tokio::spawn(run_session(Arc::clone(self), id.clone(), inbox_rx, outbox_tx));
        tracing::info!(session = %id, "sse session opened");
        (id, outbox_rx)
    }

    async fn inbox(&self, id: &str) -> Option<mpsc::Sender<Bytes>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

async fn run_session(
    state: Arc<SseState>,
    id: String,
    mut inbox: mpsc::Receiver<Bytes>,
    outbox: mpsc::Sender<String>,
) {
    let mut in_flight = InFlight::new();
    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            _ = outbox.closed() => {
                tracing::debug!(session = %id, "event stream closed by client");
                break;
            }
            Some(done) = in_flight.join_next(), if !in_flight.is_empty() => {
                in_flight.finished(done);
            }
            message = inbox.recv() => match message {
                Some(raw) => dispatch_raw(&state.proxy, &raw, &outbox, &mut in_flight).await,
                None => break,
            },
        }
    }

    in_flight.shutdown().await;
    state.sessions.write().await.remove(&id);
    tracing::info!(session = %id, "sse session closed");
}

// ─── Handlers ────────────────────────────────────────────────────────────────

async fn handle_sse(
    State(state): State<Arc<SseState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (id, outbox) = state.open_session().await;

    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("{MESSAGES_PATH}?session_id={id}"));
    let messages = stream::unfold(outbox, |mut outbox| async move {
        let line = outbox.recv().await?;
        let event = Event::default().event("message").data(line.trim_end());
        Some((event, outbox))
    });

    let events = stream::once(async move { endpoint })
        .chain(messages)
        .map(Ok::<_, Infallible>);
    Sse::new(events).keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
struct SessionQuery {
    session_id: String,
}

async fn handle_message(
    State(state): State<Arc<SseState>>,
    Query(query): Query<SessionQuery>,
    body: Bytes,
) -> Response {
    let Some(inbox) = state.inbox(&query.session_id).await else {
        tracing::warn!(session = %query.session_id, "message for unknown session");
        return (StatusCode::NOT_FOUND, "could not find session").into_response();
    };
    if inbox.send(body).await.is_err() {
        return (StatusCode::NOT_FOUND, "session closed").into_response();
    }
    StatusCode::ACCEPTED.into_response()
}

async fn handle_servers(State(state): State<Arc<SseState>>) -> Json<Vec<BackendReport>> {
    Json(state.proxy.status())
}

/// Routes with permissive CORS for browser-based clients.
pub fn router(state: Arc<SseState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/sse", get(handle_sse))
        .route(MESSAGES_PATH, post(handle_message))
        .route("/servers", get(handle_servers))
        .layer(cors)
        .with_state(state)
}

/// Serve the HTTP frontend on `addr` until `shutdown` fires.
pub async fn serve(
    proxy: Arc<ProxySession>,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "sse frontend listening");

    let app = router(SseState::new(proxy, shutdown.clone()));
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

// ─── Tests ───────────────────────────────────────────────────────────────────
