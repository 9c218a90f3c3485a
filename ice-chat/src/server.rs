//! HTTP front door for the hub.
//!
//! Serves the chat page and its assets, and upgrades `/ws` requests into
//! WebSocket connections that are handed to [`connection::spawn`]. None of
//! the hub's concurrency lives here.

use std::{
    borrow::Cow,
    future::Future,
    io,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Result;
use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{CloseFrame, Message as WsMessage, WebSocket, close_code},
    },
    http::{HeaderMap, StatusCode, header::ORIGIN},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use futures::{SinkExt, StreamExt, future};
use tokio::net::TcpListener;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{info, warn};

use crate::{
    connection,
    error::TransportError,
    hub::{Hub, HubConfig, HubHandle},
    transport::{Frame, NORMAL_CLOSURE_REASON},
};

pub const DEFAULT_WRITE_BUFFER_SIZE: usize = 1024;
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

const CHAT_PAGE: &str = include_str!("../web/templates/chat.html");

/// Settings applied to every WebSocket upgrade.
#[derive(Debug, Clone)]
pub struct UpgradeConfig {
    /// Origins allowed to open a socket. Empty allows any origin.
    pub allowed_origins: Vec<String>,
    pub write_buffer_size: usize,
    pub max_message_size: usize,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            write_buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl UpgradeConfig {
    /// Requests without an `Origin` header (non-browser clients) are always allowed.
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        match origin {
            _ if self.allowed_origins.is_empty() => true,
            None => true,
            Some(origin) => self.allowed_origins.iter().any(|allowed| allowed == origin),
        }
    }

    fn apply(&self, upgrade: WebSocketUpgrade) -> WebSocketUpgrade {
        upgrade
            .write_buffer_size(self.write_buffer_size)
            .max_message_size(self.max_message_size)
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub hub: HubConfig,
    pub upgrade: UpgradeConfig,
    /// Directory holding the `js/` and `static/` asset folders.
    pub web_root: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hub: HubConfig::default(),
            upgrade: UpgradeConfig::default(),
            web_root: PathBuf::from("web"),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    pub upgrade: Arc<UpgradeConfig>,
}

pub fn router(state: AppState, web_root: &Path) -> Router {
    Router::new()
        .route("/", get(chat_page))
        .route("/ws", get(ws_upgrade))
        .nest_service("/js", ServeDir::new(web_root.join("js")))
        .nest_service("/static", ServeDir::new(web_root.join("static")))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn chat_page() -> Html<&'static str> {
    Html(CHAT_PAGE)
}

async fn ws_upgrade(
    upgrade: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let origin = headers
        .get(ORIGIN)
        .map(|value| value.to_str().unwrap_or_default());
    if !state.upgrade.origin_allowed(origin) {
        warn!(?origin, "refusing websocket upgrade from disallowed origin");
        return StatusCode::FORBIDDEN.into_response();
    }

    let hub = state.hub;
    state
        .upgrade
        .apply(upgrade)
        .on_upgrade(move |socket| attach(socket, hub))
}

/// Adapts an upgraded socket to the frame transport and starts its connection.
async fn attach(socket: WebSocket, hub: HubHandle) {
    let (sink, stream) = socket.split();
    let stream = stream.filter_map(|frame| future::ready(inbound_frame(frame)));
    let sink = sink
        .with(|frame| future::ready(Ok::<_, axum::Error>(outbound_frame(frame))))
        .sink_map_err(TransportError::from);

    match connection::spawn(&hub, stream, sink).await {
        Ok(tasks) => info!(connection = tasks.id, "client connected to websocket"),
        Err(err) => warn!(error = %err, "dropping websocket"),
    }
}

/// Ping and pong are answered by the websocket layer and never reach the hub.
fn inbound_frame(frame: Result<WsMessage, axum::Error>) -> Option<Result<Frame, TransportError>> {
    match frame {
        Ok(WsMessage::Text(text)) => Some(Ok(Frame::Text(text))),
        Ok(WsMessage::Binary(bytes)) => Some(
            String::from_utf8(bytes)
                .map(Frame::Text)
                .map_err(TransportError::from),
        ),
        Ok(WsMessage::Ping(_) | WsMessage::Pong(_)) => None,
        Ok(WsMessage::Close(_)) => Some(Ok(Frame::Close)),
        Err(err) => Some(Err(err.into())),
    }
}

fn outbound_frame(frame: Frame) -> WsMessage {
    match frame {
        Frame::Text(text) => WsMessage::Text(text),
        Frame::Close => WsMessage::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: Cow::Borrowed(NORMAL_CLOSURE_REASON),
        })),
    }
}

pub struct ChatServer {
    listener: TcpListener,
    config: ServerConfig,
}

impl ChatServer {
    pub fn new(listener: TcpListener, config: ServerConfig) -> Self {
        Self { listener, config }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Starts the hub and serves HTTP until `shutdown` resolves.
    ///
    /// Upgraded sockets are not waited on; their connections keep the hub
    /// alive until they finish.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let ChatServer { listener, config } = self;

        let (hub, handle) = Hub::new(config.hub);
        tokio::spawn(hub.run());

        let state = AppState {
            hub: handle,
            upgrade: Arc::new(config.upgrade),
        };
        let app = router(state, &config.web_root);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;
        info!("chat server shutting down");

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}
