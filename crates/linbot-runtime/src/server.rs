//! Reverse WebSocket server the OneBot gateway connects to.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    extract::{
        ConnectInfo, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use linbot_core::ConnectionId;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace, warn};

use crate::config::ServerConfig;
use crate::error::{RuntimeError, RuntimeResult};

/// Capacity of the per-connection outbound queue.
const OUTBOUND_QUEUE: usize = 256;

/// Receives the lifecycle and frames of gateway connections.
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    /// A connection was upgraded; `tx` feeds its writer task.
    async fn on_connect(&self, remote: SocketAddr, tx: mpsc::Sender<Vec<u8>>) -> ConnectionId;

    /// One complete inbound frame.
    async fn on_frame(&self, id: ConnectionId, data: &[u8]);

    /// The connection is gone.
    async fn on_disconnect(&self, id: ConnectionId);
}

struct ServerState {
    handler: Arc<dyn ConnectionHandler>,
    shutdown: CancellationToken,
}

/// A bound, not yet serving, WebSocket listener.
pub struct GatewayServer {
    listener: TcpListener,
    path: String,
}

impl GatewayServer {
    /// Binds `server.host:server.port`.
    pub async fn bind(config: &ServerConfig) -> RuntimeResult<Self> {
        let addr = config.addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| RuntimeError::Bind { addr, source })?;

        let path = if config.path.starts_with('/') {
            config.path.clone()
        } else {
            format!("/{}", config.path)
        };
        Ok(Self { listener, path })
    }

    /// The address actually bound (useful with port 0).
    pub fn local_addr(&self) -> RuntimeResult<SocketAddr> {
        self.listener.local_addr().map_err(RuntimeError::Server)
    }

    /// Serves connections until `shutdown` is cancelled.
    pub async fn serve(
        self,
        handler: Arc<dyn ConnectionHandler>,
        shutdown: CancellationToken,
    ) -> RuntimeResult<()> {
        let state = Arc::new(ServerState {
            handler,
            shutdown: shutdown.clone(),
        });
        let router = Router::new()
            .route(&self.path, get(ws_handler))
            .with_state(state);

        if let Ok(addr) = self.listener.local_addr() {
            info!(addr = %addr, path = %self.path, "WebSocket server listening");
        }

        let server = axum::serve(
            self.listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        );

        tokio::select! {
            result = server => {
                if let Err(e) = result {
                    error!(error = %e, "WebSocket server error");
                    return Err(RuntimeError::Server(e));
                }
            }
            _ = shutdown.cancelled() => {
                info!("WebSocket server shutting down");
            }
        }
        Ok(())
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    info!(remote_addr = %addr, "New WebSocket connection request");
    ws.on_upgrade(move |socket| handle_socket(socket, addr, state))
}

async fn handle_socket(socket: WebSocket, addr: SocketAddr, state: Arc<ServerState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(OUTBOUND_QUEUE);

    let id = state.handler.on_connect(addr, tx).await;
    info!(connection = id, remote_addr = %addr, "WebSocket connection established");

    let send_task = tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            let text = String::from_utf8_lossy(&data).into_owned();
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                warn!(connection = id, "Failed to send frame, connection closed");
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    loop {
        let next = tokio::select! {
            next = ws_rx.next() => next,
            _ = state.shutdown.cancelled() => break,
        };
        match next {
            Some(Ok(Message::Text(text))) => {
                trace!(connection = id, len = text.len(), "Received text frame");
                state.handler.on_frame(id, text.as_bytes()).await;
            }
            Some(Ok(Message::Binary(data))) => {
                trace!(connection = id, len = data.len(), "Received binary frame");
                state.handler.on_frame(id, &data).await;
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Ok(Message::Close(_))) | None => {
                info!(connection = id, "WebSocket connection closed by peer");
                break;
            }
            Some(Err(e)) => {
                warn!(connection = id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    state.handler.on_disconnect(id).await;
    send_task.abort();
    info!(connection = id, "WebSocket connection closed");
}
