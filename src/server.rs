//! HTTP + WebSocket transport for the gateway.
//!
//! Routes:
//! - `/ws`: one WebSocket session per client; each inbound frame is a
//!   command, each outbound text frame is one line of interpreter output
//! - `/api/info`: JSON status (version, live clients, maximum clients)
//!
//! Anything else answers 404.

use crate::config::Config;
use crate::connection::{Connection, Outbound};
use crate::error::SendError;
use crate::gateway::{Gateway, GatewayInfo};
use crate::interpreter::Interpreter;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, trace, warn};

/// Listen backlog for the server socket
const LISTEN_BACKLOG: i32 = 1024;

/// Messages queued per session before further sends are dropped
const OUTBOUND_QUEUE_DEPTH: usize = 64;

/// Server instance
pub struct Server {
    config: Config,
    gateway: Arc<Gateway>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config, interpreter: Arc<dyn Interpreter>) -> Self {
        let gateway = Arc::new(Gateway::from_config(&config, interpreter));
        Server { config, gateway }
    }

    /// Shared gateway context, for callers that broadcast or close clients.
    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// Bind the listener and serve until interrupted
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let addr: SocketAddr = self.config.listen.parse()?;
        let listener = TcpListener::from_std(create_listener(addr)?)?;
        info!(
            address = %addr,
            max_clients = self.config.max_connections,
            "Server listening"
        );

        axum::serve(
            listener,
            router(Arc::clone(&self.gateway)).into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        info!("Server stopped");
        Ok(())
    }
}

/// Build the router over a shared gateway.
pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade_handler))
        .route("/api/info", get(info_handler))
        .fallback(not_found)
        .with_state(gateway)
}

/// Serve on an already bound listener.
pub async fn serve(listener: TcpListener, gateway: Arc<Gateway>) -> io::Result<()> {
    axum::serve(
        listener,
        router(gateway).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

async fn info_handler(State(gateway): State<Arc<Gateway>>) -> Json<GatewayInfo> {
    Json(gateway.info())
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not Found")
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(gateway): State<Arc<Gateway>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, gateway, addr))
}

/// Outbound half of a WebSocket session.
///
/// Messages are queued on a bounded channel drained by the session's
/// writer task. Sending never waits on the network: once the queue is
/// full, further messages are dropped until the writer catches up.
struct WsOutbound {
    tx: mpsc::Sender<Message>,
}

impl WsOutbound {
    fn enqueue(&self, msg: Message) -> Result<(), SendError> {
        self.tx.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => SendError::QueueFull,
            TrySendError::Closed(_) => SendError::ChannelClosed,
        })
    }
}

impl Outbound for WsOutbound {
    fn send_text(&self, text: &str) -> Result<(), SendError> {
        self.enqueue(Message::Text(text.to_owned().into()))
    }

    fn close(&self) {
        let frame = CloseFrame {
            code: close_code::NORMAL,
            reason: String::new().into(),
        };
        if let Err(e) = self.enqueue(Message::Close(Some(frame))) {
            debug!(error = %e, "Close frame not queued");
        }
    }
}

/// Drive one WebSocket session from upgrade to teardown.
async fn handle_socket(socket: WebSocket, gateway: Arc<Gateway>, remote_addr: SocketAddr) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE_DEPTH);

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sender.send(msg).await.is_err() || closing {
                break;
            }
        }
    });

    let conn = match gateway.on_connect(remote_addr, Box::new(WsOutbound { tx })) {
        Ok(conn) => conn,
        Err(refused) => {
            // The notice and close frame are already queued.
            let _ = writer.await;
            gateway.on_disconnect(&refused.conn);
            return;
        }
    };

    while let Some(frame) = receiver.next().await {
        let payload = match frame {
            Ok(Message::Text(text)) => Bytes::copy_from_slice(text.as_str().as_bytes()),
            Ok(Message::Binary(data)) => data,
            Ok(Message::Ping(_) | Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => break,
            Err(e) => {
                gateway.on_error(&conn, &e);
                break;
            }
        };

        if let Err(e) = dispatch(&gateway, &conn, payload).await {
            warn!(conn_id = %conn.id(), error = %e, "Dispatch aborted");
        }

        if !conn.is_open() {
            debug!(conn_id = %conn.id(), "Connection closed by gateway");
            break;
        }
    }

    gateway.on_disconnect(&conn);
    drop(conn);
    let _ = writer.await;
}

/// Run one dispatch on the blocking pool and wait for it.
///
/// Awaiting here keeps dispatches for one connection strictly sequential
/// while a slow interpreter only holds up its own session.
async fn dispatch(
    gateway: &Arc<Gateway>,
    conn: &Arc<Connection>,
    payload: Bytes,
) -> Result<(), tokio::task::JoinError> {
    let gateway = Arc::clone(gateway);
    let conn = Arc::clone(conn);
    let outcome = tokio::task::spawn_blocking(move || gateway.on_data(&conn, &payload)).await?;
    trace!(?outcome, "Dispatch finished");
    Ok(())
}

/// Create a TCP listener with SO_REUSEADDR so restarts can rebind at once.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}
