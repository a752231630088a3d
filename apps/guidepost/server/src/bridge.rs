//! The bridge server: transport listener, request/reply correlator, and
//! keepalive, all hanging off one cloneable [`Bridge`] handle.
//!
//! The bridge is single-tenant by design: one browser, one desktop app, one
//! machine. A second WebSocket upgrade while a connection is open is answered
//! with `409 Conflict` before the upgrade; nothing is queued. All inbound
//! frames on a connection are handled in arrival order by one reader loop,
//! which is what lets the correlator get away without per-request ids.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use guidepost_core::{
    codec::{self, DecodeError},
    protocol::{BridgeMessage, PageSummary},
    KEEPALIVE_INTERVAL, LISTENER_RESTART_DELAY,
};
use serde_json::json;
use thiserror::Error;
use tokio::{
    net::TcpListener,
    sync::{mpsc, oneshot, watch, Mutex as AsyncMutex},
    task::JoinHandle,
};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("a companion connection is already open")]
    ConnectionBusy,
    #[error("failed to bind bridge listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Lifecycle of the one connection slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Open,
    Closing,
}

struct ConnectionSlot {
    state: SlotState,
    conn: Option<ActiveConnection>,
}

struct ActiveConnection {
    id: Uuid,
    outbound: mpsc::UnboundedSender<Outbound>,
}

enum Outbound {
    Frame(BridgeMessage),
    Close,
}

/// Handle to the Local Guidance Bridge. Cheap to clone; construct one at the
/// composition root and pass it to whatever needs it.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    keepalive_interval: Duration,
    slot: parking_lot::Mutex<ConnectionSlot>,
    /// Single-slot lock: at most one correlated request in flight.
    summary_lock: AsyncMutex<()>,
    /// Completion for the in-flight page-summary request, if any.
    pending_summary: parking_lot::Mutex<Option<oneshot::Sender<PageSummary>>>,
    last_summary: parking_lot::Mutex<Option<PageSummary>>,
    status_tx: watch::Sender<bool>,
    shutdown_tx: watch::Sender<bool>,
    serve_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new()
    }
}

impl Bridge {
    pub fn new() -> Self {
        Self::with_keepalive_interval(KEEPALIVE_INTERVAL)
    }

    /// Bridge with a non-default ping interval. Tests use short intervals;
    /// production sticks with [`KEEPALIVE_INTERVAL`].
    pub fn with_keepalive_interval(keepalive_interval: Duration) -> Self {
        let (status_tx, _) = watch::channel(false);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(BridgeInner {
                keepalive_interval,
                slot: parking_lot::Mutex::new(ConnectionSlot {
                    state: SlotState::Idle,
                    conn: None,
                }),
                summary_lock: AsyncMutex::new(()),
                pending_summary: parking_lot::Mutex::new(None),
                last_summary: parking_lot::Mutex::new(None),
                status_tx,
                shutdown_tx,
                serve_task: parking_lot::Mutex::new(None),
            }),
        }
    }

    pub fn connection_state(&self) -> SlotState {
        self.inner.slot.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == SlotState::Open
    }

    /// Connection-status channel: `true` while a companion is attached.
    pub fn watch_status(&self) -> watch::Receiver<bool> {
        self.inner.status_tx.subscribe()
    }

    /// Most recent page summary seen on the wire, if any.
    pub fn last_page_summary(&self) -> Option<PageSummary> {
        self.inner.last_summary.lock().clone()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/healthz", get(health_handler))
            .route("/ws", get(ws_handler))
            .with_state(self.clone())
    }

    /// Binds the listener and serves it on a background task, returning the
    /// bound address. On unexpected transport failure the listener is
    /// restarted after a fixed backoff instead of crashing the host.
    pub async fn start(&self, addr: SocketAddr) -> Result<SocketAddr, BridgeError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| BridgeError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| BridgeError::Bind { addr, source })?;

        let bridge = self.clone();
        let shutdown_rx = self.inner.shutdown_tx.subscribe();
        let handle = tokio::spawn(serve_loop(bridge, listener, addr, shutdown_rx));
        *self.inner.serve_task.lock() = Some(handle);

        info!(%local_addr, "bridge listening for the browser companion");
        Ok(local_addr)
    }

    /// Closes the active connection with a normal closure and releases the
    /// endpoint.
    pub async fn stop(&self) {
        let _ = self.inner.shutdown_tx.send(true);
        self.close_current();
        let task = self.inner.serve_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        info!("bridge listener stopped");
    }

    fn close_current(&self) {
        let mut slot = self.inner.slot.lock();
        if slot.state == SlotState::Open {
            slot.state = SlotState::Closing;
            if let Some(conn) = &slot.conn {
                let _ = conn.outbound.send(Outbound::Close);
            }
        }
    }

    /// Requests a summary of the companion's active page, waiting up to
    /// `timeout` for the reply.
    ///
    /// Absence of page context is an expected, recoverable condition:
    /// not-connected and timeout both yield `None` with a log line, never an
    /// error. At most one request is outstanding at a time; a concurrent
    /// caller waits here for the slot.
    pub async fn request_page_summary(&self, timeout: Duration) -> Option<PageSummary> {
        if !self.is_connected() {
            info!("cannot request page summary: companion not connected");
            return None;
        }

        let _guard = match self.inner.summary_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("page summary request already in flight; waiting for the slot");
                self.inner.summary_lock.lock().await
            }
        };

        let (tx, rx) = oneshot::channel();
        *self.inner.pending_summary.lock() = Some(tx);

        if !self.try_send(BridgeMessage::RequestDom) {
            self.inner.pending_summary.lock().take();
            info!("cannot request page summary: companion not connected");
            return None;
        }
        debug!("sent page summary request to the companion");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(summary)) => Some(summary),
            Ok(Err(_)) => {
                // Completion dropped without a reply: the connection went away.
                info!("page summary request abandoned: companion disconnected");
                None
            }
            Err(_) => {
                // Drop the completion so a late reply finds no pending slot.
                self.inner.pending_summary.lock().take();
                info!(
                    timeout_ms = timeout.as_millis() as u64,
                    "page summary request timed out"
                );
                None
            }
        }
    }

    /// Asks the companion to outline `selector` in the live page. Swallowed
    /// with a log line when no companion is attached.
    pub fn highlight_element(&self, selector: &str, color: &str, thickness: f64) {
        let delivered = self.try_send(BridgeMessage::HighlightElement {
            selector: selector.to_owned(),
            color: color.to_owned(),
            thickness,
        });
        if delivered {
            info!(selector, color, thickness, "sent element highlight");
        } else {
            debug!(selector, "dropping highlight command: companion not connected");
        }
    }

    pub fn clear_highlight(&self) {
        if self.try_send(BridgeMessage::ClearHighlight) {
            debug!("sent highlight clear");
        }
    }

    pub fn set_zoom(&self, font_size: &str, enabled: bool) {
        let delivered = self.try_send(BridgeMessage::SetZoom {
            font_size: font_size.to_owned(),
            enabled,
        });
        if delivered {
            info!(font_size, enabled, "sent zoom preference");
        } else {
            debug!(font_size, "dropping zoom preference: companion not connected");
        }
    }

    pub fn set_zoom_enabled(&self, enabled: bool) {
        if !self.try_send(BridgeMessage::SetZoomEnabled { enabled }) {
            debug!(enabled, "dropping zoom toggle: companion not connected");
        }
    }

    fn try_send(&self, message: BridgeMessage) -> bool {
        let outbound = {
            let slot = self.inner.slot.lock();
            match (&slot.state, &slot.conn) {
                (SlotState::Open, Some(conn)) => Some(conn.outbound.clone()),
                _ => None,
            }
        };
        match outbound {
            Some(tx) => tx.send(Outbound::Frame(message)).is_ok(),
            None => false,
        }
    }

    fn claim_slot(&self) -> Result<(Uuid, mpsc::UnboundedReceiver<Outbound>), BridgeError> {
        let mut slot = self.inner.slot.lock();
        if slot.state != SlotState::Idle {
            return Err(BridgeError::ConnectionBusy);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        slot.state = SlotState::Open;
        slot.conn = Some(ActiveConnection { id, outbound: tx });
        Ok((id, rx))
    }

    fn release_slot(&self, connection_id: Uuid) {
        let released = {
            let mut slot = self.inner.slot.lock();
            if slot.conn.as_ref().map(|conn| conn.id) == Some(connection_id) {
                slot.conn = None;
                slot.state = SlotState::Idle;
                true
            } else {
                false
            }
        };
        if released {
            // A reply can no longer arrive for this connection.
            self.inner.pending_summary.lock().take();
            let _ = self.inner.status_tx.send(false);
        }
    }

    /// Dispatches one inbound frame. Protocol errors drop the frame, never
    /// the connection.
    fn handle_frame(&self, raw: &str) {
        match codec::decode(raw) {
            Ok(BridgeMessage::DomSummary { data, .. }) => {
                debug!(
                    url = %data.url,
                    elements = data.element_count(),
                    "page summary received"
                );
                *self.inner.last_summary.lock() = Some(data.clone());
                match self.inner.pending_summary.lock().take() {
                    Some(tx) => {
                        let _ = tx.send(data);
                    }
                    None => debug!("dropping page summary with no pending request"),
                }
            }
            Ok(BridgeMessage::ConnectionStatus { connected }) => {
                info!(connected, "companion reported its connection status");
            }
            Ok(BridgeMessage::Error { message }) => {
                warn!(%message, "companion reported an error");
            }
            Ok(
                BridgeMessage::Pong
                | BridgeMessage::HighlightSuccess
                | BridgeMessage::ZoomSuccess { .. },
            ) => {
                // Diagnostic acks; state is already up to date.
                trace!("companion ack received");
            }
            Ok(other) => {
                debug!(?other, "ignoring message not addressed to the bridge");
            }
            Err(DecodeError::UnknownType(tag)) => {
                warn!(%tag, "ignoring message with unknown type");
            }
            Err(err) => {
                warn!(error = %err, "discarding malformed frame");
            }
        }
    }
}

async fn serve_loop(
    bridge: Bridge,
    listener: TcpListener,
    addr: SocketAddr,
    shutdown_rx: watch::Receiver<bool>,
) {
    let mut listener = Some(listener);
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let current = match listener.take() {
            Some(listener) => listener,
            None => match TcpListener::bind(addr).await {
                Ok(listener) => listener,
                Err(err) => {
                    warn!(%addr, error = %err, "bridge listener rebind failed; retrying");
                    tokio::time::sleep(LISTENER_RESTART_DELAY).await;
                    continue;
                }
            },
        };

        let shutdown = {
            let mut rx = shutdown_rx.clone();
            async move {
                let _ = rx.wait_for(|stop| *stop).await;
            }
        };

        match axum::serve(current, bridge.router())
            .with_graceful_shutdown(shutdown)
            .await
        {
            Ok(()) => break,
            Err(err) => {
                warn!(error = %err, "bridge listener failed; restarting after backoff");
                tokio::time::sleep(LISTENER_RESTART_DELAY).await;
            }
        }
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn ws_handler(State(bridge): State<Bridge>, ws: WebSocketUpgrade) -> impl IntoResponse {
    match bridge.claim_slot() {
        Ok((connection_id, outbound_rx)) => ws
            .on_upgrade(move |socket| handle_connection(socket, bridge, connection_id, outbound_rx))
            .into_response(),
        Err(_) => {
            warn!("rejected companion connection: slot already open");
            StatusCode::CONFLICT.into_response()
        }
    }
}

/// One event loop per connection: a writer task drains the outbound queue, a
/// keepalive task pings on a fixed interval, and this reader loop consumes
/// frames in arrival order until the peer goes away.
async fn handle_connection(
    socket: WebSocket,
    bridge: Bridge,
    connection_id: Uuid,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
) {
    info!(%connection_id, "browser companion connected");
    let _ = bridge.inner.status_tx.send(true);

    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(item) = outbound_rx.recv().await {
            match item {
                Outbound::Frame(message) => match codec::encode(&message) {
                    Ok(text) => {
                        if ws_tx.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!(error = %err, "failed to encode outbound message"),
                },
                Outbound::Close => {
                    let _ = ws_tx
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::NORMAL,
                            reason: "bridge shutting down".into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    let keepalive = tokio::spawn({
        let bridge = bridge.clone();
        async move {
            let mut ticker = tokio::time::interval(bridge.inner.keepalive_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                // A failed ping is not retried mid-interval; the next tick
                // will try again, or the transport will tear the link down.
                if !bridge.try_send(BridgeMessage::Ping) {
                    warn!("keepalive ping not delivered");
                }
            }
        }
    });

    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(Message::Text(text)) => bridge.handle_frame(&text),
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => bridge.handle_frame(&text),
                Err(_) => warn!("discarding non-UTF8 binary frame"),
            },
            Ok(Message::Close(frame)) => {
                info!(
                    reason = ?frame.map(|f| f.reason.to_string()),
                    "companion closed the websocket"
                );
                break;
            }
            Ok(_) => continue,
            Err(err) => {
                warn!(error = %err, "websocket receive error");
                break;
            }
        }
    }

    // No orphaned timers: the keepalive dies with the connection.
    keepalive.abort();
    writer.abort();
    bridge.release_slot(connection_id);
    info!(%connection_id, "browser companion disconnected");
}
