//! The companion's connection loop: connect, serve commands, reconnect on a
//! fixed interval forever.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use guidepost_core::{
    codec,
    protocol::BridgeMessage,
    zoom_level_for,
};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::{ClientState, Command, CompanionConfig, PageActions};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum SessionEnd {
    Shutdown,
    Reconnect,
    Closed,
}

#[derive(Default)]
struct ZoomState {
    enabled: bool,
    font_size: Option<String>,
}

pub(crate) async fn run<A: PageActions>(
    config: CompanionConfig,
    actions: Arc<A>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ClientState>,
) {
    // Repeated failures are expected while the desktop app is away; log the
    // first one at info and the rest quietly.
    let mut logged_failure = false;
    let mut zoom = ZoomState::default();

    loop {
        let _ = state_tx.send(ClientState::Connecting);
        match tokio_tungstenite::connect_async(config.url.as_str()).await {
            Ok((stream, _response)) => {
                info!(url = %config.url, "connected to the guidance bridge");
                logged_failure = false;
                let _ = state_tx.send(ClientState::Connected);

                let end =
                    serve_connection(stream, actions.as_ref(), &mut commands, &mut zoom).await;
                let _ = state_tx.send(ClientState::Disconnected);
                match end {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Reconnect => {
                        info!("manual reconnect requested");
                        continue;
                    }
                    SessionEnd::Closed => {
                        info!("bridge connection lost; retrying in the background");
                        logged_failure = true;
                    }
                }
            }
            Err(err) => {
                let _ = state_tx.send(ClientState::Disconnected);
                if logged_failure {
                    debug!(url = %config.url, error = %err, "bridge still unreachable");
                } else {
                    info!(url = %config.url, error = %err, "bridge unreachable; will keep retrying");
                    logged_failure = true;
                }
            }
        }

        match wait_for_retry(&config, &mut commands).await {
            SessionEnd::Shutdown => break,
            SessionEnd::Reconnect | SessionEnd::Closed => {}
        }
    }
    let _ = state_tx.send(ClientState::Disconnected);
}

/// Sleeps out the retry interval unless a command cuts it short.
async fn wait_for_retry(
    config: &CompanionConfig,
    commands: &mut mpsc::UnboundedReceiver<Command>,
) -> SessionEnd {
    tokio::select! {
        _ = tokio::time::sleep(config.retry_interval) => SessionEnd::Closed,
        command = commands.recv() => match command {
            Some(Command::Reconnect) => SessionEnd::Reconnect,
            Some(Command::Shutdown) | None => SessionEnd::Shutdown,
        },
    }
}

async fn serve_connection<A: PageActions + ?Sized>(
    mut stream: WsStream,
    actions: &A,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    zoom: &mut ZoomState,
) -> SessionEnd {
    if send(&mut stream, &BridgeMessage::ConnectionStatus { connected: true })
        .await
        .is_err()
    {
        return SessionEnd::Closed;
    }

    loop {
        tokio::select! {
            command = commands.recv() => {
                let _ = stream.close(None).await;
                return match command {
                    Some(Command::Reconnect) => SessionEnd::Reconnect,
                    Some(Command::Shutdown) | None => SessionEnd::Shutdown,
                };
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if handle_frame(&mut stream, actions, zoom, &text).await.is_err() {
                        return SessionEnd::Closed;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    return SessionEnd::Closed;
                }
                Some(Ok(_)) => continue,
                Some(Err(err)) => {
                    warn!(error = %err, "websocket receive error");
                    return SessionEnd::Closed;
                }
            },
        }
    }
}

async fn handle_frame<A: PageActions + ?Sized>(
    stream: &mut WsStream,
    actions: &A,
    zoom: &mut ZoomState,
    raw: &str,
) -> Result<(), ()> {
    let message = match codec::decode(raw) {
        Ok(message) => message,
        Err(err) => {
            warn!(error = %err, "ignoring undecodable frame from the bridge");
            return Ok(());
        }
    };

    match message {
        BridgeMessage::Ping => send(stream, &BridgeMessage::Pong).await,
        BridgeMessage::RequestDom => {
            debug!("bridge requested a page summary");
            let reply = match actions.summarize_page().await {
                Ok(summary) => BridgeMessage::DomSummary { data: summary, tab_id: None },
                Err(reason) => BridgeMessage::Error {
                    message: format!("Failed to extract DOM: {reason}"),
                },
            };
            send(stream, &reply).await
        }
        BridgeMessage::HighlightElement { selector, color, thickness } => {
            let reply = match actions.highlight(&selector, &color, thickness).await {
                Ok(()) => BridgeMessage::HighlightSuccess,
                Err(reason) => BridgeMessage::Error {
                    message: format!("Failed to highlight element: {reason}"),
                },
            };
            send(stream, &reply).await
        }
        BridgeMessage::ClearHighlight => {
            actions.clear_highlight().await;
            Ok(())
        }
        BridgeMessage::SetZoom { font_size, enabled } => {
            zoom.enabled = enabled;
            zoom.font_size = Some(font_size.clone());
            if enabled {
                apply_zoom(stream, actions, &font_size).await
            } else {
                reset_zoom(actions).await;
                Ok(())
            }
        }
        BridgeMessage::SetZoomEnabled { enabled } => {
            zoom.enabled = enabled;
            if enabled {
                match zoom.font_size.clone() {
                    Some(font_size) => apply_zoom(stream, actions, &font_size).await,
                    None => Ok(()),
                }
            } else {
                reset_zoom(actions).await;
                Ok(())
            }
        }
        other => {
            debug!(?other, "ignoring message not addressed to the companion");
            Ok(())
        }
    }
}

async fn apply_zoom<A: PageActions + ?Sized>(
    stream: &mut WsStream,
    actions: &A,
    font_size: &str,
) -> Result<(), ()> {
    let Some(zoom_level) = zoom_level_for(font_size) else {
        warn!(font_size, "ignoring zoom request with unknown font size");
        return Ok(());
    };
    match actions.set_zoom(zoom_level).await {
        Ok(()) => {
            send(
                stream,
                &BridgeMessage::ZoomSuccess {
                    font_size: Some(font_size.to_owned()),
                    zoom_level: Some(zoom_level),
                },
            )
            .await
        }
        Err(reason) => {
            send(
                stream,
                &BridgeMessage::Error {
                    message: format!("Failed to apply zoom: {reason}"),
                },
            )
            .await
        }
    }
}

async fn reset_zoom<A: PageActions + ?Sized>(actions: &A) {
    if let Err(reason) = actions.set_zoom(1.0).await {
        warn!(%reason, "failed to reset page zoom");
    }
}

async fn send(stream: &mut WsStream, message: &BridgeMessage) -> Result<(), ()> {
    let text = match codec::encode(message) {
        Ok(text) => text,
        Err(err) => {
            warn!(error = %err, "failed to encode outbound message");
            return Ok(());
        }
    };
    stream.send(Message::Text(text)).await.map_err(|err| {
        warn!(error = %err, "websocket send failed");
    })
}
