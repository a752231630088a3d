use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use guidepost_core::{codec, protocol::BridgeMessage};
use guidepost_server::Bridge;
use tokio::net::TcpStream;
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Starts a bridge on an ephemeral port and returns it with its address.
pub async fn start_bridge() -> (Bridge, SocketAddr) {
    let bridge = Bridge::new();
    let addr = bridge
        .start("127.0.0.1:0".parse().unwrap())
        .await
        .expect("bridge must bind an ephemeral port");
    (bridge, addr)
}

pub async fn connect(addr: SocketAddr) -> WsClient {
    let (socket, _response) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("companion connection must be accepted");
    socket
}

/// Reads frames until a bridge message decodes, failing after two seconds.
pub async fn recv_message(socket: &mut WsClient) -> BridgeMessage {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let frame = socket
                .next()
                .await
                .expect("socket closed while waiting for a message")
                .expect("websocket receive failed");
            if let Message::Text(text) = frame {
                return codec::decode(&text).expect("bridge sent an undecodable frame");
            }
        }
    })
    .await
    .expect("timed out waiting for a bridge message")
}

pub async fn send_message(socket: &mut WsClient, message: &BridgeMessage) {
    let text = codec::encode(message).expect("message must encode");
    socket
        .send(Message::Text(text))
        .await
        .expect("websocket send failed");
}
