mod common;

use std::time::Duration;

use common::{connect, recv_message, send_message, start_bridge};
use guidepost_core::protocol::{BridgeMessage, PageElement, PageSummary};
use guidepost_server::Bridge;
use tokio_tungstenite::tungstenite;

fn sample_summary() -> PageSummary {
    PageSummary {
        url: "https://mail.example.com/inbox".to_owned(),
        title: "Inbox".to_owned(),
        elements: vec![PageElement {
            id: "compose".to_owned(),
            selector: "#compose-button".to_owned(),
            tag: "button".to_owned(),
            text: Some("Compose".to_owned()),
            ..Default::default()
        }],
    }
}

#[tokio::test]
async fn second_connection_is_rejected_with_conflict() {
    let (bridge, addr) = start_bridge().await;
    let mut first = connect(addr).await;

    let err = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .expect_err("second connection must be refused");
    match err {
        tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 409);
        }
        other => panic!("expected an HTTP rejection, got {other:?}"),
    }

    // The original connection keeps working.
    bridge.highlight_element("#compose-button", "#00FF00", 4.0);
    match recv_message(&mut first).await {
        BridgeMessage::HighlightElement { selector, .. } => {
            assert_eq!(selector, "#compose-button");
        }
        other => panic!("expected a highlight, got {other:?}"),
    }

    bridge.stop().await;
}

#[tokio::test]
async fn slot_reopens_after_disconnect() {
    let (bridge, addr) = start_bridge().await;

    let first = connect(addr).await;
    drop(first);

    // The slot is released asynchronously; poll until it frees up.
    let mut second = None;
    for _ in 0..50 {
        match tokio_tungstenite::connect_async(format!("ws://{addr}/ws")).await {
            Ok((socket, _)) => {
                second = Some(socket);
                break;
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
        }
    }
    let mut second = second.expect("slot must free up after the first client leaves");

    bridge.clear_highlight();
    assert_eq!(recv_message(&mut second).await, BridgeMessage::ClearHighlight);

    bridge.stop().await;
}

#[tokio::test]
async fn commands_without_companion_are_dropped_not_queued() {
    let (bridge, addr) = start_bridge().await;

    bridge.set_zoom("Large", true);
    bridge.set_zoom_enabled(true);
    bridge.highlight_element("#compose-button", "#00FF00", 4.0);

    let mut socket = connect(addr).await;
    bridge.clear_highlight();

    // The first frame after connecting is the live command, not a replay.
    assert_eq!(recv_message(&mut socket).await, BridgeMessage::ClearHighlight);

    bridge.stop().await;
}

#[tokio::test]
async fn page_summary_request_round_trips() {
    let (bridge, addr) = start_bridge().await;
    let mut socket = connect(addr).await;

    let companion = tokio::spawn(async move {
        assert_eq!(recv_message(&mut socket).await, BridgeMessage::RequestDom);
        send_message(
            &mut socket,
            &BridgeMessage::DomSummary {
                data: sample_summary(),
                tab_id: Some(7),
            },
        )
        .await;
        socket
    });

    // Give the upgrade a moment to land in the slot.
    wait_until_connected(&bridge).await;
    let summary = bridge
        .request_page_summary(Duration::from_secs(2))
        .await
        .expect("summary must arrive");
    assert_eq!(summary.url, "https://mail.example.com/inbox");
    assert_eq!(summary.element_count(), 1);
    assert_eq!(bridge.last_page_summary().map(|s| s.title), Some("Inbox".to_owned()));

    companion.await.unwrap();
    bridge.stop().await;
}

#[tokio::test]
async fn late_summary_reply_is_discarded() {
    let (bridge, addr) = start_bridge().await;
    let mut socket = connect(addr).await;
    wait_until_connected(&bridge).await;

    // Companion never answers in time.
    let result = bridge.request_page_summary(Duration::from_millis(100)).await;
    assert!(result.is_none());
    assert_eq!(recv_message(&mut socket).await, BridgeMessage::RequestDom);

    // The answer shows up after the deadline and must not leak anywhere.
    send_message(
        &mut socket,
        &BridgeMessage::DomSummary {
            data: sample_summary(),
            tab_id: None,
        },
    )
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // A fresh request still works and gets the fresh reply.
    let companion = tokio::spawn(async move {
        assert_eq!(recv_message(&mut socket).await, BridgeMessage::RequestDom);
        let mut fresh = sample_summary();
        fresh.title = "Inbox - second try".to_owned();
        send_message(
            &mut socket,
            &BridgeMessage::DomSummary {
                data: fresh,
                tab_id: None,
            },
        )
        .await;
        socket
    });

    let summary = bridge
        .request_page_summary(Duration::from_secs(2))
        .await
        .expect("fresh request must succeed");
    assert_eq!(summary.title, "Inbox - second try");

    companion.await.unwrap();
    bridge.stop().await;
}

#[tokio::test]
async fn concurrent_requests_share_the_single_slot() {
    let (bridge, addr) = start_bridge().await;
    let mut socket = connect(addr).await;
    wait_until_connected(&bridge).await;

    let companion = tokio::spawn(async move {
        // Exactly one outbound request despite two callers.
        assert_eq!(recv_message(&mut socket).await, BridgeMessage::RequestDom);
        tokio::time::sleep(Duration::from_millis(150)).await;
        send_message(
            &mut socket,
            &BridgeMessage::DomSummary {
                data: sample_summary(),
                tab_id: None,
            },
        )
        .await;

        // The second caller issues its own request once the slot frees.
        assert_eq!(recv_message(&mut socket).await, BridgeMessage::RequestDom);
        send_message(
            &mut socket,
            &BridgeMessage::DomSummary {
                data: sample_summary(),
                tab_id: None,
            },
        )
        .await;
        socket
    });

    let first = bridge.request_page_summary(Duration::from_secs(2));
    let second = {
        let bridge = bridge.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            bridge.request_page_summary(Duration::from_secs(2)).await
        }
    };
    let (first, second) = tokio::join!(first, second);
    assert!(first.is_some());
    assert!(second.is_some());

    companion.await.unwrap();
    bridge.stop().await;
}

#[tokio::test]
async fn disconnect_mid_request_returns_promptly() {
    let (bridge, addr) = start_bridge().await;
    let socket = connect(addr).await;
    wait_until_connected(&bridge).await;

    let request = {
        let bridge = bridge.clone();
        tokio::spawn(async move { bridge.request_page_summary(Duration::from_secs(30)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(socket);

    let result = tokio::time::timeout(Duration::from_secs(2), request)
        .await
        .expect("request must not wait out its full timeout")
        .unwrap();
    assert!(result.is_none());

    bridge.stop().await;
}

#[tokio::test]
async fn status_watch_tracks_the_connection() {
    let (bridge, addr) = start_bridge().await;
    let mut status = bridge.watch_status();
    assert!(!*status.borrow_and_update());

    let socket = connect(addr).await;
    status
        .wait_for(|connected| *connected)
        .await
        .expect("status channel must stay open");

    drop(socket);
    status
        .wait_for(|connected| !*connected)
        .await
        .expect("status channel must stay open");

    bridge.stop().await;
}

#[tokio::test]
async fn stop_closes_the_companion_connection() {
    let (bridge, addr) = start_bridge().await;
    let mut socket = connect(addr).await;
    wait_until_connected(&bridge).await;

    bridge.stop().await;

    use futures_util::StreamExt;
    let outcome = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match socket.next().await {
                Some(Ok(tungstenite::Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(_)) => break,
            }
        }
    })
    .await;
    assert!(outcome.is_ok(), "companion must observe the closure");
}

#[tokio::test]
async fn keepalive_pings_on_the_configured_interval() {
    let bridge = Bridge::with_keepalive_interval(Duration::from_millis(50));
    let addr = bridge
        .start("127.0.0.1:0".parse().unwrap())
        .await
        .expect("bridge must bind an ephemeral port");
    let mut socket = connect(addr).await;

    // Nothing else is outbound, so the next two frames are keepalives.
    assert_eq!(recv_message(&mut socket).await, BridgeMessage::Ping);
    assert_eq!(recv_message(&mut socket).await, BridgeMessage::Ping);

    bridge.stop().await;
}

#[tokio::test]
async fn keepalive_timer_dies_with_its_connection() {
    use futures_util::StreamExt;

    let interval = Duration::from_millis(50);
    let bridge = Bridge::with_keepalive_interval(interval);
    let addr = bridge
        .start("127.0.0.1:0".parse().unwrap())
        .await
        .expect("bridge must bind an ephemeral port");

    let mut first = connect(addr).await;
    assert_eq!(recv_message(&mut first).await, BridgeMessage::Ping);
    drop(first);

    let mut second = None;
    for _ in 0..50 {
        match tokio_tungstenite::connect_async(format!("ws://{addr}/ws")).await {
            Ok((socket, _)) => {
                second = Some(socket);
                break;
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
        }
    }
    let mut second = second.expect("slot must free up after the first client leaves");

    // A timer leaked from the first connection would roughly double the ping
    // rate on the second one. Count pings over a fixed window and require
    // the single-timer rate.
    let window = Duration::from_millis(400);
    let deadline = tokio::time::Instant::now() + window;
    let mut pings = 0usize;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, second.next()).await {
            Ok(Some(Ok(tungstenite::Message::Text(text)))) => {
                if matches!(
                    guidepost_core::codec::decode(&text),
                    Ok(BridgeMessage::Ping)
                ) {
                    pings += 1;
                }
            }
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(_))) | Ok(None) => break,
            Err(_) => break,
        }
    }
    assert!(pings >= 1, "keepalive must keep pinging the new connection");
    assert!(
        pings <= 12,
        "ping rate implies a leaked keepalive timer: {pings} pings in {window:?}"
    );

    bridge.stop().await;
}

async fn wait_until_connected(bridge: &guidepost_server::Bridge) {
    let mut status = bridge.watch_status();
    tokio::time::timeout(Duration::from_secs(2), status.wait_for(|connected| *connected))
        .await
        .expect("bridge never saw the connection")
        .expect("status channel closed");
}
