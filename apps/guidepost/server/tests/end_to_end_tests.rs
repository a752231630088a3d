//! Full-stack exercise: the real companion client attached to the real
//! bridge, with a scripted page standing in for the browser.

use std::sync::Arc;
use std::time::Duration;

use guidepost_client::{CompanionClient, CompanionConfig, ScriptedPage};
use guidepost_server::Bridge;

#[tokio::test]
async fn summary_and_highlight_flow_through_the_companion() {
    let bridge = Bridge::new();
    let addr = bridge
        .start("127.0.0.1:0".parse().unwrap())
        .await
        .expect("bridge must bind");

    let page = Arc::new(ScriptedPage::sample());
    let handle = CompanionClient::new(
        CompanionConfig::local(addr.port()).with_retry_interval(Duration::from_millis(50)),
        page.clone(),
    )
    .spawn();

    let mut status = bridge.watch_status();
    tokio::time::timeout(Duration::from_secs(2), status.wait_for(|connected| *connected))
        .await
        .expect("companion never attached")
        .expect("status channel closed");

    let summary = bridge
        .request_page_summary(Duration::from_secs(2))
        .await
        .expect("summary must round-trip through the companion");
    assert_eq!(summary.url, "https://example.com/");
    assert_eq!(summary.title, "Example Domain");

    bridge.highlight_element("p > a", "#00FF00", 4.0);
    for _ in 0..50 {
        if !page.highlights().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let highlights = page.highlights();
    assert_eq!(highlights.len(), 1);
    assert_eq!(highlights[0].selector, "p > a");
    assert_eq!(highlights[0].color, "#00FF00");

    bridge.set_zoom("Small", true);
    for _ in 0..50 {
        if !page.zooms().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(page.zooms(), vec![0.9]);

    handle.shutdown().await;
    bridge.stop().await;
}
