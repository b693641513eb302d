// tests/poller.rs
//
// Feed polling end to end: a local HTTP server plays the feed host, a
// registered channel gets polled on tick, entries flow through the full
// ingest pipeline, and the 15-minute staleness gate holds.

mod common;

use axum::{routing::get, Router};
use common::harness;
use signal_refinery::analyze::llm::MockLlm;
use signal_refinery::store::{Channel, ChannelKind, ChannelStatus};

const FEED_XML: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Wire</title>
<item>
  <title>Central bank hikes rates</title>
  <link>https://wire.example/a</link>
  <description>25bp surprise.</description>
  <pubDate>Mon, 01 Sep 2025 12:34:56 GMT</pubDate>
  <guid>wire-a</guid>
</item>
<item>
  <title>Commodity squeeze eases</title>
  <link>https://wire.example/b</link>
  <description>Freight normalizing.</description>
  <guid>wire-b</guid>
</item>
</channel></rss>"#;

async fn serve_fixture() -> String {
    let app = Router::new().route("/rss", get(|| async { FEED_XML }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fixture server");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}/rss")
}

fn feed_channel(url: &str) -> Channel {
    Channel {
        id: "feed-wire".to_string(),
        name: "Wire".to_string(),
        kind: ChannelKind::Feed,
        feed_url: Some(url.to_string()),
        last_polled_at: None,
        success_count: 0,
        failure_count: 0,
        status: ChannelStatus::Active,
    }
}

#[tokio::test]
async fn due_feed_is_polled_and_items_ingested() {
    let url = serve_fixture().await;
    let h = harness(MockLlm::fixed("[]"));
    h.coordinator.store.upsert_channel(&feed_channel(&url)).unwrap();

    h.coordinator.run_tick().await;

    let stats = h.coordinator.store.stats().unwrap();
    assert_eq!(stats.items, 2, "both entries ingested");

    let ch = h.coordinator.store.get_channel("feed-wire").unwrap().unwrap();
    assert_eq!(ch.success_count, 1);
    assert_eq!(ch.failure_count, 0);
    assert!(ch.last_polled_at.is_some());

    // Entry shape: title, description, link.
    let rows = h
        .coordinator
        .store
        .select_rows("SELECT raw_text FROM content_items ORDER BY created_at", 10)
        .unwrap();
    let text = rows[0]["raw_text"].as_str().unwrap();
    assert!(text.contains("Central bank hikes rates"));
    assert!(text.contains("25bp surprise."));
    assert!(text.contains("https://wire.example/a"));
}

#[tokio::test]
async fn fresh_feed_is_not_repolled_within_the_window() {
    let url = serve_fixture().await;
    let h = harness(MockLlm::fixed("[]"));
    h.coordinator.store.upsert_channel(&feed_channel(&url)).unwrap();

    h.coordinator.run_tick().await;
    let first = h.coordinator.store.get_channel("feed-wire").unwrap().unwrap();

    h.coordinator.run_tick().await;
    let second = h.coordinator.store.get_channel("feed-wire").unwrap().unwrap();
    assert_eq!(
        first.success_count, second.success_count,
        "no second fetch inside 15 minutes"
    );
    // Identical entries would have deduped anyway.
    assert_eq!(h.coordinator.store.stats().unwrap().items, 2);
}

#[tokio::test]
async fn ignored_feed_is_skipped() {
    let url = serve_fixture().await;
    let h = harness(MockLlm::fixed("[]"));
    let mut ch = feed_channel(&url);
    ch.status = ChannelStatus::Ignored;
    h.coordinator.store.upsert_channel(&ch).unwrap();

    h.coordinator.run_tick().await;
    assert_eq!(h.coordinator.store.stats().unwrap().items, 0);
    let ch = h.coordinator.store.get_channel("feed-wire").unwrap().unwrap();
    assert_eq!(ch.success_count, 0);
}

#[tokio::test]
async fn unreachable_feed_counts_a_failure_and_ticks_on() {
    let h = harness(MockLlm::fixed("[]"));
    h.coordinator
        .store
        .upsert_channel(&feed_channel("http://127.0.0.1:9/rss"))
        .unwrap();

    h.coordinator.run_tick().await;

    let ch = h.coordinator.store.get_channel("feed-wire").unwrap().unwrap();
    assert_eq!(ch.failure_count, 1);
    assert_eq!(h.coordinator.store.stats().unwrap().items, 0);
}
