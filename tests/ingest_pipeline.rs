// tests/ingest_pipeline.rs
//
// Pipeline-level behavior through a full coordinator: dedupe, guards,
// fingerprint stability and the analysis-reuse window.

mod common;

use axum::http::header;
use axum::routing::get;
use axum::Router;
use common::{finding, harness, record};
use signal_refinery::analyze::llm::{Llm, MockLlm};
use signal_refinery::ingest::fingerprint;
use signal_refinery::ingest::media::PDF_SENTINEL;
use signal_refinery::ingest::types::{IngestOutcome, MediaRef};

#[tokio::test]
async fn identical_text_never_creates_a_second_row() {
    let h = harness(MockLlm::fixed("[]"));

    let first = h
        .coordinator
        .ingest_direct(record("News", "Central bank hikes rates 25bp."))
        .await
        .unwrap();
    let IngestOutcome::Accepted { id } = &first else {
        panic!("expected accepted, got {first:?}");
    };

    let second = h
        .coordinator
        .ingest_direct(record("News", "Central bank hikes rates 25bp."))
        .await
        .unwrap();
    assert_eq!(
        second,
        IngestOutcome::Deduplicated { id: id.clone() },
        "second ingest binds to the existing item"
    );

    let stats = h.coordinator.store.stats().unwrap();
    assert_eq!(stats.items, 1);
    assert_eq!(h.llm.calls(), 0, "ingest alone never calls the LLM");
}

#[tokio::test]
async fn output_loop_guard_drops_our_own_channel() {
    let h = harness(MockLlm::fixed("[]"));
    let out = h
        .coordinator
        .ingest_direct(record("Refinery Signals", "echo of our own card"))
        .await
        .unwrap();
    assert_eq!(out, IngestOutcome::Dropped);
    assert_eq!(h.coordinator.store.stats().unwrap().items, 0);

    // Case-insensitive match.
    let out = h
        .coordinator
        .ingest_direct(record("refinery signals", "echo again"))
        .await
        .unwrap();
    assert_eq!(out, IngestOutcome::Dropped);
}

#[tokio::test]
async fn empty_after_scrub_returns_no_content() {
    let h = harness(MockLlm::fixed("[]"));
    let out = h
        .coordinator
        .ingest_direct(record("News", "   \t  "))
        .await
        .unwrap();
    // Whitespace-only input is vetoed by the scrubber.
    assert!(matches!(out, IngestOutcome::Dropped | IngestOutcome::NoContent));
    assert_eq!(h.coordinator.store.stats().unwrap().items, 0);
}

/// Serve media blobs the enricher can download.
async fn serve_media() -> String {
    let app = Router::new()
        .route(
            "/doc.pdf",
            get(|| async { ([(header::CONTENT_TYPE, "application/pdf")], "%PDF-1.4") }),
        )
        .route(
            "/blob.bin",
            get(|| async { ([(header::CONTENT_TYPE, "application/octet-stream")], "xx") }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind media server");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn media_only_message_survives_the_scrub_veto() {
    let base = serve_media().await;
    let h = harness(MockLlm::fixed("[]"));

    // A PDF with a whitespace-only caption: the scrubber vetoes the text,
    // but enrichment supplies the sentinel and the item is persisted.
    let mut rec = record("News", "   ");
    rec.media = Some(MediaRef {
        url: format!("{base}/doc.pdf"),
        mime: None,
    });
    let out = h.coordinator.ingest_direct(rec).await.unwrap();
    let IngestOutcome::Accepted { id } = &out else {
        panic!("expected accepted, got {out:?}");
    };
    let item = h.coordinator.store.content_item(id).unwrap().unwrap();
    assert_eq!(item.raw_text, PDF_SENTINEL);
    assert_eq!(h.llm.calls(), 0, "the sentinel path defers analysis");

    // Unsupported media with no caption: enrichment contributes nothing,
    // so the empty guard ends the run.
    let mut rec = record("News", "");
    rec.media = Some(MediaRef {
        url: format!("{base}/blob.bin"),
        mime: None,
    });
    let out = h.coordinator.ingest_direct(rec).await.unwrap();
    assert_eq!(out, IngestOutcome::NoContent);
    assert_eq!(h.coordinator.store.stats().unwrap().items, 1);
}

#[tokio::test]
async fn scrubbed_text_is_what_gets_fingerprinted() {
    let h = harness(MockLlm::fixed("[]"));
    let out = h
        .coordinator
        .ingest_direct(record("News", "reach me at alice@example.com about the deal"))
        .await
        .unwrap();
    let id = out.id().unwrap().to_string();
    let item = h.coordinator.store.content_item(&id).unwrap().unwrap();
    assert!(item.raw_text.contains("[EMAIL]"));
    assert!(!item.raw_text.contains("alice@example.com"));
    assert_eq!(item.content_hash, fingerprint(&item.raw_text));
}

#[test]
fn fingerprint_is_stable_and_lowercase_hex() {
    let a = fingerprint("Central bank hikes rates 25bp.");
    let b = fingerprint("Central bank hikes rates 25bp.");
    assert_eq!(a, b);
    assert_eq!(a.len(), 64);
    assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
}

#[tokio::test]
async fn reuse_window_skips_the_llm_and_derives_a_signal() {
    let h = harness(MockLlm::scripted(vec![Ok(finding("Rate hike 25bp", 85))]));

    let first = h
        .coordinator
        .ingest_direct(record("News", "Central bank hikes rates 25bp."))
        .await
        .unwrap();
    let original_id = first.id().unwrap().to_string();

    // One analyzer pass: one LLM call, one signal, one mirror send.
    h.coordinator.analyze_once().await;
    assert_eq!(h.llm.calls(), 1);
    let (signals, total) = h
        .coordinator
        .store
        .list_signals(&Default::default(), 10, 0)
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(signals[0].relevance_score, 85);

    // Re-ingest the identical text: served from the cached analysis.
    let again = h
        .coordinator
        .ingest_direct(record("News", "Central bank hikes rates 25bp."))
        .await
        .unwrap();
    assert_eq!(
        again,
        IngestOutcome::Reused {
            id: original_id.clone()
        }
    );
    assert_eq!(h.llm.calls(), 1, "no new LLM call inside the reuse window");

    let (signals, total) = h
        .coordinator
        .store
        .list_signals(&Default::default(), 10, 0)
        .unwrap();
    assert_eq!(total, 2, "a fresh signal row references the original item");
    assert!(signals
        .iter()
        .all(|s| s.source_item_ids == vec![original_id.clone()]));

    // Mirror decision was recomputed for the reused signal too.
    assert_eq!(h.sender.messages().len(), 2);
}
