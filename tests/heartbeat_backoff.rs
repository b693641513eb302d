// tests/heartbeat_backoff.rs
//
// The elastic interval: idle ticks double toward the cap, activity and
// ingest preemption snap back to base. Driven through `run_tick` directly;
// the timer loop itself is a thin select around it.

mod common;

use common::{harness, record};
use signal_refinery::analyze::llm::MockLlm;
use signal_refinery::coordinator::heartbeat::SETTING_NEXT_INTERVAL;

fn stored_interval(h: &common::Harness) -> u64 {
    h.coordinator
        .store
        .get_setting(SETTING_NEXT_INTERVAL)
        .unwrap()
        .unwrap()
        .parse()
        .unwrap()
}

#[tokio::test]
async fn idle_ticks_double_until_capped() {
    let h = harness(MockLlm::fixed("[]"));

    // 5m base: 10m, 20m, 40m, 60m, 60m…
    let mut observed = Vec::new();
    for _ in 0..5 {
        observed.push(h.coordinator.run_tick().await);
    }
    assert_eq!(
        observed,
        vec![600_000, 1_200_000, 2_400_000, 3_600_000, 3_600_000]
    );
    assert_eq!(stored_interval(&h), 3_600_000);
}

#[tokio::test]
async fn ingest_preempts_the_backoff() {
    let h = harness(MockLlm::fixed("[]"));

    // Back off to 20m.
    h.coordinator.run_tick().await;
    h.coordinator.run_tick().await;
    assert_eq!(stored_interval(&h), 1_200_000);

    // One ingest resets the persisted interval to base immediately.
    h.coordinator
        .ingest_direct(record("News", "fresh item"))
        .await
        .unwrap();
    assert_eq!(stored_interval(&h), 300_000);
}

#[tokio::test]
async fn analyzed_but_unpromoted_tick_still_backs_off() {
    let h = harness(MockLlm::fixed("[]"));
    h.coordinator
        .ingest_direct(record("News", "non-story"))
        .await
        .unwrap();

    // The tick analyzes the item but promotes nothing and polls nothing:
    // not active, so the interval doubles from base.
    let next = h.coordinator.run_tick().await;
    assert_eq!(next, 600_000);
}

#[tokio::test]
async fn promoting_tick_resets_to_base() {
    let h = harness(MockLlm::scripted(vec![Ok(common::finding("big story", 90))]));

    // Pre-existing backoff state.
    h.coordinator.run_tick().await;
    assert_eq!(stored_interval(&h), 600_000);

    h.coordinator
        .ingest_direct(record("News", "big development"))
        .await
        .unwrap();
    let next = h.coordinator.run_tick().await;
    assert_eq!(next, 300_000, "signal activity snaps back to base");
    assert_eq!(stored_interval(&h), 300_000);
}
