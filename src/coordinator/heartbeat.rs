// src/coordinator/heartbeat.rs
//! The elastic heartbeat: one durable interval, doubled while idle,
//! snapped back to base on activity, preempted entirely by fresh ingest.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{watch, Notify};

use crate::store::Store;
use super::Coordinator;

/// Settings keys for durable scheduler state.
pub const SETTING_NEXT_INTERVAL: &str = "next_interval_ms";
pub const SETTING_LAST_DIGEST: &str = "last_digest_at";
pub const SETTING_LAST_JANITOR: &str = "last_janitor_at";

/// Shared handle for preempting the scheduler. Ingest tickles this to get
/// the analyzer running within the minimum interval.
pub struct HeartbeatHandle {
    store: Arc<Store>,
    notify: Notify,
    base_ms: u64,
}

impl HeartbeatHandle {
    pub fn new(store: Arc<Store>, base_ms: u64) -> Self {
        Self {
            store,
            notify: Notify::new(),
            base_ms,
        }
    }

    /// Reset the backoff to base and wake the scheduler now.
    pub fn tickle(&self) -> Result<()> {
        self.store
            .put_setting(SETTING_NEXT_INTERVAL, &self.base_ms.to_string())?;
        self.notify.notify_one();
        Ok(())
    }

    pub async fn preempted(&self) {
        self.notify.notified().await;
    }

    /// Current persisted interval, falling back to base.
    pub fn current_interval_ms(&self) -> u64 {
        self.store
            .get_setting(SETTING_NEXT_INTERVAL)
            .ok()
            .flatten()
            .and_then(|v| v.parse().ok())
            .unwrap_or(self.base_ms)
    }
}

/// Drive ticks until shutdown. A restart resumes from the persisted
/// interval; a tickle reschedules the next tick to the minimum interval.
pub async fn run(coordinator: Arc<Coordinator>, mut shutdown: watch::Receiver<bool>) {
    let handle = coordinator.heartbeat_handle();
    let min_ms = coordinator.cfg.min_heartbeat_ms;
    let mut next_ms = handle.current_interval_ms();
    tracing::info!(interval_ms = next_ms, "heartbeat resuming");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_millis(next_ms)) => {}
            _ = handle.preempted() => {
                tracing::debug!("heartbeat preempted by ingest");
                // Run soon, not immediately: lets a burst of ingests coalesce
                // into one analyzer pass.
                tokio::select! {
                    _ = tokio::time::sleep(std::time::Duration::from_millis(min_ms)) => {}
                    _ = shutdown.changed() => break,
                }
            }
            _ = shutdown.changed() => break,
        }
        next_ms = coordinator.run_tick().await;
    }
    tracing::info!("heartbeat stopped");
}

/// The next interval given the previous one and this tick's activity.
pub fn next_interval_ms(previous: u64, active: bool, base: u64, max: u64) -> u64 {
    if active {
        base
    } else {
        previous.saturating_mul(2).min(max)
    }
}
