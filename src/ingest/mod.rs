// src/ingest/mod.rs
//! The ingest pipeline: normalize → scrub → enrich → fingerprint →
//! dedupe → enqueue. Everything that enters the system funnels through
//! `Pipeline::run`.

pub mod collectors;
pub mod media;
pub mod scrub;
pub mod types;

use std::sync::Arc;

use anyhow::{Context, Result};
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use sha2::{Digest, Sha256};

use crate::analyze::Analyzer;
use crate::config::Config;
use crate::coordinator::heartbeat::HeartbeatHandle;
use crate::store::{now_ms, ContentItem, Store};
use media::MediaEnricher;
use types::{IngestOutcome, IngestRecord};

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_accepted_total", "New content items persisted.");
        describe_counter!("ingest_deduped_total", "Ingests folded into an existing item.");
        describe_counter!("ingest_reused_total", "Ingests satisfied from a cached analysis.");
        describe_counter!("ingest_dropped_total", "Ingests dropped by guard or scrubber.");
        describe_counter!("ingest_empty_total", "Ingests with nothing left after scrubbing.");
    });
}

/// SHA-256 of the scrubbed text, lowercase hex. The deduplication key.
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

pub struct Pipeline {
    store: Arc<Store>,
    analyzer: Arc<Analyzer>,
    enricher: MediaEnricher,
    heartbeat: Arc<HeartbeatHandle>,
    cfg: Arc<Config>,
}

impl Pipeline {
    pub fn new(
        store: Arc<Store>,
        analyzer: Arc<Analyzer>,
        enricher: MediaEnricher,
        heartbeat: Arc<HeartbeatHandle>,
        cfg: Arc<Config>,
    ) -> Self {
        ensure_metrics_described();
        Self {
            store,
            analyzer,
            enricher,
            heartbeat,
            cfg,
        }
    }

    /// Run one record through the pipeline. `from_feed` skips the
    /// output-loop guard (feed titles never collide with our channels).
    pub async fn run(&self, record: IngestRecord, from_feed: bool) -> Result<IngestOutcome> {
        // 1. Output-loop guard: our own mirrored output must not re-enter.
        if !from_feed
            && self
                .cfg
                .outbound_channel_labels
                .iter()
                .any(|label| label.eq_ignore_ascii_case(record.title.trim()))
        {
            counter!("ingest_dropped_total").increment(1);
            tracing::debug!(title = %record.title, "output-loop guard dropped item");
            return Ok(IngestOutcome::Dropped);
        }

        // 2. Scrub. The veto only ends a message that has nothing else to
        //    offer: a media attachment with an empty caption continues to
        //    step 3, where enrichment supplies the text. The empty guard at
        //    step 4 still drops it if enrichment produces nothing.
        let mut text = match scrub::scrub(&record.text) {
            Some(t) => t,
            None if record.media.is_none() => {
                counter!("ingest_dropped_total").increment(1);
                return Ok(IngestOutcome::Dropped);
            }
            None => String::new(),
        };

        // 3. Media enrichment: append derived text after scrubbing it too.
        if let Some(media) = &record.media {
            match self.enricher.enrich(media).await {
                Ok(Some(derived)) => {
                    if let Some(derived) = scrub::scrub(&derived) {
                        if text.is_empty() {
                            text = derived;
                        } else {
                            text = format!("{text}\n\n{derived}");
                        }
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(url = %media.url, error = ?err, "media enrichment failed");
                    self.store.log_state(
                        "ingest",
                        "media enrichment failed",
                        Some(&serde_json::json!({"url": media.url, "error": err.to_string()})),
                    )?;
                }
            }
        }

        // 4. Empty guard.
        if text.is_empty() {
            counter!("ingest_empty_total").increment(1);
            return Ok(IngestOutcome::NoContent);
        }

        // 5. Fingerprint.
        let content_hash = fingerprint(&text);
        let now = now_ms();

        // 6. Analysis reuse: a fresh analysis for this hash yields a signal
        //    without touching the LLM.
        if let Some((item_id, blob)) = self.store.recent_analysis_by_hash(
            &content_hash,
            self.cfg.analysis_reuse_window_ms,
            now,
        )? {
            let item = self
                .store
                .content_item(&item_id)?
                .context("cached item vanished between lookup and load")?;
            let promoted = self.analyzer.promote_from_cached(&item, &blob).await?;
            counter!("ingest_reused_total").increment(1);
            tracing::info!(item = %item_id, promoted, "reused cached analysis");
            return Ok(IngestOutcome::Reused { id: item_id });
        }

        // 7. Dedupe insert.
        let item = ContentItem {
            id: uuid::Uuid::new_v4().to_string(),
            source_id: record.chat_id.clone(),
            source_name: record.title.clone(),
            raw_text: text,
            content_hash,
            created_at: now,
            processed_json: None,
            is_signal: 0,
            last_analyzed_at: None,
            retry_count: 0,
            last_error: None,
        };
        let outcome = self.store.upsert_content_item(&item)?;
        if !outcome.inserted {
            counter!("ingest_deduped_total").increment(1);
            return Ok(IngestOutcome::Deduplicated { id: outcome.id });
        }

        // 8. Tickle: pull the next heartbeat in close and reset the backoff
        //    so the analyzer sees this item promptly. Feed items skip this;
        //    the poller runs inside a tick and the analyzer follows it.
        if !from_feed {
            self.heartbeat.tickle()?;
        }
        counter!("ingest_accepted_total").increment(1);
        Ok(IngestOutcome::Accepted { id: outcome.id })
    }
}
