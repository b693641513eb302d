// src/analyze/mod.rs
//! The analyzer: drains pending content items in batches, calls the LLM
//! once per source group, writes analyses back, and promotes high-relevance
//! entries to signals.

pub mod llm;
pub mod prompt;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::cache::PageCache;
use crate::config::Config;
use crate::notify::mirror::Mirror;
use crate::store::{now_ms, ContentItem, Sentiment, Signal, Store};
use llm::{DynLlm, LlmRequest};

/// Entries scoring above this become signals.
pub const PROMOTE_THRESHOLD: i64 = 40;

/// Upper bound on items folded into one digest pass; keeps the prompt sane.
const DIGEST_MAX_ITEMS: usize = 50;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("analyze_groups_total", "Source groups sent to the LLM.");
        describe_counter!("analyze_items_total", "Items analyzed successfully.");
        describe_counter!("analyze_failures_total", "Group-level LLM/parse failures.");
        describe_counter!("signals_promoted_total", "Analysis entries promoted to signals.");
        describe_counter!("signals_suppressed_total", "Promotions dropped as recent duplicates.");
    });
}

/// One LLM finding. The parser is tolerant: every field is defaulted so a
/// sloppy model response degrades instead of failing the batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisEntry {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub analysis: String,
    #[serde(default)]
    pub fact_check: Option<String>,
    #[serde(default)]
    pub relevance_score: f64,
    #[serde(default)]
    pub sentiment: String,
    #[serde(default)]
    pub tickers: Vec<String>,
    #[serde(default, alias = "sourceIds")]
    pub source_ids: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, alias = "urgent")]
    pub is_urgent: bool,
    /// Knowledge-graph side-output; retained verbatim, never interpreted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triples: Option<serde_json::Value>,
}

impl AnalysisEntry {
    pub fn score(&self) -> i64 {
        self.relevance_score.round().clamp(0.0, 100.0) as i64
    }
}

/// Parse the model output as a JSON array of entries; tolerate a single
/// object by wrapping it, and strip markdown code fences first.
pub fn parse_entries(raw: &str) -> Result<Vec<AnalysisEntry>> {
    let mut text = raw.trim();
    if let Some(stripped) = text.strip_prefix("```") {
        let stripped = stripped.strip_prefix("json").unwrap_or(stripped);
        text = stripped.strip_suffix("```").unwrap_or(stripped).trim();
    }
    if let Ok(entries) = serde_json::from_str::<Vec<AnalysisEntry>>(text) {
        return Ok(entries);
    }
    if let Ok(single) = serde_json::from_str::<AnalysisEntry>(text) {
        return Ok(vec![single]);
    }
    Err(anyhow!("unparseable analysis output: {}", text.chars().take(120).collect::<String>()))
}

/// Fingerprint for duplicate-signal suppression: sorted source ids + summary.
pub fn signal_fingerprint(source_item_ids: &[String], summary: &str) -> String {
    let mut ids: Vec<&str> = source_item_ids.iter().map(String::as_str).collect();
    ids.sort_unstable();
    let mut hasher = Sha256::new();
    for id in ids {
        hasher.update(id.as_bytes());
        hasher.update(b",");
    }
    hasher.update(b"|");
    hasher.update(summary.as_bytes());
    hex::encode(hasher.finalize())
}

/// Result of one analyzer pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassOutcome {
    pub analyzed: usize,
    pub promoted: usize,
    /// More work remains; the heartbeat should come back soon.
    pub pending_left: bool,
}

pub struct Analyzer {
    store: Arc<Store>,
    llm: DynLlm,
    mirror: Arc<Mirror>,
    cache: Arc<PageCache>,
    cfg: Arc<Config>,
}

impl Analyzer {
    pub fn new(
        store: Arc<Store>,
        llm: DynLlm,
        mirror: Arc<Mirror>,
        cache: Arc<PageCache>,
        cfg: Arc<Config>,
    ) -> Self {
        ensure_metrics_described();
        Self {
            store,
            llm,
            mirror,
            cache,
            cfg,
        }
    }

    /// One invocation of the batch algorithm. Groups fail independently:
    /// an LLM error bumps retries for that group's items only.
    pub async fn run_once(&self) -> Result<PassOutcome> {
        let items = self
            .store
            .take_pending_batch(self.cfg.batch_max, self.cfg.max_retries)?;
        if items.is_empty() {
            return Ok(PassOutcome::default());
        }

        let mut groups: BTreeMap<String, Vec<ContentItem>> = BTreeMap::new();
        for item in items {
            groups.entry(item.source_id.clone()).or_default().push(item);
        }

        let mut outcome = PassOutcome::default();
        for (source_id, group) in &groups {
            counter!("analyze_groups_total").increment(1);
            match self.analyze_group(group, prompt::SIGNAL_SYSTEM).await {
                Ok(promoted) => {
                    outcome.analyzed += group.len();
                    outcome.promoted += promoted;
                    counter!("analyze_items_total").increment(group.len() as u64);
                }
                Err(err) => {
                    counter!("analyze_failures_total").increment(1);
                    tracing::warn!(source = %source_id, error = ?err, "analysis group failed");
                    self.store.log_state(
                        "analyzer",
                        "group analysis failed",
                        Some(&json!({"source_id": source_id, "error": err.to_string()})),
                    )?;
                    for item in group {
                        self.store
                            .bump_retry(&item.id, &err.to_string(), self.cfg.max_retries)?;
                    }
                }
            }
        }

        outcome.pending_left = self.store.count_pending(self.cfg.max_retries)? > 0;
        Ok(outcome)
    }

    /// Analyze one source group: concatenate tagged texts, call the LLM,
    /// write the full (debug-tagged) array back to every group item, then
    /// promote qualifying entries.
    async fn analyze_group(&self, group: &[ContentItem], system: &str) -> Result<usize> {
        let input = group
            .iter()
            .map(|item| format!("[ID: {}] {}", item.id, item.raw_text))
            .collect::<Vec<_>>()
            .join("\n---\n");

        let raw = self.llm.generate(LlmRequest::text(system, input)).await?;
        let entries = parse_entries(&raw)?;

        let now = now_ms();
        let blob = serde_json::to_string(&json!({
            "model": self.llm.name(),
            "analyzed_at": now,
            "entries": entries,
        }))
        .context("serialize analysis blob")?;
        for item in group {
            self.store.write_analysis(&item.id, &blob, 0, now)?;
        }

        self.promote(&entries, group, true).await
    }

    /// Promote entries scoring above the threshold: persist the signal,
    /// flip the referenced items, then mirror. At most one signal per entry.
    /// With `suppress_duplicates`, a same-fingerprint signal inside the
    /// suppression window wins; the reuse path skips that check because a
    /// resurfaced item is its own event.
    async fn promote(
        &self,
        entries: &[AnalysisEntry],
        group: &[ContentItem],
        suppress_duplicates: bool,
    ) -> Result<usize> {
        let mut promoted = 0usize;
        for entry in entries {
            if entry.score() <= PROMOTE_THRESHOLD || entry.summary.trim().is_empty() {
                continue;
            }

            let known: Vec<&ContentItem> = group.iter().collect();
            let mut ids: Vec<String> = entry
                .source_ids
                .iter()
                .filter(|id| known.iter().any(|item| &item.id == *id))
                .cloned()
                .collect();
            if ids.is_empty() {
                ids = group.iter().map(|item| item.id.clone()).collect();
            }

            let now = now_ms();
            let fingerprint = signal_fingerprint(&ids, entry.summary.trim());
            if suppress_duplicates
                && self.store.signal_fingerprint_seen(
                    &fingerprint,
                    self.cfg.signal_dedup_window_ms,
                    now,
                )?
            {
                counter!("signals_suppressed_total").increment(1);
                tracing::debug!(summary = %entry.summary, "duplicate signal suppressed");
                continue;
            }

            let signal = Signal {
                id: uuid::Uuid::new_v4().to_string(),
                source_item_ids: ids.clone(),
                summary: entry.summary.trim().to_string(),
                analysis: entry.analysis.trim().to_string(),
                fact_check: entry.fact_check.clone(),
                sentiment: Sentiment::parse(&entry.sentiment),
                relevance_score: entry.score(),
                urgent: entry.is_urgent,
                tickers: canonical_set(&entry.tickers, str::to_uppercase),
                tags: canonical_set(&entry.tags, str::to_lowercase),
                source_name: group.first().map(|i| i.source_name.clone()).unwrap_or_default(),
                created_at: now,
            };

            self.store.save_signal(&signal, &fingerprint)?;
            for id in &ids {
                self.store.mark_item_signal(id)?;
            }
            self.cache.invalidate();
            counter!("signals_promoted_total").increment(1);
            promoted += 1;

            // Mirror strictly after the signal row is durable.
            self.mirror.dispatch(&signal).await;
        }
        Ok(promoted)
    }

    /// Re-derive signals from a cached analysis without an LLM call. Used by
    /// the ingest reuse path when a fresh `processed_json` exists for the
    /// same content hash.
    pub async fn promote_from_cached(&self, item: &ContentItem, processed_json: &str) -> Result<usize> {
        let entries = entries_from_blob(processed_json)?;
        let group = [item.clone()];
        // Reference the cached item directly; its hash is the dedupe key.
        let rebound: Vec<AnalysisEntry> = entries
            .into_iter()
            .map(|mut e| {
                e.source_ids = vec![item.id.clone()];
                e
            })
            .collect();
        self.promote(&rebound, &group, false).await
    }

    /// Digest synthesis across recent low-signal leftovers, with the digest
    /// prompt variant. Returns promoted count.
    pub async fn run_digest(&self) -> Result<usize> {
        let since = now_ms() - 86_400_000;
        let mut items = self.store.items_without_signal_since(since)?;
        if items.is_empty() {
            return Ok(0);
        }
        if items.len() > DIGEST_MAX_ITEMS {
            tracing::debug!(
                dropped = items.len() - DIGEST_MAX_ITEMS,
                "digest input truncated to newest items"
            );
            let skip = items.len() - DIGEST_MAX_ITEMS;
            items.drain(..skip);
        }
        match self.analyze_group(&items, prompt::DIGEST_SYSTEM).await {
            Ok(promoted) => Ok(promoted),
            Err(err) => {
                // Digest is best-effort: log, never burn per-item retries.
                tracing::warn!(error = ?err, "digest synthesis failed");
                self.store.log_state(
                    "digest",
                    "digest synthesis failed",
                    Some(&json!({"error": err.to_string()})),
                )?;
                Ok(0)
            }
        }
    }
}

/// Pull the entries array back out of a stored analysis blob.
pub fn entries_from_blob(blob: &str) -> Result<Vec<AnalysisEntry>> {
    #[derive(Deserialize)]
    struct Blob {
        #[serde(default)]
        entries: Vec<AnalysisEntry>,
    }
    let parsed: Blob = serde_json::from_str(blob).context("decode stored analysis blob")?;
    Ok(parsed.entries)
}

fn canonical_set(values: &[String], f: impl Fn(&str) -> String) -> Vec<String> {
    let mut seen = std::collections::BTreeSet::new();
    let mut out = Vec::new();
    for v in values {
        let v = f(v.trim());
        if !v.is_empty() && seen.insert(v.clone()) {
            out.push(v);
        }
    }
    out
}
