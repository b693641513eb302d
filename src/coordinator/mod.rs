// src/coordinator/mod.rs
//! The coordinator: singleton owner of the store and every component.
//! All inbound traffic routes through here; all write paths are serialized
//! behind the store's writer lock, and the analyzer additionally holds an
//! exclusivity gate so two invocations never overlap.

pub mod callbacks;
pub mod commands;
pub mod heartbeat;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use metrics::gauge;
use serde_json::{json, Value as Json};

use crate::analyze::llm::{DynLlm, LlmRequest};
use crate::analyze::{Analyzer, PassOutcome};
use crate::cache::PageCache;
use crate::config::Config;
use crate::ingest::collectors::feed::FeedCollector;
use crate::ingest::collectors::webhook::normalize_chat_update;
use crate::ingest::media::MediaEnricher;
use crate::ingest::types::{IngestOutcome, IngestRecord};
use crate::ingest::Pipeline;
use crate::notify::mirror::{truncate_at_word, Mirror};
use crate::notify::{DynSender, OutboundMessage};
use crate::store::{now_ms, ChannelKind, ChannelStatus, Store};
use callbacks::parse_callback;
use heartbeat::{HeartbeatHandle, SETTING_LAST_DIGEST, SETTING_LAST_JANITOR, SETTING_NEXT_INTERVAL};

/// Feeds are re-polled once this much time has passed.
const POLL_STALE_MS: i64 = 15 * 60 * 1_000;
/// Digest and janitor cadence.
const MAINTENANCE_CADENCE_MS: i64 = 12 * 60 * 60 * 1_000;
/// Internal logs older than this are pruned.
const LOG_RETENTION_MS: i64 = 7 * 24 * 60 * 60 * 1_000;
/// When work remains after an analyzer pass, come back this soon.
const DRAIN_SOON_MS: u64 = 2_000;

pub struct Coordinator {
    pub store: Arc<Store>,
    pub cfg: Arc<Config>,
    pub cache: Arc<PageCache>,
    llm: DynLlm,
    sender: DynSender,
    analyzer: Arc<Analyzer>,
    pipeline: Pipeline,
    feeds: FeedCollector,
    heartbeat: Arc<HeartbeatHandle>,
    /// Two concurrent analyzer invocations are forbidden; this gate also
    /// lets shutdown drain in-flight analysis.
    analyze_gate: tokio::sync::Mutex<()>,
}

impl Coordinator {
    pub fn new(cfg: Config, store: Store, llm: DynLlm, sender: DynSender) -> Result<Arc<Self>> {
        let cfg = Arc::new(cfg);
        let store = Arc::new(store);
        let cache = Arc::new(PageCache::new());
        let mirror = Arc::new(Mirror::new(
            sender.clone(),
            cfg.primary_channel_id.clone(),
            cfg.secondary_channel_id.clone(),
            cfg.relevance_primary_threshold,
            cfg.relevance_secondary_threshold,
        ));
        let analyzer = Arc::new(Analyzer::new(
            store.clone(),
            llm.clone(),
            mirror,
            cache.clone(),
            cfg.clone(),
        ));
        let heartbeat = Arc::new(HeartbeatHandle::new(store.clone(), cfg.base_heartbeat_ms));
        let pipeline = Pipeline::new(
            store.clone(),
            analyzer.clone(),
            MediaEnricher::new(llm.clone())?,
            heartbeat.clone(),
            cfg.clone(),
        );
        Ok(Arc::new(Self {
            store,
            cfg,
            cache,
            llm,
            sender,
            analyzer,
            pipeline,
            feeds: FeedCollector::new()?,
            heartbeat,
            analyze_gate: tokio::sync::Mutex::new(()),
        }))
    }

    pub fn heartbeat_handle(&self) -> Arc<HeartbeatHandle> {
        self.heartbeat.clone()
    }

    // ---- inbound routing ----------------------------------------------

    /// A chat-platform update. Never surfaces internal errors to the
    /// webhook caller; anything reportable goes to the internal log.
    pub async fn on_chat_update(&self, body: &Json) -> Result<()> {
        let Some(record) = normalize_chat_update(body) else {
            tracing::debug!("chat update had no usable content");
            return Ok(());
        };
        self.route_inbound(record).await
    }

    /// Routing rules, first match wins: command, callback, ingest.
    pub async fn route_inbound(&self, record: IngestRecord) -> Result<()> {
        let text = record.text.trim().to_string();

        if text.starts_with('/') {
            let dispatch = match commands::execute(&self.store, &text) {
                Ok(d) => d,
                Err(err) => {
                    tracing::warn!(error = ?err, "command dispatch failed");
                    self.store.log_state(
                        "commands",
                        "dispatch failed",
                        Some(&json!({"text": text, "error": err.to_string()})),
                    )?;
                    commands::Dispatch::UserError("command failed, please try again".into())
                }
            };
            self.reply(&record.chat_id, dispatch.text()).await;
            return Ok(());
        }

        if text.starts_with("CALLBACK:") {
            self.handle_callback(&record.chat_id, &text).await;
            return Ok(());
        }

        let outcome = self.pipeline.run(record, false).await?;
        tracing::debug!(status = outcome.status(), "inbound routed to ingest");
        Ok(())
    }

    /// Direct ingest (`POST /ingest`).
    pub async fn ingest_direct(&self, record: IngestRecord) -> Result<IngestOutcome> {
        self.pipeline.run(record, false).await
    }

    async fn handle_callback(&self, chat_id: &str, text: &str) {
        let Some((kind, item_id)) = parse_callback(text) else {
            self.reply(chat_id, "unknown callback").await;
            return;
        };
        let item = match self.store.content_item(item_id) {
            Ok(Some(item)) => item,
            Ok(None) => {
                self.reply(chat_id, "signal not found or expired").await;
                return;
            }
            Err(err) => {
                tracing::warn!(error = ?err, "callback item lookup failed");
                self.reply(chat_id, "something went wrong, please try again")
                    .await;
                return;
            }
        };

        self.reply(chat_id, kind.holding_text()).await;

        let req = LlmRequest::text(kind.system_prompt(), item.raw_text).prose();
        match self.llm.generate(req).await {
            Ok(out) => {
                let out = truncate_at_word(out.trim(), 4_000);
                self.reply(chat_id, &out).await;
            }
            Err(err) => {
                tracing::warn!(item = item_id, error = ?err, "callback analysis failed");
                if let Err(log_err) = self.store.log_state(
                    "callbacks",
                    "deep-dive failed",
                    Some(&json!({"item_id": item_id, "error": err.to_string()})),
                ) {
                    tracing::warn!(error = ?log_err, "internal log write failed");
                }
                self.reply(chat_id, "analysis failed, please try again later")
                    .await;
            }
        }
    }

    async fn reply(&self, chat_id: &str, text: &str) {
        let chat = if chat_id.is_empty() {
            match self.cfg.admin_channel_id.as_deref() {
                Some(admin) => admin,
                None => return,
            }
        } else {
            chat_id
        };
        if let Err(err) = self
            .sender
            .send(&OutboundMessage::plain(chat, text))
            .await
        {
            tracing::warn!(chat = chat, error = ?err, "reply send failed");
        }
    }

    // ---- heartbeat tick -----------------------------------------------

    /// One tick: poll → analyze → digest → janitor, then compute the next
    /// interval from activity. Returns the delay before the next tick.
    pub async fn run_tick(&self) -> u64 {
        let now = now_ms();
        let prev = self.heartbeat.current_interval_ms();

        let polled = self.poll_feeds(now).await;
        let pass = self.analyze_once().await;
        let digested = self.run_digest_if_due(now).await;
        self.run_janitor_if_due(now).await;

        let active = polled > 0 || pass.promoted > 0 || digested > 0;
        let next = heartbeat::next_interval_ms(
            prev,
            active,
            self.cfg.base_heartbeat_ms,
            self.cfg.max_heartbeat_ms,
        );
        if let Err(err) = self
            .store
            .put_setting(SETTING_NEXT_INTERVAL, &next.to_string())
        {
            tracing::warn!(error = ?err, "persisting heartbeat interval failed");
        }
        gauge!("heartbeat_interval_ms").set(next as f64);
        tracing::info!(
            polled,
            analyzed = pass.analyzed,
            promoted = pass.promoted,
            digested,
            next_ms = next,
            "tick complete"
        );

        if pass.pending_left {
            return DRAIN_SOON_MS.min(next);
        }
        next
    }

    /// One exclusive analyzer pass. Errors are absorbed here: the loop must
    /// keep ticking.
    pub async fn analyze_once(&self) -> PassOutcome {
        let _gate = self.analyze_gate.lock().await;
        match self.analyzer.run_once().await {
            Ok(pass) => pass,
            Err(err) => {
                tracing::warn!(error = ?err, "analyzer pass failed");
                if let Err(log_err) = self.store.log_state(
                    "analyzer",
                    "pass failed",
                    Some(&json!({"error": err.to_string()})),
                ) {
                    tracing::warn!(error = ?log_err, "internal log write failed");
                }
                PassOutcome::default()
            }
        }
    }

    async fn poll_feeds(&self, now: i64) -> usize {
        let channels = match self.store.list_channels(Some(ChannelKind::Feed)) {
            Ok(channels) => channels,
            Err(err) => {
                tracing::warn!(error = ?err, "listing feed channels failed");
                return 0;
            }
        };

        let mut accepted = 0usize;
        for ch in channels {
            if ch.status != ChannelStatus::Active {
                continue;
            }
            if ch.last_polled_at.map_or(false, |at| now - at < POLL_STALE_MS) {
                continue;
            }
            let Some(url) = ch.feed_url.as_deref() else {
                continue;
            };

            match self.feeds.fetch_entries(url).await {
                Ok(entries) => {
                    for entry in entries {
                        let record = IngestRecord {
                            chat_id: ch.id.clone(),
                            message_id: Some(entry.guid.clone()),
                            title: ch.name.clone(),
                            text: entry.raw_text(),
                            media: None,
                        };
                        match self.pipeline.run(record, true).await {
                            Ok(IngestOutcome::Accepted { .. }) => accepted += 1,
                            Ok(_) => {}
                            Err(err) => {
                                tracing::warn!(feed = %ch.name, error = ?err, "feed item ingest failed");
                            }
                        }
                    }
                    if let Err(err) = self.store.touch_channel(&ch.id, 1, 0, Some(now)) {
                        tracing::warn!(error = ?err, "channel bookkeeping failed");
                    }
                }
                Err(err) => {
                    tracing::warn!(feed = %ch.name, error = ?err, "feed poll failed");
                    let _ = self.store.touch_channel(&ch.id, 0, 1, Some(now));
                    let _ = self.store.log_state(
                        "poller",
                        "feed poll failed",
                        Some(&json!({"channel": ch.id, "error": err.to_string()})),
                    );
                }
            }
        }
        accepted
    }

    async fn run_digest_if_due(&self, now: i64) -> usize {
        if !self.maintenance_due(SETTING_LAST_DIGEST, now) {
            return 0;
        }
        let promoted = {
            let _gate = self.analyze_gate.lock().await;
            match self.analyzer.run_digest().await {
                Ok(promoted) => promoted,
                Err(err) => {
                    tracing::warn!(error = ?err, "digest pass failed");
                    0
                }
            }
        };
        if let Err(err) = self.store.put_setting(SETTING_LAST_DIGEST, &now.to_string()) {
            tracing::warn!(error = ?err, "persisting digest timestamp failed");
        }
        promoted
    }

    async fn run_janitor_if_due(&self, now: i64) {
        if !self.maintenance_due(SETTING_LAST_JANITOR, now) {
            return;
        }
        match self
            .store
            .prune_internal_logs_older_than(now - LOG_RETENTION_MS)
        {
            Ok(pruned) if pruned > 0 => tracing::info!(pruned, "janitor pruned internal logs"),
            Ok(_) => {}
            Err(err) => tracing::warn!(error = ?err, "janitor failed"),
        }
        if let Err(err) = self
            .store
            .put_setting(SETTING_LAST_JANITOR, &now.to_string())
        {
            tracing::warn!(error = ?err, "persisting janitor timestamp failed");
        }
    }

    fn maintenance_due(&self, key: &str, now: i64) -> bool {
        let last = self
            .store
            .get_setting(key)
            .ok()
            .flatten()
            .and_then(|v| v.parse::<i64>().ok());
        last.map_or(true, |at| now - at >= MAINTENANCE_CADENCE_MS)
    }

    // ---- admin --------------------------------------------------------

    /// Forced re-analysis of specific items (`POST /admin/digest`): clear
    /// their analysis state and run one pass now.
    pub async fn force_reanalyze(&self, ids: &[String]) -> Result<usize> {
        let requeued = self
            .store
            .reset_items_for_reanalysis(ids)
            .context("requeue items")?;
        if requeued > 0 {
            self.analyze_once().await;
        }
        Ok(requeued)
    }

    /// Drain in-flight analysis up to the grace period, then return.
    /// Partial work is safe: the store is the only source of truth.
    pub async fn shutdown(&self) {
        match tokio::time::timeout(Duration::from_secs(5), self.analyze_gate.lock()).await {
            Ok(_guard) => tracing::info!("in-flight analysis drained"),
            Err(_) => tracing::warn!("shutdown grace elapsed with analysis still in flight"),
        }
    }
}
