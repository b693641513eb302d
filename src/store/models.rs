// src/store/models.rs
//! Row types for the durable store. All timestamps are epoch milliseconds.

use serde::{Deserialize, Serialize};

/// One ingested unit of raw text. `raw_text` is already scrubbed (and
/// possibly media-enriched) by the time it reaches the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContentItem {
    pub id: String,
    pub source_id: String,
    pub source_name: String,
    pub raw_text: String,
    /// Lowercase hex SHA-256 of `raw_text`; the deduplication key.
    pub content_hash: String,
    pub created_at: i64,
    /// Opaque LLM response blob; `None` until analyzed.
    pub processed_json: Option<String>,
    /// 0 = not yet a signal, 1 = promoted, -1 = permanently failed.
    pub is_signal: i64,
    pub last_analyzed_at: Option<i64>,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Bullish,
    Bearish,
    Neutral,
}

impl Sentiment {
    pub fn as_str(self) -> &'static str {
        match self {
            Sentiment::Bullish => "bullish",
            Sentiment::Bearish => "bearish",
            Sentiment::Neutral => "neutral",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "bullish" => Sentiment::Bullish,
            "bearish" => Sentiment::Bearish,
            _ => Sentiment::Neutral,
        }
    }
}

/// A synthesized, high-relevance artifact derived from one or more items.
/// Never mutated, never deleted by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub source_item_ids: Vec<String>,
    pub summary: String,
    pub analysis: String,
    pub fact_check: Option<String>,
    pub sentiment: Sentiment,
    pub relevance_score: i64,
    pub urgent: bool,
    pub tickers: Vec<String>,
    pub tags: Vec<String>,
    /// Human label of the originating source, for list filters.
    pub source_name: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Chat,
    Feed,
    Webhook,
}

impl ChannelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelKind::Chat => "chat",
            ChannelKind::Feed => "feed",
            ChannelKind::Webhook => "webhook",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "feed" => ChannelKind::Feed,
            "webhook" => ChannelKind::Webhook,
            _ => ChannelKind::Chat,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    Active,
    Ignored,
}

impl ChannelStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelStatus::Active => "active",
            ChannelStatus::Ignored => "ignored",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("ignored") {
            ChannelStatus::Ignored
        } else {
            ChannelStatus::Active
        }
    }
}

/// A known upstream source, upserted on first sighting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub kind: ChannelKind,
    pub feed_url: Option<String>,
    pub last_polled_at: Option<i64>,
    pub success_count: i64,
    pub failure_count: i64,
    pub status: ChannelStatus,
}

/// Filters for the signals list API. Empty filter = unfiltered first page,
/// which is the cacheable shape.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignalFilter {
    pub source: Option<String>,
    pub sentiment: Option<Sentiment>,
    pub urgent: Option<bool>,
    pub from: Option<i64>,
    pub to: Option<i64>,
    pub q: Option<String>,
}

impl SignalFilter {
    pub fn is_empty(&self) -> bool {
        *self == SignalFilter::default()
    }
}

/// O(1) counters snapshot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stats {
    pub items: i64,
    pub signals: i64,
    pub channels: i64,
}
