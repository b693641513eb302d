// src/notify/mirror.rs
//! Outbound delivery policy: tiered routing by relevance score, signal-card
//! formatting, bounded retries.

use std::time::Duration;

use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde_json::json;

use super::{DynSender, OutboundMessage};
use crate::store::Signal;

/// Hard cap on outbound message size; truncation happens on a word boundary.
const MAX_MESSAGE_CHARS: usize = 4_000;

const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("mirror_sent_total", "Signals delivered to an outbound channel.");
        describe_counter!("mirror_dropped_total", "Signals below every configured tier.");
        describe_counter!("mirror_failed_total", "Sends abandoned after all retries.");
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Primary,
    Secondary,
}

pub struct Mirror {
    sender: DynSender,
    primary_channel: String,
    secondary_channel: Option<String>,
    primary_threshold: i64,
    secondary_threshold: i64,
}

impl Mirror {
    pub fn new(
        sender: DynSender,
        primary_channel: String,
        secondary_channel: Option<String>,
        primary_threshold: i64,
        secondary_threshold: i64,
    ) -> Self {
        ensure_metrics_described();
        Self {
            sender,
            primary_channel,
            secondary_channel,
            primary_threshold,
            secondary_threshold,
        }
    }

    /// Pick the outbound channel for a score, if any.
    pub fn route(&self, score: i64) -> Option<(Tier, &str)> {
        if score >= self.primary_threshold {
            return Some((Tier::Primary, self.primary_channel.as_str()));
        }
        if score >= self.secondary_threshold {
            return self
                .secondary_channel
                .as_deref()
                .map(|c| (Tier::Secondary, c));
        }
        None
    }

    /// Deliver a signal per the tier policy. Failures are logged and dropped;
    /// the signal row is already durable by the time this runs.
    pub async fn dispatch(&self, signal: &Signal) {
        let Some((tier, channel)) = self.route(signal.relevance_score) else {
            counter!("mirror_dropped_total").increment(1);
            tracing::debug!(score = signal.relevance_score, "signal below mirror tiers");
            return;
        };

        let msg = OutboundMessage {
            chat_id: channel.to_string(),
            text: format_card(signal),
            reply_markup: signal
                .source_item_ids
                .first()
                .map(|id| deep_dive_keyboard(id)),
        };

        match self.send_with_retry(&msg).await {
            Ok(()) => {
                counter!("mirror_sent_total").increment(1);
                tracing::info!(
                    tier = ?tier,
                    score = signal.relevance_score,
                    signal = %signal.id,
                    "signal mirrored"
                );
            }
            Err(err) => {
                counter!("mirror_failed_total").increment(1);
                tracing::warn!(signal = %signal.id, error = ?err, "mirror send abandoned");
            }
        }
    }

    /// Initial attempt plus three retries with 1s / 2s / 4s backoff. Only
    /// transient failures (network, 5xx, 429) are retried.
    pub async fn send_with_retry(&self, msg: &OutboundMessage) -> anyhow::Result<()> {
        let mut attempt = 0usize;
        loop {
            match self.sender.send(msg).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    if !is_transient(&err) || attempt >= RETRY_DELAYS.len() {
                        return Err(err);
                    }
                    tracing::debug!(attempt = attempt + 1, error = ?err, "transient send failure");
                    tokio::time::sleep(RETRY_DELAYS[attempt]).await;
                    attempt += 1;
                }
            }
        }
    }
}

fn is_transient(err: &anyhow::Error) -> bool {
    if let Some(req) = err.downcast_ref::<reqwest::Error>() {
        if req.is_timeout() || req.is_connect() || req.is_request() {
            return true;
        }
        if let Some(status) = req.status() {
            return status.is_server_error() || status.as_u16() == 429;
        }
        return false;
    }
    // Non-HTTP errors (test doubles, transport wrappers): retry by message.
    let text = err.to_string();
    ["429", "500", "502", "503", "504", "timeout", "connection"]
        .iter()
        .any(|needle| text.contains(needle))
}

/// Render the full signal card: HTML-escaped fields, hard length cap.
pub fn format_card(signal: &Signal) -> String {
    let esc = |s: &str| html_escape::encode_text(s).to_string();
    let marker = if signal.urgent { "🚨" } else { "📡" };

    let mut card = format!("{marker} <b>{}</b>\n\n{}", esc(&signal.summary), esc(&signal.analysis));
    if let Some(fc) = signal.fact_check.as_deref().filter(|s| !s.is_empty()) {
        card.push_str(&format!("\n\n<i>Fact check:</i> {}", esc(fc)));
    }
    card.push_str(&format!(
        "\n\nSentiment: {} | Relevance: {}",
        signal.sentiment.as_str(),
        signal.relevance_score
    ));
    if !signal.tickers.is_empty() {
        card.push_str(&format!("\nTickers: {}", esc(&signal.tickers.join(", "))));
    }
    if !signal.tags.is_empty() {
        card.push_str(&format!("\nTags: {}", esc(&signal.tags.join(", "))));
    }
    if !signal.source_name.is_empty() {
        card.push_str(&format!("\nSource: {}", esc(&signal.source_name)));
    }

    truncate_at_word(&card, MAX_MESSAGE_CHARS)
}

/// Inline keyboard with the three deep-dive callbacks for an item.
pub fn deep_dive_keyboard(item_id: &str) -> serde_json::Value {
    json!({
        "inline_keyboard": [[
            {"text": "✅ Fact check", "callback_data": format!("CALLBACK:chk:{item_id}")},
            {"text": "🧠 Synthesis", "callback_data": format!("CALLBACK:syn:{item_id}")},
            {"text": "🔍 Deep dive", "callback_data": format!("CALLBACK:div:{item_id}")},
        ]]
    })
}

/// Cut to at most `max` characters on a word boundary, appending an
/// ellipsis when anything was dropped.
pub fn truncate_at_word(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max.saturating_sub(1)).collect();
    let trimmed = match cut.rfind(char::is_whitespace) {
        Some(pos) if pos > 0 => &cut[..pos],
        _ => cut.as_str(),
    };
    format!("{}…", trimmed.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::RecordingSender;
    use crate::store::Sentiment;
    use std::sync::Arc;

    fn signal(score: i64) -> Signal {
        Signal {
            id: "sig-1".into(),
            source_item_ids: vec!["item-1".into()],
            summary: "Rate hike 25bp".into(),
            analysis: "Hawkish surprise.".into(),
            fact_check: None,
            sentiment: Sentiment::Bearish,
            relevance_score: score,
            urgent: false,
            tickers: vec!["SPY".into()],
            tags: vec!["macro".into()],
            source_name: "News".into(),
            created_at: 0,
        }
    }

    fn mirror(sender: Arc<RecordingSender>, secondary: bool) -> Mirror {
        Mirror::new(
            sender,
            "primary".into(),
            secondary.then(|| "secondary".into()),
            80,
            60,
        )
    }

    #[test]
    fn tier_boundaries() {
        let m = mirror(Arc::new(RecordingSender::new()), true);
        assert_eq!(m.route(80).map(|(t, c)| (t, c.to_string())), Some((Tier::Primary, "primary".into())));
        assert_eq!(m.route(79).map(|(t, _)| t), Some(Tier::Secondary));
        assert_eq!(m.route(60).map(|(t, _)| t), Some(Tier::Secondary));
        assert!(m.route(59).is_none());
    }

    #[test]
    fn secondary_unconfigured_drops_mid_tier() {
        let m = mirror(Arc::new(RecordingSender::new()), false);
        assert!(m.route(79).is_none());
        assert!(m.route(80).is_some());
    }

    #[tokio::test]
    async fn dispatch_sends_card_with_keyboard() {
        let sender = Arc::new(RecordingSender::new());
        let m = mirror(sender.clone(), true);
        m.dispatch(&signal(85)).await;
        let sent = sender.messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].chat_id, "primary");
        assert!(sent[0].text.contains("<b>Rate hike 25bp</b>"));
        assert!(sent[0]
            .reply_markup
            .as_ref()
            .unwrap()
            .to_string()
            .contains("CALLBACK:chk:item-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let sender = Arc::new(RecordingSender::new());
        sender.fail_next("chat send non-2xx: 503");
        sender.fail_next("connection reset");
        let m = mirror(sender.clone(), true);
        m.dispatch(&signal(90)).await;
        assert_eq!(sender.messages().len(), 1, "third attempt succeeds");
    }

    #[test]
    fn truncation_is_word_bounded() {
        let text = "word ".repeat(2_000);
        let out = truncate_at_word(&text, 4_000);
        assert!(out.chars().count() <= 4_000);
        assert!(out.ends_with("word…"), "cut on a word boundary: {:?}", &out[out.len() - 12..]);
    }

    #[test]
    fn card_escapes_html() {
        let mut s = signal(85);
        s.summary = "a <script> & b".into();
        let card = format_card(&s);
        assert!(card.contains("a &lt;script&gt; &amp; b"));
    }
}
