// src/ingest/scrub.rs
//! PII scrubbing applied to every inbound text before it is fingerprinted.
//! Scrubbing is idempotent: the replacement tokens never match the patterns.

use once_cell::sync::OnceCell;
use regex::Regex;

const CREDIT_CARD_TOKEN: &str = "[CREDIT_CARD]";
const EMAIL_TOKEN: &str = "[EMAIL]";

fn re_card() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"\b\d{4}-\d{4}-\d{4}-\d{4}\b").unwrap())
}

fn re_email() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").unwrap())
}

/// Redact card numbers and email addresses, collapse whitespace, trim.
/// Returns `None` when nothing survives.
pub fn scrub(text: &str) -> Option<String> {
    let mut out = re_card().replace_all(text, CREDIT_CARD_TOKEN).to_string();
    out = re_email().replace_all(&out, EMAIL_TOKEN).to_string();

    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"[ \t]+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();
    let out = out.trim().to_string();

    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}
