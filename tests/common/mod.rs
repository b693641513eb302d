// tests/common/mod.rs
// Shared harness: a coordinator wired to in-memory storage, a scripted LLM
// and a recording sender.
#![allow(dead_code)] // each test binary uses a subset

use std::sync::Arc;

use signal_refinery::analyze::llm::MockLlm;
use signal_refinery::ingest::types::IngestRecord;
use signal_refinery::notify::RecordingSender;
use signal_refinery::{Config, Coordinator, Store};

pub struct Harness {
    pub coordinator: Arc<Coordinator>,
    pub llm: Arc<MockLlm>,
    pub sender: Arc<RecordingSender>,
}

pub fn harness(llm: MockLlm) -> Harness {
    harness_with_config(llm, Config::for_tests(":memory:"))
}

pub fn harness_with_config(llm: MockLlm, cfg: Config) -> Harness {
    let store = Store::open_in_memory().expect("in-memory store");
    let llm = Arc::new(llm);
    let sender = Arc::new(RecordingSender::new());
    let coordinator =
        Coordinator::new(cfg, store, llm.clone(), sender.clone()).expect("coordinator");
    Harness {
        coordinator,
        llm,
        sender,
    }
}

pub fn record(title: &str, text: &str) -> IngestRecord {
    IngestRecord {
        chat_id: "c1".to_string(),
        message_id: None,
        title: title.to_string(),
        text: text.to_string(),
        media: None,
    }
}

/// An analysis response promoting one finding at the given score.
pub fn finding(summary: &str, score: i64) -> String {
    serde_json::json!([{
        "summary": summary,
        "analysis": "because reasons",
        "relevance_score": score,
        "sentiment": "bearish",
        "tickers": ["SPY"],
        "tags": ["macro"],
    }])
    .to_string()
}
