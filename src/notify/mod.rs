// src/notify/mod.rs
pub mod chat;
pub mod mirror;

use anyhow::Result;
use serde_json::Value as Json;

/// One outbound message to the chat platform.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub chat_id: String,
    pub text: String,
    /// Inline keyboard payload, when the message carries deep-dive buttons.
    pub reply_markup: Option<Json>,
}

impl OutboundMessage {
    pub fn plain(chat_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            text: text.into(),
            reply_markup: None,
        }
    }
}

#[async_trait::async_trait]
pub trait Sender: Send + Sync {
    async fn send(&self, msg: &OutboundMessage) -> Result<()>;
}

pub type DynSender = std::sync::Arc<dyn Sender>;

/// Test double: records every message, optionally failing scripted sends.
#[derive(Default)]
pub struct RecordingSender {
    pub sent: std::sync::Mutex<Vec<OutboundMessage>>,
    failures: std::sync::Mutex<std::collections::VecDeque<String>>,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, error: &str) {
        self.failures
            .lock()
            .expect("failure queue lock")
            .push_back(error.to_string());
    }

    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.sent.lock().expect("sent lock").clone()
    }
}

#[async_trait::async_trait]
impl Sender for RecordingSender {
    async fn send(&self, msg: &OutboundMessage) -> Result<()> {
        if let Some(err) = self.failures.lock().expect("failure queue lock").pop_front() {
            anyhow::bail!(err);
        }
        self.sent.lock().expect("sent lock").push(msg.clone());
        Ok(())
    }
}
