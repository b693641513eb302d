// src/notify/chat.rs
//! The chat-platform send endpoint: a single authenticated HTTPS POST per
//! message, HTML parse mode.

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;

use super::{OutboundMessage, Sender};

pub struct ChatSender {
    http: reqwest::Client,
    endpoint: String,
    token: String,
}

impl ChatSender {
    pub fn new(endpoint: &str, token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("signal-refinery/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(10))
            .build()
            .context("build chat http client")?;
        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            token: token.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl Sender for ChatSender {
    async fn send(&self, msg: &OutboundMessage) -> Result<()> {
        let mut body = json!({
            "chat_id": msg.chat_id,
            "text": msg.text,
            "parse_mode": "HTML",
        });
        if let Some(markup) = &msg.reply_markup {
            body["reply_markup"] = markup.clone();
        }

        self.http
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .context("chat send request")?
            .error_for_status()
            .context("chat send non-2xx")?;
        Ok(())
    }
}
