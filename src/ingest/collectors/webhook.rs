// src/ingest/collectors/webhook.rs
//! Webhook normalizers: turn platform-specific POST bodies into
//! `IngestRecord`s. Parsing is deliberately tolerant; a body we cannot
//! make sense of is ignored, never an error to the caller.

use serde::Deserialize;
use serde_json::Value as Json;

use super::super::types::{IngestRecord, MediaRef};

/// Supported generic webhook flavors, from the URL path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookKind {
    Generic,
    Discord,
    Slack,
}

impl WebhookKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "generic" => Some(WebhookKind::Generic),
            "discord" => Some(WebhookKind::Discord),
            "slack" => Some(WebhookKind::Slack),
            _ => None,
        }
    }
}

/// What a webhook body turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookPayload {
    Record(IngestRecord),
    /// Slack URL-verification handshake; echo the challenge back.
    Challenge(String),
    Ignored,
}

// ---- chat platform ----------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChatUpdate {
    message: Option<ChatMessage>,
    /// Button presses arrive as callback queries carrying the payload.
    callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    message_id: Option<i64>,
    chat: Option<ChatRef>,
    text: Option<String>,
    caption: Option<String>,
    document: Option<ChatBlob>,
    photo: Option<Vec<ChatBlob>>,
    voice: Option<ChatBlob>,
}

#[derive(Debug, Deserialize)]
struct ChatRef {
    id: Json,
    title: Option<String>,
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatBlob {
    /// Direct download URL when the platform provides one.
    url: Option<String>,
    mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    data: Option<String>,
    message: Option<ChatMessage>,
}

fn chat_id_string(id: &Json) -> String {
    match id {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Normalize a chat-platform update. Callback-query updates surface their
/// payload as the record text so the router dispatches them like any other
/// inbound text.
pub fn normalize_chat_update(body: &Json) -> Option<IngestRecord> {
    let update: ChatUpdate = serde_json::from_value(body.clone()).ok()?;

    if let Some(cb) = update.callback_query {
        let data = cb.data?;
        let chat = cb.message.and_then(|m| m.chat);
        return Some(IngestRecord {
            chat_id: chat.as_ref().map(|c| chat_id_string(&c.id)).unwrap_or_default(),
            message_id: None,
            title: chat
                .and_then(|c| c.title.or(c.username))
                .unwrap_or_default(),
            text: data,
            media: None,
        });
    }

    let msg = update.message?;
    let chat = msg.chat?;
    let text = msg
        .text
        .or(msg.caption)
        .unwrap_or_default();

    let media = msg
        .document
        .or_else(|| msg.photo.and_then(|p| p.into_iter().last()))
        .or(msg.voice)
        .and_then(|blob| {
            blob.url.map(|url| MediaRef {
                url,
                mime: blob.mime_type,
            })
        });

    if text.is_empty() && media.is_none() {
        return None;
    }

    Some(IngestRecord {
        chat_id: chat_id_string(&chat.id),
        message_id: msg.message_id.map(|id| id.to_string()),
        title: chat.title.or(chat.username).unwrap_or_default(),
        text,
        media,
    })
}

// ---- generic / discord / slack ---------------------------------------

pub fn normalize_webhook(kind: WebhookKind, body: &Json) -> WebhookPayload {
    match kind {
        WebhookKind::Generic => normalize_generic(body),
        WebhookKind::Discord => normalize_discord(body),
        WebhookKind::Slack => normalize_slack(body),
    }
}

fn normalize_generic(body: &Json) -> WebhookPayload {
    let text = body["text"]
        .as_str()
        .or_else(|| body["message"].as_str())
        .or_else(|| body["content"].as_str())
        .unwrap_or_default();
    if text.is_empty() {
        return WebhookPayload::Ignored;
    }
    WebhookPayload::Record(IngestRecord {
        chat_id: body["chat_id"]
            .as_str()
            .or_else(|| body["source"].as_str())
            .unwrap_or("webhook:generic")
            .to_string(),
        message_id: None,
        title: body["title"].as_str().unwrap_or("Generic Webhook").to_string(),
        text: text.to_string(),
        media: None,
    })
}

fn normalize_discord(body: &Json) -> WebhookPayload {
    let text = body["content"].as_str().unwrap_or_default();
    if text.is_empty() {
        return WebhookPayload::Ignored;
    }
    let author = body["author"]["username"]
        .as_str()
        .unwrap_or("discord");
    WebhookPayload::Record(IngestRecord {
        chat_id: format!(
            "discord:{}",
            body["channel_id"].as_str().unwrap_or("unknown")
        ),
        message_id: body["id"].as_str().map(String::from),
        title: format!("Discord/{author}"),
        text: text.to_string(),
        media: None,
    })
}

fn normalize_slack(body: &Json) -> WebhookPayload {
    // URL-verification handshake comes before any events.
    if body["type"].as_str() == Some("url_verification") {
        if let Some(challenge) = body["challenge"].as_str() {
            return WebhookPayload::Challenge(challenge.to_string());
        }
    }
    let event = &body["event"];
    let text = event["text"].as_str().unwrap_or_default();
    if text.is_empty() {
        return WebhookPayload::Ignored;
    }
    WebhookPayload::Record(IngestRecord {
        chat_id: format!(
            "slack:{}",
            event["channel"].as_str().unwrap_or("unknown")
        ),
        message_id: event["ts"].as_str().map(String::from),
        title: "Slack".to_string(),
        text: text.to_string(),
        media: None,
    })
}
