// src/ingest/types.rs
use serde::{Deserialize, Serialize};

/// A normalized unit of inbound content, produced by a collector and fed to
/// the ingest pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct IngestRecord {
    /// Opaque id of the upstream origin (chat id, channel id, feed guid).
    pub chat_id: String,
    /// Upstream message id when the source has one.
    pub message_id: Option<String>,
    /// Human label of the origin, e.g. chat title or feed name.
    pub title: String,
    pub text: String,
    pub media: Option<MediaRef>,
}

/// Reference to a media blob attached to an inbound message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaRef {
    pub url: String,
    /// Declared mime type when the source provides one; otherwise sniffed
    /// from the response headers on download.
    pub mime: Option<String>,
}

/// Outcome of one pipeline run, reported back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// New item persisted; analysis queued.
    Accepted { id: String },
    /// Identical content already known; existing id returned.
    Deduplicated { id: String },
    /// A fresh analysis existed for this content; a signal was derived
    /// without a new LLM call.
    Reused { id: String },
    /// Nothing left after scrubbing / enrichment.
    NoContent,
    /// Silently dropped (output-loop guard or scrubber veto).
    Dropped,
}

impl IngestOutcome {
    pub fn id(&self) -> Option<&str> {
        match self {
            IngestOutcome::Accepted { id }
            | IngestOutcome::Deduplicated { id }
            | IngestOutcome::Reused { id } => Some(id),
            _ => None,
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            IngestOutcome::Accepted { .. } => "accepted",
            IngestOutcome::Deduplicated { .. } => "deduplicated",
            IngestOutcome::Reused { .. } => "reused",
            IngestOutcome::NoContent => "no_content",
            IngestOutcome::Dropped => "dropped",
        }
    }
}
