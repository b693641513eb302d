// src/ingest/media.rs
//! Media enrichment: download the referenced blob, then turn it into text.
//! PDFs get the sentinel treatment (re-analyzed later in force mode);
//! images and audio go through the LLM's OCR / transcription path inline.

use std::time::Duration;

use anyhow::{Context, Result};

use crate::analyze::llm::{DynLlm, LlmPart, LlmRequest};
use super::types::MediaRef;

/// Marks a PDF for later forced re-analysis instead of an inline
/// multimodal call.
pub const PDF_SENTINEL: &str = "[PDF DOCUMENT]";

const OCR_SYSTEM: &str = "\
Extract all legible text from the attached image. Return only the extracted \
text, no commentary. Return an empty response for images without text.";

const TRANSCRIBE_SYSTEM: &str = "\
Transcribe the attached audio verbatim. Return only the transcript, no \
commentary.";

pub struct MediaEnricher {
    http: reqwest::Client,
    llm: DynLlm,
}

impl MediaEnricher {
    pub fn new(llm: DynLlm) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("signal-refinery/0.1")
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(15))
            .build()
            .context("build media http client")?;
        Ok(Self { http, llm })
    }

    /// Resolve a media reference to text to append to the item. `None`
    /// when the blob contributes nothing (unsupported type, empty OCR).
    pub async fn enrich(&self, media: &MediaRef) -> Result<Option<String>> {
        let resp = self
            .http
            .get(&media.url)
            .send()
            .await
            .context("media download")?
            .error_for_status()
            .context("media download non-2xx")?;

        let mime = media
            .mime
            .clone()
            .or_else(|| {
                resp.headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            })
            .unwrap_or_default();

        if mime == "application/pdf" {
            return Ok(Some(PDF_SENTINEL.to_string()));
        }

        let system = if mime.starts_with("image/") {
            OCR_SYSTEM
        } else if mime.starts_with("audio/") {
            TRANSCRIBE_SYSTEM
        } else {
            tracing::debug!(%mime, "unsupported media type ignored");
            return Ok(None);
        };

        let bytes = resp.bytes().await.context("read media body")?.to_vec();
        let req = LlmRequest {
            system: system.to_string(),
            parts: vec![LlmPart::Inline {
                mime,
                data: bytes,
            }],
            temperature: 0.0,
            json: false,
        };
        let text = self.llm.generate(req).await.context("media transcription")?;
        let text = text.trim().to_string();
        Ok((!text.is_empty()).then_some(text))
    }
}
