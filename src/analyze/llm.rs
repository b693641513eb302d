// src/analyze/llm.rs
//! LLM provider abstraction. The wire shape is vendor-neutral JSON over
//! HTTPS: `contents` / `systemInstruction` / `generationConfig` in,
//! candidates out. A deterministic mock stands in for tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// One part of the user turn. Media parts carry raw bytes; the client
/// base64-encodes on the wire.
#[derive(Debug, Clone)]
pub enum LlmPart {
    Text(String),
    Inline { mime: String, data: Vec<u8> },
}

#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub system: String,
    pub parts: Vec<LlmPart>,
    pub temperature: f32,
    /// Ask for `application/json` output. Callback deep-dives want prose.
    pub json: bool,
}

impl LlmRequest {
    pub fn text(system: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            parts: vec![LlmPart::Text(text.into())],
            temperature: 0.3,
            json: true,
        }
    }

    pub fn prose(mut self) -> Self {
        self.json = false;
        self
    }
}

#[async_trait::async_trait]
pub trait Llm: Send + Sync {
    /// Returns the first candidate's text. Timeouts, non-2xx statuses and
    /// empty candidates all surface as errors for the caller's retry policy.
    async fn generate(&self, req: LlmRequest) -> Result<String>;
    fn name(&self) -> &'static str;
    /// Number of real calls issued, for reuse-window verification.
    fn calls(&self) -> u64;
}

pub type DynLlm = std::sync::Arc<dyn Llm>;

// ---- HTTP client ------------------------------------------------------

pub struct HttpLlm {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    calls: AtomicU64,
}

impl HttpLlm {
    pub fn new(endpoint: &str, api_key: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("signal-refinery/0.1")
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()
            .context("build llm http client")?;
        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
            calls: AtomicU64::new(0),
        })
    }
}

#[derive(Serialize)]
struct WirePartText<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct WireInlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
#[serde(untagged)]
enum WirePart<'a> {
    Text(WirePartText<'a>),
    Inline { inline_data: WireInlineData },
}

#[derive(Serialize)]
struct WireContent<'a> {
    role: &'a str,
    parts: Vec<WirePart<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest<'a> {
    contents: Vec<WireContent<'a>>,
    system_instruction: WireSystem<'a>,
    generation_config: WireGenConfig,
}

#[derive(Serialize)]
struct WireSystem<'a> {
    parts: Vec<WirePartText<'a>>,
}

#[derive(Serialize)]
struct WireGenConfig {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    candidates: Vec<WireCandidate>,
}

#[derive(Deserialize)]
struct WireCandidate {
    content: WireCandidateContent,
}

#[derive(Deserialize)]
struct WireCandidateContent {
    #[serde(default)]
    parts: Vec<WireCandidatePart>,
}

#[derive(Deserialize)]
struct WireCandidatePart {
    #[serde(default)]
    text: String,
}

#[async_trait::async_trait]
impl Llm for HttpLlm {
    async fn generate(&self, req: LlmRequest) -> Result<String> {
        let parts: Vec<WirePart<'_>> = req
            .parts
            .iter()
            .map(|p| match p {
                LlmPart::Text(t) => WirePart::Text(WirePartText { text: t }),
                LlmPart::Inline { mime, data } => WirePart::Inline {
                    inline_data: WireInlineData {
                        mime_type: mime.clone(),
                        data: base64::engine::general_purpose::STANDARD.encode(data),
                    },
                },
            })
            .collect();
        let body = WireRequest {
            contents: vec![WireContent { role: "user", parts }],
            system_instruction: WireSystem {
                parts: vec![WirePartText { text: &req.system }],
            },
            generation_config: WireGenConfig {
                temperature: req.temperature.min(0.3),
                response_mime_type: req.json.then_some("application/json"),
            },
        };

        self.calls.fetch_add(1, Ordering::Relaxed);
        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("llm request")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("llm returned {status}: {}", body.chars().take(200).collect::<String>());
        }

        let parsed: WireResponse = resp.json().await.context("decode llm response")?;
        let text = parsed
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.clone())
            .ok_or_else(|| anyhow!("llm response had no candidates"))?;
        Ok(text)
    }

    fn name(&self) -> &'static str {
        "http"
    }

    fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

// ---- mock -------------------------------------------------------------

/// Scripted responses for tests. With an empty script every call returns the
/// fixed fallback; scripted entries are consumed in order.
pub struct MockLlm {
    script: Mutex<std::collections::VecDeque<Result<String, String>>>,
    fallback: String,
    calls: AtomicU64,
}

impl MockLlm {
    pub fn fixed(response: &str) -> Self {
        Self {
            script: Mutex::new(Default::default()),
            fallback: response.to_string(),
            calls: AtomicU64::new(0),
        }
    }

    pub fn scripted(responses: Vec<Result<String, String>>) -> Self {
        Self {
            script: Mutex::new(responses.into_iter().collect()),
            fallback: "[]".to_string(),
            calls: AtomicU64::new(0),
        }
    }

    pub fn push(&self, response: Result<String, String>) {
        self.script.lock().expect("mock script lock").push_back(response);
    }
}

#[async_trait::async_trait]
impl Llm for MockLlm {
    async fn generate(&self, _req: LlmRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let next = self.script.lock().expect("mock script lock").pop_front();
        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(err)) => Err(anyhow!(err)),
            None => Ok(self.fallback.clone()),
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }

    fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}
