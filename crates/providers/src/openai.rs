use anyhow::{anyhow, Context, Result};
use futures::StreamExt;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use shared::agent_api::{ChatMessage, ChatRequest, ImageRequest, StreamChunk};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

use crate::sse::SseParser;
use crate::{CompletionService, ImageService};

// ── Request types ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OpenAIImageRequest<'a> {
    prompt: &'a str,
    model: &'a str,
    response_format: &'static str,
    n: u32,
}

// ── Response types ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct OpenAIStreamResponse {
    #[serde(default)]
    choices: Vec<OpenAIStreamChoice>,
    #[serde(default)]
    error: Option<OpenAIErrorBody>,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamChoice {
    #[serde(default)]
    delta: OpenAIStreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAIStreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIImageResponse {
    data: Vec<OpenAIImageData>,
}

#[derive(Debug, Deserialize)]
struct OpenAIImageData {
    #[serde(default)]
    b64_json: Option<String>,
}

/// Translate one SSE `data:` payload into stream chunks.
///
/// Returns an empty vec for keep-alives and payloads we cannot parse.
fn parse_stream_event(data: &str) -> Vec<StreamChunk> {
    if data == "[DONE]" {
        return vec![StreamChunk::Done { stop_reason: None }];
    }
    let resp = match serde_json::from_str::<OpenAIStreamResponse>(data) {
        Ok(resp) => resp,
        Err(e) => {
            tracing::debug!("skipping unparseable stream event: {}", e);
            return Vec::new();
        }
    };
    if let Some(err) = resp.error {
        return vec![StreamChunk::Error(err.message)];
    }

    let mut out = Vec::new();
    if let Some(choice) = resp.choices.first() {
        if let Some(content) = &choice.delta.content {
            if !content.is_empty() {
                out.push(StreamChunk::Text(content.clone()));
            }
        }
        if let Some(reason) = &choice.finish_reason {
            out.push(StreamChunk::Done {
                stop_reason: Some(reason.clone()),
            });
        }
    }
    out
}

/// Send the chunks of one event; true once a terminal chunk went out.
fn forward(data: &str, tx: &UnboundedSender<StreamChunk>) -> bool {
    for chunk in parse_stream_event(data) {
        let terminal = !matches!(chunk, StreamChunk::Text(_));
        let _ = tx.send(chunk);
        if terminal {
            return true;
        }
    }
    false
}

async fn error_for_status(resp: Response, what: &str) -> Result<Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    let detail: String = body.chars().take(800).collect();
    if detail.trim().is_empty() {
        return Err(anyhow!("{} error: {}", what, status));
    }
    Err(anyhow!("{} error: {}\n{}", what, status, detail))
}

// ── Client ───────────────────────────────────────────────────────────

pub struct OpenAIClient {
    http: Client,
    auth_token: String,
    base_url: String,
}

impl OpenAIClient {
    pub fn new(api_key: &str, base_url: &str) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(anyhow!("No OpenAI API key configured"));
        }
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(2)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            auth_token: api_key.trim().to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post_json<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<Response> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.auth_token)
            .json(body)
            .send()
            .await?;
        Ok(resp)
    }
}

#[async_trait::async_trait]
impl CompletionService for OpenAIClient {
    async fn stream_chat(
        &self,
        request: ChatRequest,
        tx: UnboundedSender<StreamChunk>,
    ) -> Result<()> {
        let req = OpenAIRequest {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            stream: true,
        };
        let resp = self.post_json("/v1/chat/completions", &req).await?;
        let resp = error_for_status(resp, "openai").await?;

        let mut parser = SseParser::new();
        let mut stream = resp.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    let _ = tx.send(StreamChunk::Error(format!("stream read error: {}", e)));
                    return Ok(());
                }
            };
            for event in parser.feed(&bytes) {
                if forward(&event.data, &tx) {
                    return Ok(());
                }
            }
        }

        if let Some(event) = parser.finish() {
            if forward(&event.data, &tx) {
                return Ok(());
            }
        }
        let _ = tx.send(StreamChunk::Done { stop_reason: None });
        Ok(())
    }
}

#[async_trait::async_trait]
impl ImageService for OpenAIClient {
    async fn generate_image(&self, request: ImageRequest) -> Result<String> {
        let req = OpenAIImageRequest {
            prompt: &request.prompt,
            model: &request.model,
            response_format: "b64_json",
            n: 1,
        };
        let resp = self.post_json("/v1/images/generations", &req).await?;
        let resp = error_for_status(resp, "openai image").await?;
        let body: OpenAIImageResponse = resp.json().await?;
        body.data
            .into_iter()
            .next()
            .and_then(|d| d.b64_json)
            .ok_or_else(|| anyhow!("image response contained no data"))
    }
}
