//! Clients for the remote completion and image services.

pub mod openai;
pub mod sse;

use anyhow::Result;
use shared::agent_api::{ChatRequest, ImageRequest, StreamChunk};
use tokio::sync::mpsc::UnboundedSender;

pub use openai::OpenAIClient;

/// A conversational backend that answers with incremental text.
///
/// Contract: if the request fails *before* any chunk is sent, return
/// `Err(...)`. Once streaming starts, failures go through
/// `StreamChunk::Error`. A clean end is signalled by `StreamChunk::Done`
/// or by simply returning `Ok(())`.
#[async_trait::async_trait]
pub trait CompletionService: Send + Sync {
    async fn stream_chat(&self, request: ChatRequest, tx: UnboundedSender<StreamChunk>)
        -> Result<()>;
}

/// A single-shot image generator. Returns the base64-encoded image payload.
#[async_trait::async_trait]
pub trait ImageService: Send + Sync {
    async fn generate_image(&self, request: ImageRequest) -> Result<String>;
}
