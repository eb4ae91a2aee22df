use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use shiori_core::{itinerary_update_from_value, parse_ai_response, ItineraryUpdate};

mod cache;
mod claude;
mod gemini;

pub use cache::ResponseCache;
pub use claude::ClaudeClient;
pub use gemini::GeminiClient;

/// A chat model chunk as seen by the build engine: either one text
/// token or the terminal structured itinerary extracted from the
/// accumulated reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatStreamChunk {
    Message { content: String },
    Itinerary { itinerary: ItineraryUpdate },
}

pub type ChatStream = BoxStream<'static, Result<ChatStreamChunk>>;

/// LLM provider trait. The engine treats providers as black boxes; any
/// implementation that yields text tokens followed by an optional
/// itinerary chunk works.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<LLMResponse>;
    async fn generate_with_context(&self, messages: Vec<Message>) -> Result<LLMResponse>;
    async fn stream_chat(&self, messages: Vec<Message>) -> Result<ChatStream>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMResponse {
    pub content: String,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct LLMConfig {
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: usize,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "gemini-2.5-flash".to_string(),
            temperature: 0.7,
            max_tokens: 4096,
        }
    }
}

/// Run the accumulated reply through the fenced-JSON extractor and, if
/// an itinerary block was present, build the terminal chunk. Shared by
/// the streaming clients.
pub(crate) fn terminal_itinerary_chunk(accumulated: &str) -> Option<ChatStreamChunk> {
    let parsed = parse_ai_response(accumulated);
    let update = itinerary_update_from_value(parsed.itinerary_data?)?;
    Some(ChatStreamChunk::Itinerary { itinerary: update })
}
