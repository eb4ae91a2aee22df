use crate::{
    terminal_itinerary_chunk, ChatStream, ChatStreamChunk, LLMConfig, LLMProvider, LLMResponse,
    Message, Role,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Server-sent events emitted by the Anthropic messages API. Only the
/// variants the engine acts on carry payloads; everything else is
/// folded into `Other` and ignored.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicEvent {
    ContentBlockDelta { delta: ContentDelta },
    MessageStop,
    Error { error: ApiError },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentDelta {
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

pub struct ClaudeClient {
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
    client: reqwest::Client,
}

impl ClaudeClient {
    pub fn new(config: LLMConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            anyhow::bail!("Anthropic API key is required");
        }

        Ok(Self {
            api_key: config.api_key,
            model: config.model,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            client: reqwest::Client::new(),
        })
    }

    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .context("ANTHROPIC_API_KEY environment variable not set")?;

        Self::new(LLMConfig {
            api_key,
            model: "claude-sonnet-4-20250514".to_string(),
            ..Default::default()
        })
    }

    fn request_body(&self, messages: &[Message], stream: bool) -> serde_json::Value {
        // Anthropic takes the system prompt as a top-level field, not a
        // message role.
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();

        let chat: Vec<serde_json::Value> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                let role = match m.role {
                    Role::Assistant => "assistant",
                    _ => "user",
                };
                json!({ "role": role, "content": m.content })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "messages": chat,
            "stream": stream,
        });

        if !system.is_empty() {
            body["system"] = json!(system.join("\n\n"));
        }

        body
    }

    async fn send(&self, body: &serde_json::Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
            .send()
            .await
            .context("Failed to send request to Anthropic API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Anthropic API error ({}): {}", status, error_text);
        }

        Ok(response)
    }

    async fn call_api(&self, messages: Vec<Message>) -> Result<String> {
        debug!("Calling Anthropic API with model: {}", self.model);

        let response = self.send(&self.request_body(&messages, false)).await?;

        let response_json: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse Anthropic API response")?;

        let text = response_json["content"][0]["text"]
            .as_str()
            .context("Failed to extract text from Anthropic response")?
            .to_string();

        Ok(text)
    }
}

#[async_trait]
impl LLMProvider for ClaudeClient {
    async fn generate(&self, prompt: &str) -> Result<LLMResponse> {
        let text = self.call_api(vec![Message::user(prompt)]).await?;

        Ok(LLMResponse {
            content: text,
            finish_reason: None,
        })
    }

    async fn generate_with_context(&self, messages: Vec<Message>) -> Result<LLMResponse> {
        let text = self.call_api(messages).await?;

        Ok(LLMResponse {
            content: text,
            finish_reason: None,
        })
    }

    async fn stream_chat(&self, messages: Vec<Message>) -> Result<ChatStream> {
        debug!("Streaming from Anthropic with model: {}", self.model);

        let response = self.send(&self.request_body(&messages, true)).await?;

        let (tx, rx) = tokio::sync::mpsc::channel::<Result<ChatStreamChunk>>(64);

        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut accumulated = String::new();

            'outer: while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx
                            .send(Err(anyhow::Error::new(e).context("Anthropic stream failed")))
                            .await;
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim().to_string();
                    buffer = buffer[line_end + 1..].to_string();

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };

                    let event = match serde_json::from_str::<AnthropicEvent>(data) {
                        Ok(event) => event,
                        Err(e) => {
                            warn!("Unparseable Anthropic SSE event: {}", e);
                            continue;
                        }
                    };

                    match event {
                        AnthropicEvent::ContentBlockDelta {
                            delta: ContentDelta::TextDelta { text },
                        } => {
                            accumulated.push_str(&text);
                            if tx
                                .send(Ok(ChatStreamChunk::Message { content: text }))
                                .await
                                .is_err()
                            {
                                return;
                            }
                        }
                        AnthropicEvent::MessageStop => break 'outer,
                        AnthropicEvent::Error { error } => {
                            let _ = tx
                                .send(Err(anyhow::anyhow!(
                                    "Anthropic stream error: {}",
                                    error.message
                                )))
                                .await;
                            return;
                        }
                        _ => {}
                    }
                }
            }

            if let Some(chunk) = terminal_itinerary_chunk(&accumulated) {
                let _ = tx.send(Ok(chunk)).await;
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });

        Ok(Box::pin(stream))
    }
}
