use crate::{
    terminal_itinerary_chunk, ChatStream, ChatStreamChunk, LLMConfig, LLMProvider, LLMResponse,
    Message, ResponseCache, Role,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

pub struct GeminiClient {
    api_key: String,
    model: String,
    temperature: f32,
    client: reqwest::Client,
    max_retries: u32,
    base_delay: Duration,
    cache: Option<ResponseCache>,
}

impl GeminiClient {
    pub fn new(config: LLMConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            anyhow::bail!("Gemini API key is required");
        }

        Ok(Self {
            api_key: config.api_key,
            model: config.model,
            temperature: config.temperature,
            client: reqwest::Client::new(),
            max_retries: 5,
            base_delay: Duration::from_secs(2),
            cache: None,
        })
    }

    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .context("GEMINI_API_KEY environment variable not set")?;

        Self::new(LLMConfig {
            api_key,
            ..Default::default()
        })
    }

    /// Attach a response cache for non-streaming calls.
    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = Some(cache);
        self
    }

    fn generate_jitter(&self) -> Duration {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        let seed = now.as_nanos() as u64 % 1000;
        Duration::from_millis(seed)
    }

    fn request_body(&self, messages: &[Message]) -> serde_json::Value {
        let mut contents = Vec::new();
        for message in messages {
            let role = match message.role {
                Role::System => "model",
                Role::User => "user",
                Role::Assistant => "model",
            };

            contents.push(json!({
                "role": role,
                "parts": [{
                    "text": message.content
                }]
            }));
        }

        json!({
            "contents": contents,
            "generationConfig": {
                "temperature": self.temperature,
                "topK": 40,
                "topP": 0.95,
            }
        })
    }

    async fn call_api(&self, messages: Vec<Message>) -> Result<String> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model, self.api_key
        );

        debug!("Calling Gemini API with model: {}", self.model);

        let request_body = self.request_body(&messages);
        let mut attempt = 0;

        while attempt <= self.max_retries {
            let start_time = Instant::now();
            let jitter = self.generate_jitter();

            match self.perform_api_call(&url, &request_body).await {
                Ok(response_text) => {
                    info!(
                        "Gemini API call successful on attempt {} (took {:?})",
                        attempt + 1,
                        start_time.elapsed()
                    );
                    return Ok(response_text);
                }
                Err(e) => {
                    attempt += 1;
                    warn!("Gemini API call failed on attempt {}: {}", attempt, e);

                    if attempt > self.max_retries {
                        error!("All {} retry attempts failed for Gemini API", self.max_retries);
                        return Err(e);
                    }

                    let backoff_delay = self.base_delay * 2u32.pow(attempt - 1);
                    let total_delay = backoff_delay + jitter;

                    warn!(
                        "Retrying in {:?} (attempt {}/{}, jitter: {:?})",
                        total_delay, attempt, self.max_retries, jitter
                    );
                    sleep(total_delay).await;
                }
            }
        }

        anyhow::bail!("Unexpected error after retries")
    }

    async fn perform_api_call(&self, url: &str, request_body: &serde_json::Value) -> Result<String> {
        let response = self
            .client
            .post(url)
            .json(request_body)
            .send()
            .await
            .context("Failed to send request to Gemini API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();

            if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                anyhow::bail!("Gemini API error ({}): {}. This is retryable.", status, error_text);
            } else {
                anyhow::bail!("Gemini API error ({}): {}", status, error_text);
            }
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse Gemini API response")?;

        extract_text(&response_json)
    }
}

fn extract_text(response_json: &serde_json::Value) -> Result<String> {
    let text = response_json["candidates"][0]["content"]["parts"][0]["text"]
        .as_str()
        .context("Failed to extract text from Gemini response")?
        .to_string();
    Ok(text)
}

#[async_trait]
impl LLMProvider for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<LLMResponse> {
        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.get(prompt, &self.model).await {
                info!("Returning cached response for prompt");
                return Ok(LLMResponse {
                    content: cached,
                    finish_reason: None,
                });
            }
        }

        info!("Generating response with Gemini");

        let messages = vec![Message {
            role: Role::User,
            content: prompt.to_string(),
        }];

        let text = self.call_api(messages).await?;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.set(prompt, &self.model, &text).await {
                warn!("Failed to cache response: {}", e);
            }
        }

        Ok(LLMResponse {
            content: text,
            finish_reason: None,
        })
    }

    async fn generate_with_context(&self, messages: Vec<Message>) -> Result<LLMResponse> {
        info!("Generating response with Gemini (with context)");

        let text = self.call_api(messages).await?;

        Ok(LLMResponse {
            content: text,
            finish_reason: None,
        })
    }

    async fn stream_chat(&self, messages: Vec<Message>) -> Result<ChatStream> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:streamGenerateContent?alt=sse&key={}",
            self.model, self.api_key
        );

        debug!("Streaming from Gemini with model: {}", self.model);

        let response = self
            .client
            .post(&url)
            .json(&self.request_body(&messages))
            .send()
            .await
            .context("Failed to send streaming request to Gemini API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Gemini API error ({}): {}", status, error_text);
        }

        let (tx, rx) = tokio::sync::mpsc::channel::<Result<ChatStreamChunk>>(64);

        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut accumulated = String::new();

            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx
                            .send(Err(anyhow::Error::new(e).context("Gemini stream failed")))
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

                    let Ok(value) = serde_json::from_str::<serde_json::Value>(data) else {
                        debug!("Skipping non-JSON SSE line from Gemini");
                        continue;
                    };

                    if let Ok(text) = extract_text(&value) {
                        accumulated.push_str(&text);
                        if tx
                            .send(Ok(ChatStreamChunk::Message { content: text }))
                            .await
                            .is_err()
                        {
                            return;
                        }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_api_key() {
        let config = LLMConfig {
            api_key: String::new(),
            ..Default::default()
        };
        assert!(GeminiClient::new(config).is_err());
    }

    #[test]
    fn test_request_body_role_mapping() {
        let client = GeminiClient::new(LLMConfig {
            api_key: "key".to_string(),
            ..Default::default()
        })
        .unwrap();
        let body = client.request_body(&[
            Message::system("plan trips"),
            Message::user("three days in Kyoto"),
        ]);
        assert_eq!(body["contents"][0]["role"], "model");
        assert_eq!(body["contents"][1]["role"], "user");
    }

    #[tokio::test]
    #[ignore] // Requires API key
    async fn test_gemini_client() {
        let client = GeminiClient::from_env().unwrap();
        let response = client.generate("Say hello!").await;
        assert!(response.is_ok());
    }
}
