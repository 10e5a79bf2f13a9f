use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Config;

/// One entry of the outgoing chat history
#[derive(Debug, Clone, Serialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

/// Events emitted while consuming a streaming chat response
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// Text delta from the streaming response
    TextDelta(String),
    /// Stream completed
    StreamComplete,
    /// The stream failed after it started
    StreamError(String),
}

/// Failures at the provider boundary
///
/// All variants are recovered by the dispatcher and surfaced as synthetic
/// assistant messages; none propagate to the caller.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("provider '{0}' is not available (no endpoint or API key configured)")]
    Unavailable(String),
    #[error("{0}")]
    CallFailed(String),
    #[error("Please provide a prompt after the /image command.")]
    EmptyImagePrompt,
}

/// External AI provider boundary
///
/// `chat` hands back a lazy, finite, non-restartable event stream consumed
/// exactly once per call; `generate_image` is single-shot.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn chat(
        &self,
        provider: &str,
        model: &str,
        history: Vec<ChatTurn>,
    ) -> Result<mpsc::Receiver<ChatEvent>, ChatError>;

    async fn generate_image(
        &self,
        provider: &str,
        prompt: &str,
        test_mode: bool,
    ) -> Result<String, ChatError>;
}

/// HTTP backend speaking the OpenAI-compatible chat and image APIs
#[derive(Clone)]
pub struct HttpBackend {
    config: Config,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(config: Config) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| ChatError::CallFailed(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    /// Resolve base URL and API key for a provider, or fail as Unavailable
    fn credentials(&self, provider: &str) -> Result<(String, String), ChatError> {
        let endpoint = self
            .config
            .endpoint_for(provider)
            .ok_or_else(|| ChatError::Unavailable(provider.to_string()))?;
        let api_key = self
            .config
            .api_key_for(provider)
            .ok_or_else(|| ChatError::Unavailable(provider.to_string()))?;
        Ok((endpoint.base_url.clone(), api_key))
    }

    async fn stream_chat(
        client: reqwest::Client,
        base_url: String,
        api_key: String,
        model: String,
        history: Vec<ChatTurn>,
        tx: mpsc::Sender<ChatEvent>,
    ) -> Result<(), ChatError> {
        let url = format!("{}/v1/chat/completions", base_url);
        let payload = serde_json::json!({
            "model": model,
            "messages": history,
            "stream": true,
        });

        let response = client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| ChatError::CallFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ChatError::CallFailed(format!(
                "chat API returned {}: {}",
                status, error_text
            )));
        }

        Self::process_sse_stream(response, tx).await
    }

    /// Consume a Server-Sent Events chat stream, forwarding text deltas
    async fn process_sse_stream(
        response: reqwest::Response,
        tx: mpsc::Sender<ChatEvent>,
    ) -> Result<(), ChatError> {
        let mut stream = response.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ChatError::CallFailed(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            // Process complete lines
            while let Some(newline_pos) = buffer.find('\n') {
                let line = buffer[..newline_pos].trim().to_string();
                buffer = buffer[newline_pos + 1..].to_string();

                match sse_data(&line) {
                    Some("[DONE]") => {
                        let _ = tx.send(ChatEvent::StreamComplete).await;
                        return Ok(());
                    }
                    Some(data) => {
                        if let Some(delta) = delta_from_sse_json(data) {
                            let _ = tx.send(ChatEvent::TextDelta(delta)).await;
                        }
                    }
                    None => {}
                }
            }
        }

        // Flush any trailing frame that arrived without a newline.
        if let Some(data) = sse_data(buffer.trim()) {
            if data != "[DONE]" {
                if let Some(delta) = delta_from_sse_json(data) {
                    let _ = tx.send(ChatEvent::TextDelta(delta)).await;
                }
            }
        }

        let _ = tx.send(ChatEvent::StreamComplete).await;
        Ok(())
    }
}

/// Payload of a `data: ` SSE line, if the line is one
fn sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data: ")
}

/// Text delta carried by one OpenAI-style streaming chunk
fn delta_from_sse_json(data: &str) -> Option<String> {
    let chunk: serde_json::Value = serde_json::from_str(data).ok()?;
    chunk
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
        .filter(|content| !content.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn chat(
        &self,
        provider: &str,
        model: &str,
        history: Vec<ChatTurn>,
    ) -> Result<mpsc::Receiver<ChatEvent>, ChatError> {
        let (tx, rx) = mpsc::channel(1000);
        let (base_url, api_key) = self.credentials(provider)?;
        debug!(provider, model, turns = history.len(), "starting chat stream");

        let client = self.client.clone();
        let model = model.to_string();
        let tx_err = tx.clone();
        tokio::spawn(async move {
            if let Err(e) = Self::stream_chat(client, base_url, api_key, model, history, tx).await {
                warn!(error = %e, "chat stream failed");
                let _ = tx_err.send(ChatEvent::StreamError(e.to_string())).await;
            }
        });

        Ok(rx)
    }

    async fn generate_image(
        &self,
        provider: &str,
        prompt: &str,
        test_mode: bool,
    ) -> Result<String, ChatError> {
        if test_mode {
            // Synthetic reference so the full flow works without credentials.
            debug!(prompt, "image generation in test mode");
            return Ok(format!("test-image://{}", Uuid::new_v4()));
        }

        let (base_url, api_key) = self.credentials(provider)?;
        let url = format!("{}/v1/images/generations", base_url);
        let payload = serde_json::json!({
            "prompt": prompt,
            "n": 1,
            "response_format": "url",
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| ChatError::CallFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ChatError::CallFailed(format!(
                "image API returned {}: {}",
                status, error_text
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ChatError::CallFailed(e.to_string()))?;
        body.get("data")
            .and_then(|d| d.get(0))
            .and_then(|entry| entry.get("url").or_else(|| entry.get("b64_json")))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                ChatError::CallFailed("image API response had no image reference".to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_data_strips_the_frame_prefix() {
        assert_eq!(sse_data("data: {\"x\":1}"), Some("{\"x\":1}"));
        assert_eq!(sse_data("data: [DONE]"), Some("[DONE]"));
        assert_eq!(sse_data(": keep-alive"), None);
        assert_eq!(sse_data(""), None);
    }

    #[test]
    fn delta_is_extracted_from_streaming_chunk() {
        let data = r#"{"choices":[{"delta":{"content":"Hel"},"index":0}]}"#;
        assert_eq!(delta_from_sse_json(data), Some("Hel".to_string()));
    }

    #[test]
    fn chunks_without_content_yield_no_delta() {
        assert_eq!(delta_from_sse_json(r#"{"choices":[{"delta":{}}]}"#), None);
        assert_eq!(
            delta_from_sse_json(r#"{"choices":[{"delta":{"content":""}}]}"#),
            None
        );
        assert_eq!(delta_from_sse_json("not json"), None);
        assert_eq!(
            delta_from_sse_json(r#"{"choices":[{"finish_reason":"stop"}]}"#),
            None
        );
    }

    #[tokio::test]
    async fn test_mode_image_needs_no_credentials() {
        let backend = HttpBackend::new(Config::default()).expect("backend");
        let reference = backend
            .generate_image("puter.js", "a cat", true)
            .await
            .expect("image");
        assert!(reference.starts_with("test-image://"));
    }

    #[tokio::test]
    async fn chat_without_api_key_is_unavailable() {
        let backend = HttpBackend::new(Config::default()).expect("backend");
        // A provider with no endpoint entry at all.
        let result = backend.chat("nowhere", "some-model", Vec::new()).await;
        assert!(matches!(result, Err(ChatError::Unavailable(_))));
    }

    #[tokio::test]
    async fn image_credentials_come_from_the_requested_provider() {
        let backend = HttpBackend::new(Config::default()).expect("backend");
        let result = backend.generate_image("nowhere", "a cat", false).await;
        match result {
            Err(ChatError::Unavailable(provider)) => assert_eq!(provider, "nowhere"),
            other => panic!("expected Unavailable, got {other:?}"),
        }
    }
}
