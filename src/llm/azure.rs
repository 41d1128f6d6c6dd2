use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::provider::{ChatProvider, FragmentStream};
use super::types::ChatRequest;
use crate::core::config::settings::{require, ChatSettings};
use crate::core::errors::ConciergeError;

/// Azure OpenAI `v1` chat completions with server-sent-event streaming.
#[derive(Clone)]
pub struct AzureOpenAiProvider {
    client: Client,
    settings: ChatSettings,
}

impl AzureOpenAiProvider {
    pub fn new(settings: ChatSettings) -> Result<Self, ConciergeError> {
        // No total timeout: answers may stream for a long time. Silence is
        // bounded per chunk instead.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .build()
            .map_err(ConciergeError::internal)?;
        Ok(Self { client, settings })
    }

    fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.stream_idle_timeout_secs)
    }
}

/// `https://x.openai.azure.com` -> `https://x.openai.azure.com/openai/v1/`
pub fn normalize_base_url(endpoint: &str) -> String {
    let mut base = format!("{}/", endpoint.trim().trim_end_matches('/'));
    if !base.ends_with("openai/v1/") {
        base.push_str("openai/v1/");
    }
    base
}

#[async_trait]
impl ChatProvider for AzureOpenAiProvider {
    fn name(&self) -> &str {
        "azure_openai"
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<FragmentStream, ConciergeError> {
        let endpoint = require(&self.settings.endpoint, "AZURE_OPENAI_ENDPOINT")?;
        let api_key = require(&self.settings.api_key, "AZURE_OPENAI_API_KEY")?;
        let deployment = require(&self.settings.deployment, "AZURE_OPENAI_DEPLOYMENT")?;
        let url = format!("{}chat/completions", normalize_base_url(endpoint));

        let body = json!({
            "model": deployment,
            "messages": request.messages,
            "stream": true,
            "temperature": self.settings.temperature,
        });

        let res = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .header("api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ConciergeError::Upstream(format!("chat request failed: {}", e)))?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ConciergeError::Upstream(format!(
                "chat completion returned {}: {}",
                status, text
            )));
        }

        let (tx, rx) = mpsc::channel(32);
        let mut stream = res.bytes_stream();
        let idle = self.idle_timeout();

        tokio::spawn(async move {
            let mut lines = SseLineBuffer::default();
            loop {
                let next = tokio::select! {
                    _ = tx.closed() => return,
                    next = tokio::time::timeout(idle, stream.next()) => next,
                };

                let bytes = match next {
                    Ok(Some(Ok(bytes))) => bytes,
                    Ok(Some(Err(e))) => {
                        let _ = tx.send(Err(ConciergeError::upstream(e))).await;
                        return;
                    }
                    // Connection closed without [DONE]; treat what arrived as complete.
                    Ok(None) => return,
                    Err(_) => {
                        let _ = tx
                            .send(Err(ConciergeError::Upstream(format!(
                                "chat stream stalled for {}s",
                                idle.as_secs()
                            ))))
                            .await;
                        return;
                    }
                };

                for line in lines.push(&bytes) {
                    match parse_event_line(&line) {
                        SseEvent::Skip => {}
                        SseEvent::Done => return,
                        SseEvent::Fragment(content) => {
                            if tx.send(Ok(content)).await.is_err() {
                                return;
                            }
                        }
                        SseEvent::Failed(message) => {
                            let _ = tx.send(Err(ConciergeError::Upstream(message))).await;
                            return;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}

/// Splits a byte stream into complete lines, holding partial lines across chunks.
#[derive(Default)]
struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line).trim().to_string());
        }
        lines
    }
}

#[derive(Debug, PartialEq)]
enum SseEvent {
    Skip,
    Done,
    Fragment(String),
    Failed(String),
}

fn parse_event_line(line: &str) -> SseEvent {
    let Some(data) = line.strip_prefix("data:") else {
        return SseEvent::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseEvent::Done;
    }
    let Ok(json) = serde_json::from_str::<Value>(data) else {
        return SseEvent::Skip;
    };
    if let Some(error) = json.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return SseEvent::Failed(format!("chat stream error: {}", message));
    }
    match json["choices"][0]["delta"]["content"].as_str() {
        Some(content) if !content.is_empty() => SseEvent::Fragment(content.to_string()),
        _ => SseEvent::Skip,
    }
}
