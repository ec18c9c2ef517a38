//! Chat-completion clients used by ingestion and the chatbot

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{LitukError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Text,
    Json,
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage], format: ResponseFormat) -> Result<String>;

    fn model(&self) -> &str;
}

/// OpenAI-compatible chat/completions client
pub struct OpenAIChat {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    attempts: u32,
}

impl OpenAIChat {
    pub fn new(api_key: String, base_url: String, model: String, attempts: u32) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| LitukError::Internal {
                message: format!("Failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            api_key,
            base_url,
            model,
            attempts: attempts.max(1),
        })
    }

    async fn request_once(&self, body: &serde_json::Value) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| LitukError::Llm {
                message: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read response body".to_string());
            return Err(LitukError::Llm {
                message: format!("chat completion failed with {}: {}", status, body_text),
            });
        }

        let val: serde_json::Value = resp.json().await.map_err(|e| LitukError::Llm {
            message: e.to_string(),
        })?;
        val.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|content| content.trim().to_string())
            .ok_or_else(|| LitukError::Llm {
                message: "chat completion response had no message content".to_string(),
            })
    }
}

#[async_trait]
impl ChatModel for OpenAIChat {
    async fn complete(&self, messages: &[ChatMessage], format: ResponseFormat) -> Result<String> {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": 0.3,
        });
        if format == ResponseFormat::Json {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }
        debug!(
            "Calling chat model {} with {} messages",
            self.model,
            messages.len()
        );

        let mut last_err = None;
        for i in 0..self.attempts {
            match self.request_once(&body).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    warn!("Chat completion attempt {} failed: {}", i + 1, e);
                    last_err = Some(e);
                    if i + 1 < self.attempts {
                        let delay_ms = 200u64 * (1u64 << i);
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| LitukError::Llm {
            message: "Unknown chat completion error".to_string(),
        }))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Replays queued responses in order; used offline and in tests
#[derive(Default)]
pub struct ScriptedChat {
    responses: Mutex<VecDeque<Result<String>>>,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedChat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let chat = Self::new();
        for r in responses {
            chat.push(r);
        }
        chat
    }

    pub fn push(&self, response: impl Into<String>) {
        if let Ok(mut q) = self.responses.lock() {
            q.push_back(Ok(response.into()));
        }
    }

    pub fn push_error(&self, message: impl Into<String>) {
        if let Ok(mut q) = self.responses.lock() {
            q.push_back(Err(LitukError::Llm {
                message: message.into(),
            }));
        }
    }

    /// Message lists received so far, one entry per call
    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ChatModel for ScriptedChat {
    async fn complete(&self, messages: &[ChatMessage], _format: ResponseFormat) -> Result<String> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(messages.to_vec());
        }
        let next = self.responses.lock().ok().and_then(|mut q| q.pop_front());
        next.unwrap_or_else(|| {
            Err(LitukError::FeatureDisabled {
                message: "no chat model configured (set OPENAI_API_KEY)".to_string(),
            })
        })
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

pub fn create_chat_model(config: &Config) -> Result<Arc<dyn ChatModel>> {
    match config.system.chat_provider.as_str() {
        "openai" => match config.runtime.openai_api_key.clone() {
            Some(key) => {
                info!("Using OpenAI chat model {}", config.system.chat_model);
                Ok(Arc::new(OpenAIChat::new(
                    key,
                    config.runtime.openai_base_url.clone(),
                    config.system.chat_model.clone(),
                    config.system.retries,
                )?))
            }
            None => {
                warn!("OPENAI_API_KEY not set; chat and generation are disabled");
                Ok(Arc::new(ScriptedChat::new()))
            }
        },
        "offline" => Ok(Arc::new(ScriptedChat::new())),
        other => Err(LitukError::Config {
            message: format!("Unknown chat provider '{}'", other),
        }),
    }
}

static FENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\s*```[a-zA-Z0-9_-]*\s*\n?(.*?)\n?\s*```\s*$").expect("valid fence regex")
});

/// Remove a surrounding markdown code fence, if any
pub fn strip_fences(text: &str) -> &str {
    match FENCE_RE.captures(text).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => text.trim(),
    }
}

/// Slice out the outermost `{ ... }` object from model output
pub fn extract_json_object(text: &str) -> Option<&str> {
    let body = strip_fences(text);
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    (end > start).then(|| &body[start..=end])
}
