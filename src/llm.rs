//! LLM Provider
//!
//! Text generation is a black-box capability behind `LlmProvider`. The
//! concrete client talks to the Anthropic Messages API and caches the persona
//! system prompt with `cache_control: ephemeral`.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Text generation capability
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Whether calls can succeed at all (credentials present)
    fn is_available(&self) -> bool;

    /// Generate a completion for `prompt` under `system`
    async fn generate(&self, system: &str, prompt: &str, max_tokens: usize) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct Reply {
    content: Vec<Block>,
}

#[derive(Debug, Deserialize)]
struct Block {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

impl Reply {
    /// Text blocks joined in order; tool or thinking blocks are ignored
    fn text(self) -> String {
        self.content
            .into_iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Claude API client
#[derive(Clone)]
pub struct ClaudeClient {
    client: Client,
    api_key: Option<String>,
    model: String,
}

impl ClaudeClient {
    pub fn new(api_key: Option<&str>, model: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.map(|s| s.to_string()),
            model: model.to_string(),
        }
    }

    /// Create from config
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(config.anthropic_api_key.as_deref(), &config.llm_model)
    }

    /// Messages API body. The persona prompt is the same on every call, so
    /// the system block is marked cacheable.
    fn build_request(&self, system: &str, prompt: &str, max_tokens: usize) -> Value {
        json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "system": [{
                "type": "text",
                "text": system,
                "cache_control": { "type": "ephemeral" },
            }],
            "messages": [{ "role": "user", "content": prompt }],
        })
    }
}

#[async_trait]
impl LlmProvider for ClaudeClient {
    fn name(&self) -> &str {
        "claude"
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn generate(&self, system: &str, prompt: &str, max_tokens: usize) -> Result<String> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("ANTHROPIC_API_KEY not set - generation unavailable"))?;

        let request = self.build_request(system, prompt, max_tokens);
        debug!("Calling Claude API: model={}, prompt_len={}", self.model, prompt.len());

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await?;
            anyhow::bail!("Claude API error {}: {}", status, text);
        }

        let reply: Reply = response.json().await?;
        Ok(reply.text())
    }
}
