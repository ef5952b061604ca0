//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use persona_agent::{AppContext, Config, FakeClock, LlmProvider, MockProvider, Store};
use std::collections::VecDeque;
use std::sync::Arc;
use tempfile::TempDir;

/// LLM that answers from a script, then repeats a fallback
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<String>>,
    fallback: String,
    available: bool,
    prompts: Mutex<Vec<(String, String)>>,
}

impl ScriptedLlm {
    pub fn new(fallback: &str) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            fallback: fallback.to_string(),
            available: true,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new("")
        }
    }

    pub fn push(&self, response: &str) {
        self.responses.lock().push_back(response.to_string());
    }

    /// (system, prompt) pairs received so far
    pub fn prompts(&self) -> Vec<(String, String)> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn name(&self) -> &str {
        "scripted"
    }

    fn is_available(&self) -> bool {
        self.available
    }

    async fn generate(&self, system: &str, prompt: &str, _max_tokens: usize) -> anyhow::Result<String> {
        if !self.available {
            anyhow::bail!("scripted llm unavailable");
        }
        self.prompts.lock().push((system.to_string(), prompt.to_string()));
        Ok(self.responses.lock().pop_front().unwrap_or_else(|| self.fallback.clone()))
    }
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

/// Config rooted in a temp dir, mock provider, posting without approval
pub fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.db_path = dir.path().join("agent.db");
    config.style_output_dir = dir.path().join("style_guides");
    config.provider.use_mock = true;
    config.provider.handle = "persona".to_string();
    config.posting.require_approval = false;
    config.posting.hourly_limit = 5;
    config.posting.daily_limit = 20;
    config.learning.use_llm = false;
    config
}

pub struct Harness {
    pub ctx: Arc<AppContext>,
    pub clock: Arc<FakeClock>,
    pub provider: Arc<MockProvider>,
    pub llm: Arc<ScriptedLlm>,
}

pub fn harness(config: Config, llm: ScriptedLlm) -> Harness {
    let clock = Arc::new(FakeClock::new(t0()));
    let provider = Arc::new(MockProvider::new(&config.provider.handle));
    let llm = Arc::new(llm);
    let store = Arc::new(Store::open(&config.db_path).unwrap());

    let ctx = AppContext::builder(config, store)
        .clock(clock.clone())
        .provider(provider.clone())
        .llm(llm.clone())
        .build();

    Harness {
        ctx,
        clock,
        provider,
        llm,
    }
}
