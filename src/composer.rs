//! Content composer
//!
//! persona prompt + active style guide + recent narrative memories -> LLM ->
//! cleaned, length-capped draft -> moderation.

use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::llm::LlmProvider;
use crate::models::{InboundItem, MemoryKind};
use crate::moderation::{Moderator, Verdict};
use crate::persona::Persona;
use crate::store::Store;

const MAX_STYLE_GUIDE_CHARS: usize = 4000;
const NARRATIVE_MEMORIES: usize = 10;
const GENERATION_MAX_TOKENS: usize = 300;

/// Result of composing one piece of content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Draft {
    /// Passed moderation
    Ready(String),
    /// Blocked by moderation, with the reason
    Rejected(String),
}

pub struct ContentComposer {
    llm: Arc<dyn LlmProvider>,
    persona: Arc<Persona>,
    moderator: Arc<dyn Moderator>,
    store: Arc<Store>,
}

impl ContentComposer {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        persona: Arc<Persona>,
        moderator: Arc<dyn Moderator>,
        store: Arc<Store>,
    ) -> Self {
        Self {
            llm,
            persona,
            moderator,
            store,
        }
    }

    pub fn is_available(&self) -> bool {
        self.llm.is_available()
    }

    /// Original timeline post
    pub async fn compose_post(&self) -> Result<Draft> {
        let mut prompt = self.context_block();
        prompt.push_str("Write one new original post for your timeline.");
        self.generate(&prompt).await
    }

    /// Reply to a mention
    pub async fn compose_reply(&self, mention: &InboundItem) -> Result<Draft> {
        let mut prompt = self.context_block();
        prompt.push_str(&format!(
            "@{} wrote to you:\n\"{}\"\n\nWrite your reply. Do not start with their handle.",
            mention.author.handle, mention.content
        ));
        self.generate(&prompt).await
    }

    async fn generate(&self, prompt: &str) -> Result<Draft> {
        let raw = self
            .llm
            .generate(self.persona.compiled_prompt(), prompt, GENERATION_MAX_TOKENS)
            .await?;
        let text = clean_draft(&raw, self.persona.max_post_chars());
        debug!("Composed draft ({} chars)", text.chars().count());

        Ok(match self.moderator.check(&text) {
            Verdict::Pass => Draft::Ready(text),
            Verdict::Reject(reason) => Draft::Rejected(reason),
        })
    }

    fn context_block(&self) -> String {
        let mut block = String::new();

        if let Some(guide) = self.active_style_guide() {
            block.push_str("Match this writing style:\n");
            block.push_str(&guide);
            block.push_str("\n\n");
        }

        match self.store.recent_memories(Some(MemoryKind::NarrativeTag), NARRATIVE_MEMORIES) {
            Ok(memories) if !memories.is_empty() => {
                block.push_str("Narratives people are talking about:\n");
                for memory in memories {
                    block.push_str(&format!("- {}\n", memory.content));
                }
                block.push('\n');
            }
            Ok(_) => {}
            Err(e) => warn!("Could not load narrative memories: {}", e),
        }

        block
    }

    fn active_style_guide(&self) -> Option<String> {
        let version = match self.store.active_style_version() {
            Ok(v) => v?,
            Err(e) => {
                warn!("Could not load active style guide: {}", e);
                return None;
            }
        };
        match std::fs::read_to_string(&version.markdown_path) {
            Ok(text) => Some(text.chars().take(MAX_STYLE_GUIDE_CHARS).collect()),
            Err(e) => {
                warn!(
                    "Active style guide {} unreadable at {}: {}",
                    version.version_id,
                    version.markdown_path.display(),
                    e
                );
                None
            }
        }
    }
}

/// Trim whitespace and wrapping quotes, cap at `max_chars` on a word boundary
pub fn clean_draft(raw: &str, max_chars: usize) -> String {
    let mut text = raw.trim();
    for (open, close) in [('"', '"'), ('“', '”')] {
        if text.len() > 1 && text.starts_with(open) && text.ends_with(close) {
            text = text[open.len_utf8()..text.len() - close.len_utf8()].trim();
        }
    }

    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let capped: String = text.chars().take(max_chars).collect();
    match capped.rfind(char::is_whitespace) {
        Some(idx) if idx > max_chars / 2 => capped[..idx].trim_end().to_string(),
        _ => capped,
    }
}
