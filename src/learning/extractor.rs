//! Learning Extractor
//!
//! Turns one social item into zero or more memories:
//! - slang from a fixed lexicon
//! - narrative tags from hashtags, cashtags and topic keywords
//! - risk flags from scam/safety phrases
//! - engagement outcomes from our own posts' metrics
//! - optional LLM extraction on top of the rules
//!
//! The extractor is pure with respect to the store: it never touches
//! `learning_processed`, the worker commits its output.

use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::sanitize::sanitize_memory_content;
use crate::clock::Clock;
use crate::llm::LlmProvider;
use crate::models::{Direction, EngagementMetrics, InboundItem, MemoryItem, MemoryKind, OutboundItem};

const SLANG: &[&str] = &[
    "gm", "gn", "wagmi", "ngmi", "ser", "fren", "frens", "lfg", "based", "cope", "fud", "degen", "wen", "anon",
    "rekt", "hodl", "ape", "aped", "probably nothing", "few understand", "iykyk", "fomo", "copium", "alpha",
    "touch grass", "bullish", "bearish",
];

/// keyword -> topic name
const TOPICS: &[(&str, &str)] = &[
    ("defi", "defi"),
    ("nft", "nfts"),
    ("nfts", "nfts"),
    ("airdrop", "airdrops"),
    ("airdrops", "airdrops"),
    ("memecoin", "memecoins"),
    ("memecoins", "memecoins"),
    ("layer 2", "layer 2"),
    ("l2", "layer 2"),
    ("rollup", "layer 2"),
    ("staking", "staking"),
    ("restaking", "restaking"),
    ("bitcoin", "bitcoin"),
    ("ethereum", "ethereum"),
    ("solana", "solana"),
    ("ai agent", "ai agents"),
    ("ai agents", "ai agents"),
    ("stablecoin", "stablecoins"),
    ("stablecoins", "stablecoins"),
    ("dao", "daos"),
    ("governance", "governance"),
];

const RISK_PHRASES: &[&str] = &[
    "seed phrase",
    "recovery phrase",
    "private key",
    "giveaway",
    "dm me",
    "guaranteed returns",
    "guaranteed profit",
    "double your",
    "airdrop claim",
    "claim your airdrop",
    "wallet connect",
    "connect your wallet",
    "send eth",
    "100x",
    "not financial advice",
];

const LLM_MAX_TOKENS: usize = 512;

const EXTRACTION_SYSTEM: &str = "You extract durable learnings from social media posts for a persona agent. \
Respond with a JSON array only.";

/// Item handed to the extractor
#[derive(Debug, Clone, Copy)]
pub enum LearningSource<'a> {
    Inbound(&'a InboundItem),
    Outbound(&'a OutboundItem),
}

impl<'a> LearningSource<'a> {
    pub fn id(&self) -> &'a str {
        match self {
            LearningSource::Inbound(item) => &item.id,
            LearningSource::Outbound(item) => &item.id,
        }
    }

    pub fn content(&self) -> &'a str {
        match self {
            LearningSource::Inbound(item) => &item.content,
            LearningSource::Outbound(item) => &item.content,
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            LearningSource::Inbound(_) => Direction::Inbound,
            LearningSource::Outbound(_) => Direction::Outbound,
        }
    }

    fn metrics(&self) -> Option<(EngagementMetrics, bool)> {
        match self {
            LearningSource::Inbound(_) => None,
            LearningSource::Outbound(item) => item.metrics.map(|m| (m, item.is_reply())),
        }
    }
}

/// Extraction counters
#[derive(Debug, Default)]
pub struct ExtractorStats {
    pub rule_memories: AtomicU64,
    pub llm_memories: AtomicU64,
    pub dropped: AtomicU64,
    pub llm_failures: AtomicU64,
}

pub struct LearningExtractor {
    clock: Arc<dyn Clock>,
    llm: Option<Arc<dyn LlmProvider>>,
    stats: ExtractorStats,
}

impl LearningExtractor {
    /// Rules-only extractor
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            llm: None,
            stats: ExtractorStats::default(),
        }
    }

    /// Also ask the LLM (used only while it reports available)
    pub fn with_llm(mut self, llm: Arc<dyn LlmProvider>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn stats(&self) -> &ExtractorStats {
        &self.stats
    }

    /// Extract memories from one item. Each returned memory cites the item.
    pub async fn extract(&self, source: LearningSource<'_>) -> Vec<MemoryItem> {
        let mut candidates = self.extract_rules(source);
        let rule_count = candidates.len();

        if let Some(llm) = self.llm.as_ref().filter(|l| l.is_available()) {
            match self.extract_llm(llm.as_ref(), source).await {
                Ok(found) => candidates.extend(found),
                Err(e) => {
                    self.stats.llm_failures.fetch_add(1, Ordering::Relaxed);
                    warn!("LLM extraction failed for {}: {}", source.id(), e);
                }
            }
        }

        let now = self.clock.now();
        let mut seen = HashSet::new();
        let mut memories = Vec::new();

        for (index, (kind, raw)) in candidates.into_iter().enumerate() {
            let Some(content) = sanitize_memory_content(&raw) else {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Dropped unusable {} candidate from {}", kind, source.id());
                continue;
            };

            let id = fingerprint(kind, &content);
            if !seen.insert(id.clone()) {
                continue;
            }

            if index < rule_count {
                self.stats.rule_memories.fetch_add(1, Ordering::Relaxed);
            } else {
                self.stats.llm_memories.fetch_add(1, Ordering::Relaxed);
            }

            memories.push(MemoryItem {
                id,
                content,
                kind,
                source_item_ids: vec![source.id().to_string()],
                created_at: now,
            });
        }

        debug!("Extracted {} memories from {}", memories.len(), source.id());
        memories
    }

    /// Deterministic extraction, no I/O
    pub fn extract_rules(&self, source: LearningSource<'_>) -> Vec<(MemoryKind, String)> {
        let text = source.content();
        let normalized = normalize(text);
        let mut out = Vec::new();

        for term in SLANG {
            if contains_phrase(&normalized, term) {
                out.push((MemoryKind::Slang, format!("slang: {}", term)));
            }
        }

        for tag in hashtags(text) {
            out.push((MemoryKind::NarrativeTag, format!("narrative: {}", tag)));
        }
        for ticker in cashtags(text) {
            out.push((MemoryKind::NarrativeTag, format!("narrative: ${}", ticker)));
        }
        for (keyword, topic) in TOPICS {
            if contains_phrase(&normalized, keyword) {
                out.push((MemoryKind::NarrativeTag, format!("narrative: {}", topic)));
            }
        }

        for phrase in RISK_PHRASES {
            if contains_phrase(&normalized, phrase) {
                out.push((MemoryKind::RiskFlag, format!("risk phrase: {}", phrase)));
            }
        }

        if let Some((metrics, is_reply)) = source.metrics() {
            out.push((MemoryKind::EngagementOutcome, engagement_summary(&metrics, is_reply, text)));
        }

        out
    }

    async fn extract_llm(
        &self,
        llm: &dyn LlmProvider,
        source: LearningSource<'_>,
    ) -> anyhow::Result<Vec<(MemoryKind, String)>> {
        let who = match source.direction() {
            Direction::Inbound => "someone talking to the persona",
            Direction::Outbound => "the persona itself",
        };
        let prompt = format!(
            r#"Post by {}:
"{}"

Extract at most 5 learnings. Each is one of:
- slang: community slang or in-group phrasing
- narrative_tag: a topic or narrative being discussed
- risk_flag: scam, safety or reputational risk signals

Respond with a JSON array like:
[{{"kind": "narrative_tag", "content": "restaking yields"}}]

No emoji, no hashtags. Return [] if nothing is worth remembering."#,
            who,
            source.content()
        );

        let response = llm.generate(EXTRACTION_SYSTEM, &prompt, LLM_MAX_TOKENS).await?;
        Ok(parse_memories_response(&response))
    }
}

/// Parse the LLM's JSON array, ignoring unknown kinds and junk around it
pub fn parse_memories_response(response: &str) -> Vec<(MemoryKind, String)> {
    let json_str = match (response.find('['), response.rfind(']')) {
        (Some(start), Some(end)) if start < end => &response[start..=end],
        _ => return vec![],
    };

    #[derive(Deserialize)]
    struct RawMemory {
        kind: String,
        content: String,
    }

    match serde_json::from_str::<Vec<RawMemory>>(json_str) {
        Ok(raw) => raw
            .into_iter()
            .filter_map(|m| {
                let kind = MemoryKind::parse(m.kind.trim())?;
                // Engagement outcomes come from metrics, not opinions
                (kind != MemoryKind::EngagementOutcome).then_some((kind, m.content))
            })
            .collect(),
        Err(_) => vec![],
    }
}

/// Content fingerprint: kind + normalized content
pub fn fingerprint(kind: MemoryKind, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(normalize(content).as_bytes());
    hex::encode(&hasher.finalize()[..16])
}

/// Lowercase, punctuation to spaces, single spaces
fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '$' { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn contains_phrase(normalized: &str, phrase: &str) -> bool {
    format!(" {} ", normalized).contains(&format!(" {} ", phrase))
}

fn tag_tokens(text: &str, sigil: char) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for token in text.split_whitespace() {
        let Some(rest) = token.strip_prefix(sigil) else {
            continue;
        };
        let tag: String = rest.chars().take_while(|c| c.is_alphanumeric() || *c == '_').collect();
        if tag.is_empty() || tag.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        if !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

fn hashtags(text: &str) -> Vec<String> {
    tag_tokens(text, '#').into_iter().map(|t| t.to_lowercase()).collect()
}

fn cashtags(text: &str) -> Vec<String> {
    tag_tokens(text, '$').into_iter().map(|t| t.to_uppercase()).collect()
}

fn engagement_summary(metrics: &EngagementMetrics, is_reply: bool, text: &str) -> String {
    let total = metrics.total();
    let level = match total {
        0 => "no",
        1..=9 => "low",
        10..=99 => "moderate",
        _ => "high",
    };
    let what = if is_reply { "reply" } else { "post" };
    let snippet: String = text.chars().take(80).collect();
    format!(
        "{} engagement ({} likes, {} replies, {} reposts, {} quotes) on {}: {}",
        level, metrics.likes, metrics.replies, metrics.reposts, metrics.quotes, what, snippet
    )
}
