//! Style analysis
//!
//! Computes writing statistics over a dataset and writes the versioned
//! `style_guide.md` / `style_guide.json` artifacts.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use super::collector::StyleDataset;
use crate::clock::Clock;
use crate::learning::sanitize::contains_emoji;
use crate::llm::LlmProvider;
use crate::models::{OutboundItem, StyleGuideVersion};

pub const MARKDOWN_FILE: &str = "style_guide.md";
pub const JSON_FILE: &str = "style_guide.json";

const TOP_WORDS: usize = 20;
const TOP_OPENERS: usize = 10;
const SAMPLE_POSTS: usize = 8;

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "of", "to", "in", "on", "for", "with", "is", "are", "was", "were", "be",
    "it", "its", "this", "that", "at", "as", "by", "from", "i", "you", "we", "they", "he", "she", "my", "your",
    "our", "not", "so", "if", "just", "have", "has", "do", "does", "will", "can", "all", "about", "what", "there",
    "when", "than", "then", "them", "their", "me", "us", "up", "out", "no", "more", "one", "been", "im", "dont",
];

/// Writing statistics over a set of posts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StyleStats {
    pub post_count: usize,
    pub avg_length: f64,
    pub median_length: usize,
    pub min_length: usize,
    pub max_length: usize,
    pub avg_words: f64,
    pub question_rate: f64,
    pub exclamation_rate: f64,
    pub ellipsis_rate: f64,
    pub emoji_rate: f64,
    pub hashtag_rate: f64,
    pub mention_rate: f64,
    pub link_rate: f64,
    pub lowercase_start_rate: f64,
    pub top_words: Vec<(String, usize)>,
    pub common_openers: Vec<(String, usize)>,
}

/// Full artifact content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleGuide {
    pub version_id: String,
    pub generated_at: DateTime<Utc>,
    pub source: String,
    pub handle: String,
    pub window_days: i64,
    pub include_replies: bool,
    pub stats: StyleStats,
    pub samples: Vec<String>,
    pub voice_summary: Option<String>,
}

/// Lexically sortable version id for a generation time
pub fn version_id_for(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%S%3fZ").to_string()
}

fn rate(hits: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split_whitespace()
        .filter(|w| !w.starts_with("http") && !w.starts_with('@') && !w.starts_with('#'))
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
                .replace('\'', "")
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
}

fn top_n(counts: HashMap<String, usize>, n: usize) -> Vec<(String, usize)> {
    let mut entries: Vec<_> = counts.into_iter().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries.truncate(n);
    entries
}

/// Pure statistics pass
pub fn analyze_posts(posts: &[OutboundItem]) -> StyleStats {
    let total = posts.len();
    if total == 0 {
        return StyleStats::default();
    }

    let mut lengths: Vec<usize> = posts.iter().map(|p| p.content.chars().count()).collect();
    lengths.sort_unstable();

    let mut word_total = 0usize;
    let mut word_counts: HashMap<String, usize> = HashMap::new();
    let mut opener_counts: HashMap<String, usize> = HashMap::new();
    let (mut questions, mut exclamations, mut ellipses) = (0, 0, 0);
    let (mut emoji, mut hashtags, mut mentions, mut links, mut lowercase) = (0, 0, 0, 0, 0);

    for post in posts {
        let text = post.content.trim();

        questions += text.contains('?') as usize;
        exclamations += text.contains('!') as usize;
        ellipses += (text.contains("...") || text.contains('…')) as usize;
        emoji += contains_emoji(text) as usize;
        hashtags += text.split_whitespace().any(|w| w.len() > 1 && w.starts_with('#')) as usize;
        mentions += text.split_whitespace().any(|w| w.len() > 1 && w.starts_with('@')) as usize;
        links += (text.contains("http://") || text.contains("https://")) as usize;
        lowercase += text
            .chars()
            .find(|c| c.is_alphabetic())
            .map(|c| c.is_lowercase())
            .unwrap_or(false) as usize;

        let post_words: Vec<String> = words(text).collect();
        word_total += post_words.len();
        if let Some(first) = post_words.first() {
            *opener_counts.entry(first.clone()).or_default() += 1;
        }
        for word in post_words {
            if word.chars().count() > 1 && !STOP_WORDS.contains(&word.as_str()) {
                *word_counts.entry(word).or_default() += 1;
            }
        }
    }

    StyleStats {
        post_count: total,
        avg_length: lengths.iter().sum::<usize>() as f64 / total as f64,
        median_length: lengths[total / 2],
        min_length: lengths[0],
        max_length: lengths[total - 1],
        avg_words: word_total as f64 / total as f64,
        question_rate: rate(questions, total),
        exclamation_rate: rate(exclamations, total),
        ellipsis_rate: rate(ellipses, total),
        emoji_rate: rate(emoji, total),
        hashtag_rate: rate(hashtags, total),
        mention_rate: rate(mentions, total),
        link_rate: rate(links, total),
        lowercase_start_rate: rate(lowercase, total),
        top_words: top_n(word_counts, TOP_WORDS),
        common_openers: top_n(opener_counts, TOP_OPENERS),
    }
}

fn pct(r: f64) -> String {
    format!("{:.0}%", r * 100.0)
}

/// Human readable guide; also what the composer feeds the LLM
pub fn render_markdown(guide: &StyleGuide) -> String {
    let s = &guide.stats;
    let mut md = String::new();

    md.push_str(&format!("# Style Guide: @{}\n\n", guide.handle));
    md.push_str(&format!(
        "Version `{}`, generated {} from {} posts ({}, last {} days, replies {}).\n\n",
        guide.version_id,
        guide.generated_at.to_rfc3339(),
        s.post_count,
        guide.source,
        guide.window_days,
        if guide.include_replies { "included" } else { "excluded" }
    ));

    if let Some(summary) = &guide.voice_summary {
        md.push_str("## Voice\n\n");
        md.push_str(summary.trim());
        md.push_str("\n\n");
    }

    md.push_str("## Shape\n\n");
    md.push_str(&format!(
        "- Length: avg {:.0} chars, median {}, range {}-{}\n",
        s.avg_length, s.median_length, s.min_length, s.max_length
    ));
    md.push_str(&format!("- Words per post: {:.1}\n", s.avg_words));
    md.push_str(&format!("- Starts lowercase: {}\n", pct(s.lowercase_start_rate)));

    md.push_str("\n## Punctuation & Extras\n\n");
    md.push_str(&format!("- Questions: {}\n", pct(s.question_rate)));
    md.push_str(&format!("- Exclamations: {}\n", pct(s.exclamation_rate)));
    md.push_str(&format!("- Ellipses: {}\n", pct(s.ellipsis_rate)));
    md.push_str(&format!("- Emoji: {}\n", pct(s.emoji_rate)));
    md.push_str(&format!("- Hashtags: {}\n", pct(s.hashtag_rate)));
    md.push_str(&format!("- Mentions: {}\n", pct(s.mention_rate)));
    md.push_str(&format!("- Links: {}\n", pct(s.link_rate)));

    if !s.top_words.is_empty() {
        md.push_str("\n## Vocabulary\n\n");
        let list: Vec<String> = s.top_words.iter().map(|(w, c)| format!("{} ({})", w, c)).collect();
        md.push_str(&list.join(", "));
        md.push('\n');
    }

    if !s.common_openers.is_empty() {
        md.push_str("\n## Common Openers\n\n");
        for (opener, count) in &s.common_openers {
            md.push_str(&format!("- \"{}\" x{}\n", opener, count));
        }
    }

    if !guide.samples.is_empty() {
        md.push_str("\n## Sample Posts\n\n");
        for sample in &guide.samples {
            md.push_str(&format!("> {}\n\n", sample.replace('\n', " ")));
        }
    }

    md
}

pub struct StyleAnalyzer {
    output_dir: PathBuf,
    clock: Arc<dyn Clock>,
    llm: Option<Arc<dyn LlmProvider>>,
}

impl StyleAnalyzer {
    pub fn new(output_dir: &Path, clock: Arc<dyn Clock>) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
            clock,
            llm: None,
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmProvider>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Analyze, write artifacts, return the (inactive) version record
    pub async fn analyze(&self, dataset: &StyleDataset) -> Result<StyleGuideVersion> {
        let generated_at = self.clock.now();
        let version_id = version_id_for(generated_at);
        let stats = analyze_posts(&dataset.posts);
        let samples: Vec<String> = dataset.posts.iter().take(SAMPLE_POSTS).map(|p| p.content.clone()).collect();
        let voice_summary = self.voice_summary(dataset).await;

        let guide = StyleGuide {
            version_id: version_id.clone(),
            generated_at,
            source: dataset.source.clone(),
            handle: dataset.handle.clone(),
            window_days: dataset.options.days,
            include_replies: dataset.options.include_replies,
            stats,
            samples,
            voice_summary,
        };

        let dir = self.output_dir.join(&version_id);
        std::fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;

        let markdown_path = dir.join(MARKDOWN_FILE);
        let json_path = dir.join(JSON_FILE);
        std::fs::write(&markdown_path, render_markdown(&guide))
            .with_context(|| format!("Failed to write {}", markdown_path.display()))?;
        std::fs::write(&json_path, serde_json::to_string_pretty(&guide)?)
            .with_context(|| format!("Failed to write {}", json_path.display()))?;

        info!("Style guide {} written to {}", version_id, dir.display());

        Ok(StyleGuideVersion {
            version_id,
            generated_at,
            source: dataset.source.clone(),
            tweet_count: dataset.posts.len(),
            markdown_path,
            json_path,
            is_active: false,
            activated_at: None,
            deactivated_at: None,
            metadata: serde_json::json!({
                "handle": dataset.handle,
                "days": dataset.options.days,
                "max_tweets": dataset.options.max_tweets,
                "include_replies": dataset.options.include_replies,
                "window_start": dataset.window_start.to_rfc3339(),
                "llm_summary": guide.voice_summary.is_some(),
            }),
        })
    }

    async fn voice_summary(&self, dataset: &StyleDataset) -> Option<String> {
        let llm = self.llm.as_ref().filter(|l| l.is_available())?;
        if dataset.posts.is_empty() {
            return None;
        }

        let corpus: Vec<String> = dataset.posts.iter().take(40).map(|p| format!("- {}", p.content)).collect();
        let prompt = format!(
            "Here are recent posts by @{}:\n\n{}\n\nDescribe this account's writing voice in 5 short bullet points \
             (tone, rhythm, vocabulary, formatting habits). Bullets only.",
            dataset.handle,
            corpus.join("\n")
        );

        match llm
            .generate("You are a concise writing-style analyst.", &prompt, 400)
            .await
        {
            Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Ok(_) => None,
            Err(e) => {
                warn!("Voice summary failed, continuing with statistics only: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Author;

    fn post(content: &str) -> OutboundItem {
        OutboundItem::post("1", content, Author::new("1", "me"), Utc::now())
    }

    #[test]
    fn test_rates() {
        let posts = vec![
            post("gm builders, who is shipping today?"),
            post("Shipping a new rollup explainer! https://example.com"),
            post("gm... quiet markets 🌊 #defi"),
            post("rollup fees keep dropping"),
        ];
        let stats = analyze_posts(&posts);

        assert_eq!(stats.post_count, 4);
        assert_eq!(stats.question_rate, 0.25);
        assert_eq!(stats.exclamation_rate, 0.25);
        assert_eq!(stats.link_rate, 0.25);
        assert_eq!(stats.emoji_rate, 0.25);
        assert_eq!(stats.hashtag_rate, 0.25);
        assert_eq!(stats.lowercase_start_rate, 0.75);
        assert_eq!(stats.common_openers[0], ("gm".to_string(), 2));
        assert!(stats.top_words.contains(&("rollup".to_string(), 2)));
    }

    #[test]
    fn test_empty_dataset() {
        assert_eq!(analyze_posts(&[]), StyleStats::default());
    }

    #[test]
    fn test_version_id_sortable() {
        use chrono::TimeZone;
        let a = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let b = a + chrono::Duration::milliseconds(7);
        assert_eq!(version_id_for(a), "20240102T030405000Z");
        assert!(version_id_for(b) > version_id_for(a));
    }
}
