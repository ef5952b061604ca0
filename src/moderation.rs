//! Moderation gate
//!
//! Pass/fail check run on every piece of generated content before it is
//! posted or staged.

/// Outcome of a moderation check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Reject(String),
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }
}

pub trait Moderator: Send + Sync {
    fn check(&self, text: &str) -> Verdict;
}

/// Blocklist + length moderator
pub struct KeywordModerator {
    blocked: Vec<String>,
    max_chars: usize,
}

impl KeywordModerator {
    pub fn new(blocked: impl IntoIterator<Item = String>, max_chars: usize) -> Self {
        Self {
            blocked: blocked
                .into_iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
            max_chars,
        }
    }
}

impl Moderator for KeywordModerator {
    fn check(&self, text: &str) -> Verdict {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Verdict::Reject("empty".to_string());
        }
        if trimmed.chars().count() > self.max_chars {
            return Verdict::Reject(format!("longer than {} chars", self.max_chars));
        }

        let lower = trimmed.to_lowercase();
        if let Some(term) = self.blocked.iter().find(|t| lower.contains(t.as_str())) {
            return Verdict::Reject(format!("blocked term '{}'", term));
        }
        Verdict::Pass
    }
}
