//! Core data model shared by the store, provider, learning and scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Which side of the conversation an item is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn table(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound_items",
            Direction::Outbound => "outbound_items",
        }
    }
}

/// Platform item kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Mention,
    Reply,
    Post,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Mention => "mention",
            ItemKind::Reply => "reply",
            ItemKind::Post => "post",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "mention" => Some(ItemKind::Mention),
            "reply" => Some(ItemKind::Reply),
            "post" => Some(ItemKind::Post),
            _ => None,
        }
    }
}

/// Platform user reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    pub handle: String,
}

impl Author {
    pub fn new(id: &str, handle: &str) -> Self {
        Self {
            id: id.to_string(),
            handle: handle.to_string(),
        }
    }
}

/// Public engagement counters on one of our posts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementMetrics {
    pub likes: u64,
    pub replies: u64,
    pub reposts: u64,
    pub quotes: u64,
}

impl EngagementMetrics {
    pub fn total(&self) -> u64 {
        self.likes + self.replies + self.reposts + self.quotes
    }
}

/// Mention or reply addressed to the persona
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundItem {
    pub id: String,
    pub kind: ItemKind,
    pub content: String,
    pub author: Author,
    pub in_reply_to: Option<String>,
    pub created_at: DateTime<Utc>,
    pub learning_processed: bool,
    pub learning_processed_at: Option<DateTime<Utc>>,
}

impl InboundItem {
    /// Fresh, unprocessed mention
    pub fn mention(id: &str, content: &str, author: Author, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            kind: ItemKind::Mention,
            content: content.to_string(),
            author,
            in_reply_to: None,
            created_at,
            learning_processed: false,
            learning_processed_at: None,
        }
    }
}

/// Post or reply published by the persona (or sampled from a timeline)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundItem {
    pub id: String,
    pub kind: ItemKind,
    pub content: String,
    pub author: Author,
    pub in_reply_to: Option<String>,
    pub created_at: DateTime<Utc>,
    pub metrics: Option<EngagementMetrics>,
    pub learning_processed: bool,
    pub learning_processed_at: Option<DateTime<Utc>>,
}

impl OutboundItem {
    pub fn post(id: &str, content: &str, author: Author, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            kind: ItemKind::Post,
            content: content.to_string(),
            author,
            in_reply_to: None,
            created_at,
            metrics: None,
            learning_processed: false,
            learning_processed_at: None,
        }
    }

    pub fn is_reply(&self) -> bool {
        self.kind == ItemKind::Reply || self.in_reply_to.is_some()
    }
}

/// Kind of fact a memory records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    Slang,
    NarrativeTag,
    RiskFlag,
    EngagementOutcome,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::Slang => "slang",
            MemoryKind::NarrativeTag => "narrative_tag",
            MemoryKind::RiskFlag => "risk_flag",
            MemoryKind::EngagementOutcome => "engagement_outcome",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "slang" => Some(MemoryKind::Slang),
            "narrative_tag" | "narrative" | "topic" => Some(MemoryKind::NarrativeTag),
            "risk_flag" | "risk" => Some(MemoryKind::RiskFlag),
            "engagement_outcome" | "engagement" => Some(MemoryKind::EngagementOutcome),
            _ => None,
        }
    }
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Learned fact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    /// Content fingerprint
    pub id: String,
    pub content: String,
    pub kind: MemoryKind,
    /// Originating item ids, in the order they were first cited
    pub source_item_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Registered style guide
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleGuideVersion {
    pub version_id: String,
    pub generated_at: DateTime<Utc>,
    pub source: String,
    pub tweet_count: usize,
    pub markdown_path: PathBuf,
    pub json_path: PathBuf,
    pub is_active: bool,
    pub activated_at: Option<DateTime<Utc>>,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
}

/// Approval state of a staged post
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingStatus {
    Pending,
    Approved,
    Rejected,
    Posted,
}

impl PendingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingStatus::Pending => "pending",
            PendingStatus::Approved => "approved",
            PendingStatus::Rejected => "rejected",
            PendingStatus::Posted => "posted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PendingStatus::Pending),
            "approved" => Some(PendingStatus::Approved),
            "rejected" => Some(PendingStatus::Rejected),
            "posted" => Some(PendingStatus::Posted),
            _ => None,
        }
    }
}

/// Content waiting for a human decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingPost {
    pub id: String,
    pub content: String,
    pub in_reply_to: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status: PendingStatus,
}

/// Epoch millis -> UTC, clamping garbage to the epoch
pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
