//! Social Provider Trait Definitions
//!
//! Universal interface for the platform the persona lives on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{InboundItem, OutboundItem};

/// Error types for provider operations
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Rate limited: retry after {0:?} seconds")]
    RateLimited(Option<u64>),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Provider error: {0}")]
    Other(String),
}

impl ProviderError {
    /// Worth retrying on the next cycle
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::RateLimited(_) | ProviderError::Network(_))
    }

    /// Configuration problem that needs a human
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProviderError::AuthFailed(_))
    }
}

/// Bounds for a timeline fetch
#[derive(Debug, Clone)]
pub struct TimelineWindow {
    /// Oldest post to include
    pub since: DateTime<Utc>,
    /// Upper bound on posts returned
    pub max_items: usize,
    /// Keep replies in the result
    pub include_replies: bool,
}

/// Platform capability - implement per network
#[async_trait]
pub trait SocialProvider: Send + Sync {
    /// Provider name identifier
    fn name(&self) -> &str;

    /// Handle of the account the persona posts as
    fn own_handle(&self) -> &str;

    /// Mentions newer than `since_cursor` (platform id), oldest first
    async fn fetch_mentions(&self, since_cursor: Option<&str>) -> Result<Vec<InboundItem>, ProviderError>;

    /// Historical posts of `handle` within the window, newest first
    async fn fetch_timeline(&self, handle: &str, window: &TimelineWindow) -> Result<Vec<OutboundItem>, ProviderError>;

    /// Whether `post` can reach the platform at all
    fn can_publish(&self) -> bool {
        true
    }

    /// Publish content, optionally as a reply
    async fn post(&self, content: &str, in_reply_to: Option<&str>) -> Result<OutboundItem, ProviderError>;
}

/// Compare two platform ids. Numeric ids (snowflakes) compare numerically,
/// anything else falls back to length-then-lexical.
pub fn newer_id<'a>(a: &'a str, b: &'a str) -> &'a str {
    match (a.parse::<u128>(), b.parse::<u128>()) {
        (Ok(x), Ok(y)) => {
            if x >= y {
                a
            } else {
                b
            }
        }
        _ => {
            if (a.len(), a) >= (b.len(), b) {
                a
            } else {
                b
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(ProviderError::RateLimited(Some(30)).is_transient());
        assert!(ProviderError::Network("reset".into()).is_transient());
        assert!(!ProviderError::NotFound("x".into()).is_transient());
        assert!(ProviderError::AuthFailed("401".into()).is_fatal());
    }

    #[test]
    fn test_newer_id_numeric() {
        assert_eq!(newer_id("999", "1000"), "1000");
        assert_eq!(newer_id("1700000000000000001", "1700000000000000000"), "1700000000000000001");
    }
}
