//! Style dataset collection
//!
//! Samples historical posts of an account (our own or any handle) within a
//! day window.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

use crate::clock::Clock;
use crate::models::OutboundItem;
use crate::social::{ProviderError, SocialProvider, TimelineWindow};

/// Whose posts to sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StyleTarget {
    OwnAccount,
    Handle(String),
}

impl StyleTarget {
    /// Parse a CLI argument; `self` and `me` mean our own account
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "self" | "me" | "" => StyleTarget::OwnAccount,
            other => StyleTarget::Handle(other.trim_start_matches('@').to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CollectorOptions {
    pub days: i64,
    pub max_tweets: usize,
    pub include_replies: bool,
}

/// Posts sampled for one analysis run
#[derive(Debug, Clone)]
pub struct StyleDataset {
    pub handle: String,
    /// `self` or `handle:<name>`
    pub source: String,
    pub collected_at: DateTime<Utc>,
    pub window_start: DateTime<Utc>,
    pub options: CollectorOptions,
    /// Newest first
    pub posts: Vec<OutboundItem>,
}

pub struct StyleCollector {
    provider: Arc<dyn SocialProvider>,
    clock: Arc<dyn Clock>,
}

impl StyleCollector {
    pub fn new(provider: Arc<dyn SocialProvider>, clock: Arc<dyn Clock>) -> Self {
        Self { provider, clock }
    }

    pub async fn collect(&self, target: &StyleTarget, options: &CollectorOptions) -> Result<StyleDataset, ProviderError> {
        let (handle, source) = match target {
            StyleTarget::OwnAccount => (self.provider.own_handle().to_string(), "self".to_string()),
            StyleTarget::Handle(h) => (h.clone(), format!("handle:{}", h)),
        };

        let now = self.clock.now();
        let window = TimelineWindow {
            since: now - Duration::days(options.days.max(1)),
            max_items: options.max_tweets,
            include_replies: options.include_replies,
        };

        let fetched = self.provider.fetch_timeline(&handle, &window).await?;
        let fetched_count = fetched.len();

        let mut seen = HashSet::new();
        let mut posts: Vec<OutboundItem> = fetched
            .into_iter()
            .filter(|p| !p.content.trim().is_empty())
            .filter(|p| p.created_at >= window.since)
            .filter(|p| options.include_replies || !p.is_reply())
            .filter(|p| seen.insert(p.id.clone()))
            .collect();
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        posts.truncate(options.max_tweets);

        info!(
            "Collected {} posts from @{} ({} fetched, last {} days)",
            posts.len(),
            handle,
            fetched_count,
            options.days
        );

        Ok(StyleDataset {
            handle,
            source,
            collected_at: now,
            window_start: window.since,
            options: options.clone(),
            posts,
        })
    }
}
