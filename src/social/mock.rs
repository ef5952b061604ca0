//! Mock Social Provider
//!
//! In-memory platform used for local runs (`USE_MOCK_PROVIDER=true`), as the
//! no-op fallback when credentials are missing, and in tests. Mentions can be
//! seeded, errors can be injected, and every post is recorded. The no-op
//! variant refuses to publish.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use super::traits::{newer_id, ProviderError, SocialProvider, TimelineWindow};
use crate::models::{Author, InboundItem, ItemKind, OutboundItem};

#[derive(Default)]
struct MockState {
    mentions: Vec<InboundItem>,
    timelines: Vec<OutboundItem>,
    posted: Vec<OutboundItem>,
    queued_errors: VecDeque<ProviderError>,
}

pub struct MockProvider {
    handle: String,
    state: Mutex<MockState>,
    next_id: AtomicU64,
    post_calls: AtomicU64,
    /// Reads return nothing, posts are refused
    no_op: bool,
}

impl MockProvider {
    pub fn new(handle: &str) -> Self {
        Self {
            handle: handle.to_string(),
            state: Mutex::new(MockState::default()),
            next_id: AtomicU64::new(1_000),
            post_calls: AtomicU64::new(0),
            no_op: false,
        }
    }

    /// Fallback used when real credentials are missing: reads return nothing
    /// and nothing can be published.
    pub fn no_op(handle: &str) -> Self {
        Self {
            no_op: true,
            ..Self::new(handle)
        }
    }

    pub fn is_no_op(&self) -> bool {
        self.no_op
    }

    /// Make a mention visible to `fetch_mentions`
    pub fn push_mention(&self, mention: InboundItem) {
        self.state.lock().mentions.push(mention);
    }

    /// Add a historical post to some account's timeline
    pub fn push_timeline_post(&self, post: OutboundItem) {
        self.state.lock().timelines.push(post);
    }

    /// Next call to any provider operation fails with `error`
    pub fn fail_next(&self, error: ProviderError) {
        self.state.lock().queued_errors.push_back(error);
    }

    /// Everything published so far
    pub fn posted(&self) -> Vec<OutboundItem> {
        self.state.lock().posted.clone()
    }

    /// Number of `post` calls, including failed ones
    pub fn post_calls(&self) -> u64 {
        self.post_calls.load(Ordering::SeqCst)
    }

    fn take_error(&self) -> Result<(), ProviderError> {
        match self.state.lock().queued_errors.pop_front() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SocialProvider for MockProvider {
    fn name(&self) -> &str {
        if self.no_op {
            "noop"
        } else {
            "mock"
        }
    }

    fn own_handle(&self) -> &str {
        &self.handle
    }

    fn can_publish(&self) -> bool {
        !self.no_op
    }

    async fn fetch_mentions(&self, since_cursor: Option<&str>) -> Result<Vec<InboundItem>, ProviderError> {
        self.take_error()?;
        if self.no_op {
            return Ok(vec![]);
        }

        let state = self.state.lock();
        let mut mentions: Vec<InboundItem> = state
            .mentions
            .iter()
            .filter(|m| match since_cursor {
                Some(cursor) => m.id != cursor && newer_id(&m.id, cursor) == m.id,
                None => true,
            })
            .cloned()
            .collect();
        mentions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(mentions)
    }

    async fn fetch_timeline(&self, handle: &str, window: &TimelineWindow) -> Result<Vec<OutboundItem>, ProviderError> {
        self.take_error()?;
        if self.no_op {
            return Ok(vec![]);
        }

        let state = self.state.lock();
        let handle = handle.trim_start_matches('@');
        let mut posts: Vec<OutboundItem> = state
            .timelines
            .iter()
            .chain(state.posted.iter())
            .filter(|p| p.author.handle.eq_ignore_ascii_case(handle))
            .filter(|p| p.created_at >= window.since)
            .filter(|p| window.include_replies || !p.is_reply())
            .cloned()
            .collect();
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        posts.truncate(window.max_items);
        Ok(posts)
    }

    async fn post(&self, content: &str, in_reply_to: Option<&str>) -> Result<OutboundItem, ProviderError> {
        self.post_calls.fetch_add(1, Ordering::SeqCst);
        self.take_error()?;
        if self.no_op {
            return Err(ProviderError::Other("no-op provider cannot publish".to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        let item = OutboundItem {
            id,
            kind: if in_reply_to.is_some() { ItemKind::Reply } else { ItemKind::Post },
            content: content.to_string(),
            author: Author::new("self", &self.handle),
            in_reply_to: in_reply_to.map(|s| s.to_string()),
            created_at: Utc::now(),
            metrics: None,
            learning_processed: false,
            learning_processed_at: None,
        };
        self.state.lock().posted.push(item.clone());
        Ok(item)
    }
}
