//! Learning-Worker loop
//!
//! Takes a bounded batch of unprocessed items (inbound first, with a share
//! reserved for our own posts), extracts
//! memories and commits each item in its own transaction. A failed commit
//! leaves that item pending for the next cycle.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Duration;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::provider_failure;
use super::runner::Job;
use crate::context::AppContext;
use crate::learning::{LearningExtractor, LearningSource};
use crate::models::OutboundItem;
use crate::social::TimelineWindow;

/// One batch slot in this many is kept for outbound items
const OUTBOUND_SHARE: usize = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LearningReport {
    pub processed: usize,
    /// Already claimed by another worker
    pub skipped: usize,
    pub failed: usize,
    pub memories_created: usize,
}

pub struct LearningJob {
    ctx: Arc<AppContext>,
    extractor: LearningExtractor,
}

impl LearningJob {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        let mut extractor = LearningExtractor::new(ctx.clock.clone());
        if ctx.config.learning.use_llm {
            extractor = extractor.with_llm(ctx.llm.clone());
        }
        Self { ctx, extractor }
    }

    pub fn extractor(&self) -> &LearningExtractor {
        &self.extractor
    }

    pub async fn process_batch(&self) -> Result<LearningReport> {
        let store = &self.ctx.store;
        let batch = self.ctx.config.learning.batch_size.max(1);

        // Part of every batch belongs to our own posts so a mention backlog
        // cannot starve engagement learning
        let reserved = (batch / OUTBOUND_SHARE).max(1);
        let mut outbound = store.pending_outbound(reserved)?;
        let inbound = store.pending_inbound(batch - outbound.len())?;
        if outbound.len() == reserved && inbound.len() + reserved < batch {
            outbound = store.pending_outbound(batch - inbound.len())?;
        }
        if !outbound.is_empty() {
            self.refresh_metrics(&mut outbound).await?;
        }

        let mut report = LearningReport::default();
        if inbound.is_empty() && outbound.is_empty() {
            debug!("Nothing to learn from");
            return Ok(report);
        }

        let sources = inbound
            .iter()
            .map(LearningSource::Inbound)
            .chain(outbound.iter().map(LearningSource::Outbound));

        for source in sources {
            let memories = self.extractor.extract(source).await;
            match store.commit_learning(source.direction(), source.id(), &memories, self.ctx.clock.now()) {
                Ok(Some(commit)) => {
                    report.processed += 1;
                    report.memories_created += commit.created;
                }
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    warn!("Learning commit for {} failed, will retry: {}", source.id(), e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Learning batch: {} processed, {} skipped, {} failed, {} new memories",
            report.processed, report.skipped, report.failed, report.memories_created
        );
        Ok(report)
    }

    /// Pull current engagement for our pending posts before learning from them
    async fn refresh_metrics(&self, items: &mut [OutboundItem]) -> Result<()> {
        let Some(oldest) = items.iter().map(|i| i.created_at).min() else {
            return Ok(());
        };

        let provider = self.ctx.provider();
        let window = TimelineWindow {
            since: oldest - Duration::minutes(1),
            max_items: items.len() * 2,
            include_replies: true,
        };

        let timeline = match provider.fetch_timeline(provider.own_handle(), &window).await {
            Ok(timeline) => timeline,
            Err(e) => {
                // Learning still works without fresh numbers
                if let Err(e) = provider_failure(self.name(), e) {
                    warn!("Metrics refresh failed: {}", e);
                }
                return Ok(());
            }
        };

        let fresh: HashMap<&str, _> = timeline
            .iter()
            .filter_map(|p| p.metrics.map(|m| (p.id.as_str(), m)))
            .collect();

        for item in items.iter_mut() {
            if let Some(metrics) = fresh.get(item.id.as_str()) {
                self.ctx.store.update_outbound_metrics(&item.id, metrics)?;
                item.metrics = Some(*metrics);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Job for LearningJob {
    fn name(&self) -> &str {
        "learning"
    }

    async fn run_once(&self) -> Result<()> {
        self.process_batch().await.map(|_| ())
    }
}
