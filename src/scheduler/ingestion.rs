//! Ingestion loop
//!
//! Fetches mentions newer than the stored cursor, inserts them idempotently
//! and advances the cursor in the same transaction. With replies enabled,
//! freshly stored mentions get a composed reply through the posting gates.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::gates::{self, GateDecision};
use super::provider_failure;
use super::runner::Job;
use crate::composer::Draft;
use crate::context::AppContext;
use crate::models::InboundItem;
use crate::social::newer_id;

pub const MENTIONS_CURSOR: &str = "mentions";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestionReport {
    pub fetched: usize,
    pub inserted: usize,
    pub cursor: Option<String>,
    pub replies_posted: usize,
    pub replies_staged: usize,
}

pub struct IngestionJob {
    ctx: Arc<AppContext>,
}

impl IngestionJob {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    pub async fn ingest(&self) -> Result<IngestionReport> {
        let store = &self.ctx.store;
        let provider = self.ctx.provider();
        let cursor = store.get_cursor(MENTIONS_CURSOR)?;

        let mentions = match provider.fetch_mentions(cursor.as_deref()).await {
            Ok(mentions) => mentions,
            Err(e) => {
                provider_failure(self.name(), e)?;
                return Ok(IngestionReport {
                    cursor,
                    ..Default::default()
                });
            }
        };

        let mut report = IngestionReport {
            fetched: mentions.len(),
            cursor: cursor.clone(),
            ..Default::default()
        };
        if mentions.is_empty() {
            debug!("No new mentions since {:?}", cursor);
            return Ok(report);
        }

        let max_id = mentions.iter().fold(cursor, |acc, m| {
            Some(match acc {
                Some(seen) => newer_id(&seen, &m.id).to_string(),
                None => m.id.clone(),
            })
        });

        let fresh_ids = store.ingest_inbound(
            &mentions,
            max_id.as_deref().map(|v| (MENTIONS_CURSOR, v)),
            self.ctx.clock.now(),
        )?;
        report.inserted = fresh_ids.len();
        report.cursor = max_id;

        info!(
            "Ingested {} new mentions ({} fetched), cursor at {:?}",
            report.inserted, report.fetched, report.cursor
        );

        if self.ctx.config.ingestion.reply_to_mentions && !fresh_ids.is_empty() {
            let own = provider.own_handle().to_string();
            let fresh: Vec<&InboundItem> = mentions
                .iter()
                .filter(|m| fresh_ids.contains(&m.id))
                .filter(|m| !m.author.handle.eq_ignore_ascii_case(&own))
                .collect();
            self.reply_pass(&fresh, &mut report).await?;
        }

        Ok(report)
    }

    async fn reply_pass(&self, mentions: &[&InboundItem], report: &mut IngestionReport) -> Result<()> {
        let store = &self.ctx.store;
        let composer = self.ctx.composer();
        if !composer.is_available() {
            debug!("LLM unavailable, skipping replies");
            return Ok(());
        }

        // None means replies are staged for approval instead of posted
        let mut budget = match gates::evaluate(&self.ctx.config.posting, store, self.ctx.clock.now())? {
            GateDecision::SafeMode => {
                info!("Safe mode on, not replying to {} mentions", mentions.len());
                return Ok(());
            }
            GateDecision::BudgetExceeded(_) => {
                info!("Posting budget reached, {} mentions left unanswered", mentions.len());
                return Ok(());
            }
            GateDecision::StageForApproval => None,
            GateDecision::Proceed(budget) => Some(budget),
        };

        for mention in mentions {
            if budget.as_ref().is_some_and(|b| b.is_exhausted()) {
                info!("Posting budget reached, remaining mentions left unanswered");
                break;
            }
            if store.has_reply_to(&mention.id)? {
                continue;
            }

            let text = match composer.compose_reply(mention).await {
                Ok(Draft::Ready(text)) => text,
                Ok(Draft::Rejected(reason)) => {
                    info!("Reply to {} blocked by moderation: {}", mention.id, reason);
                    continue;
                }
                Err(e) => {
                    warn!("Could not compose reply to {}: {}", mention.id, e);
                    continue;
                }
            };

            match budget.as_mut() {
                None => {
                    let staged = store.stage_post(&text, Some(&mention.id), self.ctx.clock.now())?;
                    info!("Staged reply {} to mention {} for approval", staged.id, mention.id);
                    report.replies_staged += 1;
                }
                Some(budget) => match gates::publish(self.name(), &self.ctx, &text, Some(&mention.id)).await? {
                    Some(item) => {
                        info!("Replied to {} with {}", mention.id, item.id);
                        report.replies_posted += 1;
                        budget.record_post();
                    }
                    // Provider trouble, try again next cycle
                    None => break,
                },
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Job for IngestionJob {
    fn name(&self) -> &str {
        "ingestion"
    }

    async fn run_once(&self) -> Result<()> {
        self.ingest().await.map(|_| ())
    }
}
