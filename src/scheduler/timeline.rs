//! Timeline-Poster loop
//!
//! One post per cycle at most. In order:
//! 1. safe mode: do nothing
//! 2. an approved staged post is waiting: publish it (budget permitting)
//! 3. approval required: compose and stage
//! 4. budget reached: skip
//! 5. compose and post

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::gates::{self, GateDecision, PostingBudget};
use super::provider_failure;
use super::runner::Job;
use crate::composer::Draft;
use crate::context::AppContext;
use crate::models::PendingPost;

/// Cap on undecided staged posts; staging stops until a human catches up
const MAX_PENDING_APPROVALS: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineOutcome {
    SafeMode,
    PublishedApproved { pending_id: String, item_id: String },
    Staged { pending_id: String },
    ApprovalBacklog { pending: usize },
    BudgetExceeded(PostingBudget),
    Posted { item_id: String },
    ModerationRejected(String),
    LlmUnavailable,
    ProviderUnavailable,
}

pub struct TimelineJob {
    ctx: Arc<AppContext>,
}

impl TimelineJob {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    pub async fn run_cycle(&self) -> Result<TimelineOutcome> {
        let config = &self.ctx.config.posting;
        let store = &self.ctx.store;

        if config.safe_mode {
            debug!("Safe mode on, not posting");
            return Ok(TimelineOutcome::SafeMode);
        }

        if let Some(approved) = store.next_approved()? {
            return self.publish_approved(approved).await;
        }

        let budget = match gates::evaluate(config, store, self.ctx.clock.now())? {
            GateDecision::SafeMode => return Ok(TimelineOutcome::SafeMode),
            GateDecision::BudgetExceeded(budget) => return Ok(TimelineOutcome::BudgetExceeded(budget)),
            GateDecision::StageForApproval => None,
            GateDecision::Proceed(budget) => Some(budget),
        };

        if budget.is_none() {
            let pending = store.count_pending()?;
            if pending >= MAX_PENDING_APPROVALS {
                warn!("{} posts awaiting approval, not staging more", pending);
                return Ok(TimelineOutcome::ApprovalBacklog { pending });
            }
        }

        if budget.is_some() && !self.ctx.provider().can_publish() {
            warn!("Provider {} cannot publish, not composing", self.ctx.provider().name());
            return Ok(TimelineOutcome::ProviderUnavailable);
        }

        let composer = self.ctx.composer();
        if !composer.is_available() {
            warn!("LLM unavailable, nothing to post");
            return Ok(TimelineOutcome::LlmUnavailable);
        }

        let text = match composer.compose_post().await? {
            Draft::Ready(text) => text,
            Draft::Rejected(reason) => {
                info!("Draft blocked by moderation: {}", reason);
                return Ok(TimelineOutcome::ModerationRejected(reason));
            }
        };

        if budget.is_none() {
            let staged = store.stage_post(&text, None, self.ctx.clock.now())?;
            info!("Staged post {} for approval", staged.id);
            return Ok(TimelineOutcome::Staged { pending_id: staged.id });
        }

        Ok(match gates::publish(self.name(), &self.ctx, &text, None).await? {
            Some(item) => {
                info!("Posted {} ({} chars)", item.id, text.chars().count());
                TimelineOutcome::Posted { item_id: item.id }
            }
            None => TimelineOutcome::ProviderUnavailable,
        })
    }

    /// Claim, post, record. The claim happens first so a post is published
    /// at most once.
    async fn publish_approved(&self, approved: PendingPost) -> Result<TimelineOutcome> {
        let store = &self.ctx.store;
        let budget = PostingBudget::load(store, &self.ctx.config.posting, self.ctx.clock.now())?;
        if budget.is_exhausted() {
            info!("Approved post {} waiting on posting budget", approved.id);
            return Ok(TimelineOutcome::BudgetExceeded(budget));
        }

        let provider = self.ctx.provider();
        if !provider.can_publish() {
            warn!("Provider {} cannot publish, approved post {} stays queued", provider.name(), approved.id);
            return Ok(TimelineOutcome::ProviderUnavailable);
        }
        if !store.claim_approved(&approved.id)? {
            debug!("Approved post {} already claimed", approved.id);
            return Ok(TimelineOutcome::ProviderUnavailable);
        }

        match provider.post(&approved.content, approved.in_reply_to.as_deref()).await {
            Ok(item) => {
                if !store.record_approved_post(&approved.id, &item, self.ctx.clock.now())? {
                    warn!("Approved post {} published as {} but its claim was gone", approved.id, item.id);
                }
                info!("Published approved post {} as {}", approved.id, item.id);
                Ok(TimelineOutcome::PublishedApproved {
                    pending_id: approved.id,
                    item_id: item.id,
                })
            }
            Err(e) => {
                store.release_approved_claim(&approved.id)?;
                provider_failure(self.name(), e)?;
                Ok(TimelineOutcome::ProviderUnavailable)
            }
        }
    }
}

#[async_trait]
impl Job for TimelineJob {
    fn name(&self) -> &str {
        "timeline"
    }

    async fn run_once(&self) -> Result<()> {
        let outcome = self.run_cycle().await?;
        debug!("timeline cycle: {:?}", outcome);
        Ok(())
    }
}
