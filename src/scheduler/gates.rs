//! Posting gates
//!
//! Applied in order: safe mode -> approval staging -> hourly/daily budget.
//! Shared by the timeline poster and the mention reply pass.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::config::PostingConfig;
use crate::models::OutboundItem;
use crate::scheduler::provider_failure;
use crate::store::Store;

/// Trailing-window post counts against the configured limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostingBudget {
    pub hourly_count: u32,
    pub daily_count: u32,
    pub hourly_limit: u32,
    pub daily_limit: u32,
}

impl PostingBudget {
    pub fn load(store: &Store, config: &PostingConfig, now: DateTime<Utc>) -> Result<Self> {
        Ok(Self {
            hourly_count: store.outbound_count_since(now - Duration::hours(1))?,
            daily_count: store.outbound_count_since(now - Duration::hours(24))?,
            hourly_limit: config.hourly_limit,
            daily_limit: config.daily_limit,
        })
    }

    pub fn is_exhausted(&self) -> bool {
        self.hourly_count >= self.hourly_limit || self.daily_count >= self.daily_limit
    }

    /// Account for one more post without re-querying
    pub fn record_post(&mut self) {
        self.hourly_count += 1;
        self.daily_count += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Never post
    SafeMode,
    /// Compose and stage for a human
    StageForApproval,
    BudgetExceeded(PostingBudget),
    Proceed(PostingBudget),
}

pub fn evaluate(config: &PostingConfig, store: &Store, now: DateTime<Utc>) -> Result<GateDecision> {
    if config.safe_mode {
        return Ok(GateDecision::SafeMode);
    }
    if config.require_approval {
        return Ok(GateDecision::StageForApproval);
    }

    let budget = PostingBudget::load(store, config, now)?;
    if budget.is_exhausted() {
        info!(
            "Posting budget reached: {}/{} this hour, {}/{} today",
            budget.hourly_count, budget.hourly_limit, budget.daily_count, budget.daily_limit
        );
        return Ok(GateDecision::BudgetExceeded(budget));
    }
    Ok(GateDecision::Proceed(budget))
}

/// Post and record. `Ok(None)` when the provider failed transiently or
/// cannot publish at all.
pub(crate) async fn publish(
    job: &str,
    ctx: &crate::context::AppContext,
    content: &str,
    in_reply_to: Option<&str>,
) -> Result<Option<OutboundItem>> {
    let provider = ctx.provider();
    if !provider.can_publish() {
        warn!("{}: provider {} cannot publish, nothing posted", job, provider.name());
        return Ok(None);
    }
    match provider.post(content, in_reply_to).await {
        Ok(item) => {
            ctx.store.record_outbound(&item, ctx.clock.now())?;
            Ok(Some(item))
        }
        Err(e) => {
            provider_failure(job, e)?;
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::Author;

    fn posting(limit: u32) -> PostingConfig {
        let mut config = Config::default().posting;
        config.require_approval = false;
        config.hourly_limit = limit;
        config.daily_limit = 100;
        config
    }

    #[test]
    fn test_gate_order() {
        let store = Store::open_in_memory().unwrap();
        let mut config = posting(5);
        config.safe_mode = true;
        config.require_approval = true;
        assert_eq!(evaluate(&config, &store, Utc::now()).unwrap(), GateDecision::SafeMode);

        config.safe_mode = false;
        assert_eq!(evaluate(&config, &store, Utc::now()).unwrap(), GateDecision::StageForApproval);

        config.require_approval = false;
        assert!(matches!(evaluate(&config, &store, Utc::now()).unwrap(), GateDecision::Proceed(_)));
    }

    #[test]
    fn test_budget_windows() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let me = Author::new("1", "me");

        // Two posts 30 minutes ago, one 3 hours ago
        for (id, age) in [("1", 30), ("2", 30), ("3", 180)] {
            let recorded = now - Duration::minutes(age);
            store.record_outbound(&OutboundItem::post(id, "x", me.clone(), recorded), recorded).unwrap();
        }

        let budget = PostingBudget::load(&store, &posting(2), now).unwrap();
        assert_eq!((budget.hourly_count, budget.daily_count), (2, 3));
        assert!(budget.is_exhausted());
        assert!(matches!(
            evaluate(&posting(2), &store, now).unwrap(),
            GateDecision::BudgetExceeded(_)
        ));
        assert!(matches!(evaluate(&posting(3), &store, now).unwrap(), GateDecision::Proceed(_)));
    }
}
