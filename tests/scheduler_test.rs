//! Integration tests for the scheduler loops

mod common;

use chrono::Duration as ChronoDuration;
use common::{harness, t0, test_config, ScriptedLlm};
use persona_agent::scheduler::{IngestionJob, LearningJob, TimelineJob, TimelineOutcome, MENTIONS_CURSOR};
use persona_agent::{
    Author, Clock, CycleOutcome, InboundItem, LoopConfig, MockProvider, OutboundItem, PendingStatus, ProviderError,
    ScheduledLoop,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test]
async fn test_fake_clock_three_cycles() {
    let dir = TempDir::new().unwrap();
    let h = harness(test_config(&dir), ScriptedLlm::unavailable());

    let job = Arc::new(LearningJob::new(h.ctx.clone()));
    let runner = ScheduledLoop::new(
        job,
        h.ctx.lock.clone(),
        h.ctx.clock.clone(),
        LoopConfig::fixed(Duration::from_secs(60), Duration::from_secs(30)),
    );

    for _ in 0..3 {
        assert_eq!(runner.tick().await, CycleOutcome::Completed);
    }

    assert!(h.clock.total_slept() >= Duration::from_secs(180));
    assert_eq!(runner.next_run_at(), Some(t0() + ChronoDuration::seconds(180)));
    assert_eq!(runner.stats().completed, 3);
}

#[tokio::test]
async fn test_hourly_budget_blocks_posting() {
    let dir = TempDir::new().unwrap();
    let h = harness(test_config(&dir), ScriptedLlm::new("quiet markets, loud builders"));

    // Five posts in the last hour, hourly_limit = 5
    let me = Author::new("self", "persona");
    for i in 0..5 {
        let at = t0() - ChronoDuration::minutes(10 + i);
        let post = OutboundItem::post(&format!("50{}", i), "earlier post", me.clone(), at);
        h.ctx.store.record_outbound(&post, at).unwrap();
    }

    let outcome = TimelineJob::new(h.ctx.clone()).run_cycle().await.unwrap();
    assert!(matches!(outcome, TimelineOutcome::BudgetExceeded(b) if b.hourly_count == 5));
    assert_eq!(h.provider.post_calls(), 0);
}

#[tokio::test]
async fn test_timeline_posts_when_budget_allows() {
    let dir = TempDir::new().unwrap();
    let h = harness(test_config(&dir), ScriptedLlm::new("\"rollups keep getting cheaper\""));

    let outcome = TimelineJob::new(h.ctx.clone()).run_cycle().await.unwrap();
    let TimelineOutcome::Posted { item_id } = outcome else {
        panic!("expected a post, got {:?}", outcome);
    };

    assert_eq!(h.provider.post_calls(), 1);
    let stored = h.ctx.store.get_outbound(&item_id).unwrap().unwrap();
    assert_eq!(stored.content, "rollups keep getting cheaper");
}

#[tokio::test]
async fn test_safe_mode_never_posts() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.posting.safe_mode = true;
    let h = harness(config, ScriptedLlm::new("anything"));

    let outcome = TimelineJob::new(h.ctx.clone()).run_cycle().await.unwrap();
    assert_eq!(outcome, TimelineOutcome::SafeMode);
    assert_eq!(h.provider.post_calls(), 0);
    assert!(h.llm.prompts().is_empty());
}

#[tokio::test]
async fn test_approval_flow() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.posting.require_approval = true;
    let h = harness(config, ScriptedLlm::new("staking yields are compressing"));
    let job = TimelineJob::new(h.ctx.clone());

    // First cycle stages, nothing posted
    let TimelineOutcome::Staged { pending_id } = job.run_cycle().await.unwrap() else {
        panic!("expected staging");
    };
    assert_eq!(h.provider.post_calls(), 0);

    h.ctx.store.decide_pending(&pending_id, true, t0()).unwrap();

    // Next cycle publishes the approved post
    let outcome = job.run_cycle().await.unwrap();
    assert!(matches!(outcome, TimelineOutcome::PublishedApproved { pending_id: ref id, .. } if *id == pending_id));
    assert_eq!(h.provider.posted()[0].content, "staking yields are compressing");
    assert_eq!(h.ctx.store.list_pending(PendingStatus::Posted).unwrap().len(), 1);
}

#[tokio::test]
async fn test_moderation_blocks_draft() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.blocked_terms = vec!["guaranteed returns".to_string()];
    let h = harness(config, ScriptedLlm::new("Guaranteed returns on this one"));

    let outcome = TimelineJob::new(h.ctx.clone()).run_cycle().await.unwrap();
    assert!(matches!(outcome, TimelineOutcome::ModerationRejected(_)));
    assert_eq!(h.provider.post_calls(), 0);
}

fn mention(id: &str, text: &str) -> InboundItem {
    InboundItem::mention(id, text, Author::new("77", "fan"), t0())
}

#[tokio::test]
async fn test_ingestion_advances_cursor_idempotently() {
    let dir = TempDir::new().unwrap();
    let h = harness(test_config(&dir), ScriptedLlm::unavailable());
    let job = IngestionJob::new(h.ctx.clone());

    h.provider.push_mention(mention("101", "gm"));
    h.provider.push_mention(mention("102", "wagmi"));

    let first = job.ingest().await.unwrap();
    assert_eq!((first.fetched, first.inserted), (2, 2));
    assert_eq!(h.ctx.store.get_cursor(MENTIONS_CURSOR).unwrap().as_deref(), Some("102"));

    // Nothing new after the cursor
    let second = job.ingest().await.unwrap();
    assert_eq!(second.fetched, 0);

    h.provider.push_mention(mention("103", "ser"));
    let third = job.ingest().await.unwrap();
    assert_eq!(third.inserted, 1);
    assert_eq!(third.cursor.as_deref(), Some("103"));
    assert_eq!(h.ctx.store.pending_inbound(10).unwrap().len(), 3);
}

#[tokio::test]
async fn test_ingestion_provider_errors() {
    let dir = TempDir::new().unwrap();
    let h = harness(test_config(&dir), ScriptedLlm::unavailable());
    let job = IngestionJob::new(h.ctx.clone());
    h.provider.push_mention(mention("200", "hello"));

    // Transient: cycle ends quietly, cursor untouched
    h.provider.fail_next(ProviderError::RateLimited(Some(30)));
    let report = job.ingest().await.unwrap();
    assert_eq!(report.inserted, 0);
    assert!(h.ctx.store.get_cursor(MENTIONS_CURSOR).unwrap().is_none());

    // Auth: surfaced as a cycle failure
    h.provider.fail_next(ProviderError::AuthFailed("401".to_string()));
    assert!(job.ingest().await.is_err());

    // Recovers on the next cycle
    assert_eq!(job.ingest().await.unwrap().inserted, 1);
}

#[tokio::test]
async fn test_reply_pass_stages_once_per_mention() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.ingestion.reply_to_mentions = true;
    config.posting.require_approval = true;
    let h = harness(config, ScriptedLlm::new("appreciate you, fren"));
    let job = IngestionJob::new(h.ctx.clone());

    h.provider.push_mention(mention("300", "what do you think about restaking?"));
    // Our own mention is never answered
    h.provider
        .push_mention(InboundItem::mention("301", "note to self", Author::new("self", "persona"), t0()));

    let report = job.ingest().await.unwrap();
    assert_eq!(report.replies_staged, 1);
    assert_eq!(h.provider.post_calls(), 0);

    let pending = h.ctx.store.list_pending(PendingStatus::Pending).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].in_reply_to.as_deref(), Some("300"));
    assert!(h.ctx.store.has_reply_to("300").unwrap());
}

#[tokio::test]
async fn test_reply_pass_respects_budget() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.ingestion.reply_to_mentions = true;
    config.posting.hourly_limit = 1;
    let h = harness(config, ScriptedLlm::new("thanks!"));

    h.provider.push_mention(mention("400", "gm"));
    h.provider.push_mention(mention("401", "gm again"));

    let report = IngestionJob::new(h.ctx.clone()).ingest().await.unwrap();
    assert_eq!(report.replies_posted, 1);
    assert_eq!(h.provider.post_calls(), 1);
    assert_eq!(h.provider.posted()[0].in_reply_to.as_deref(), Some("400"));
}

#[tokio::test]
async fn test_loops_skip_while_lock_held_elsewhere() {
    let dir = TempDir::new().unwrap();
    let h = harness(test_config(&dir), ScriptedLlm::unavailable());

    let runner = ScheduledLoop::new(
        Arc::new(TimelineJob::new(h.ctx.clone())),
        h.ctx.lock.clone(),
        h.ctx.clock.clone(),
        LoopConfig::fixed(Duration::from_secs(60), Duration::from_secs(30)),
    );

    let held = h.ctx.lock.acquire("timeline", Duration::from_secs(45)).await.unwrap();
    assert_eq!(runner.tick().await, CycleOutcome::Skipped);

    // The holder's ttl ran out during our 60s sleep
    assert!(held.is_expired(h.clock.now()));
    assert_ne!(runner.tick().await, CycleOutcome::Skipped);
}

#[tokio::test]
async fn test_no_op_provider_never_records_posts() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);

    // Two runs over the same database, as across a restart
    for _ in 0..2 {
        let h = harness(config.clone(), ScriptedLlm::new("thought of the day"));
        h.ctx.set_provider(Arc::new(MockProvider::no_op("persona")));

        let outcome = TimelineJob::new(h.ctx.clone()).run_cycle().await.unwrap();
        assert_eq!(outcome, TimelineOutcome::ProviderUnavailable);
        assert!(h.llm.prompts().is_empty());
        assert_eq!(h.ctx.store.outbound_count_since(t0() - ChronoDuration::days(1)).unwrap(), 0);
    }
}

#[tokio::test]
async fn test_no_op_provider_keeps_approved_posts_queued() {
    let dir = TempDir::new().unwrap();
    let h = harness(test_config(&dir), ScriptedLlm::unavailable());
    let staged = h.ctx.store.stage_post("queued thought", None, t0()).unwrap();
    h.ctx.store.decide_pending(&staged.id, true, t0()).unwrap();
    h.ctx.set_provider(Arc::new(MockProvider::no_op("persona")));

    let outcome = TimelineJob::new(h.ctx.clone()).run_cycle().await.unwrap();
    assert_eq!(outcome, TimelineOutcome::ProviderUnavailable);
    assert_eq!(h.ctx.store.next_approved().unwrap().map(|p| p.id), Some(staged.id));
}

#[tokio::test]
async fn test_approved_post_retried_after_provider_failure() {
    let dir = TempDir::new().unwrap();
    let h = harness(test_config(&dir), ScriptedLlm::unavailable());
    let staged = h.ctx.store.stage_post("patience pays", None, t0()).unwrap();
    h.ctx.store.decide_pending(&staged.id, true, t0()).unwrap();
    let job = TimelineJob::new(h.ctx.clone());

    h.provider.fail_next(ProviderError::RateLimited(Some(60)));
    assert_eq!(job.run_cycle().await.unwrap(), TimelineOutcome::ProviderUnavailable);
    assert!(h.ctx.store.next_approved().unwrap().is_some());

    let outcome = job.run_cycle().await.unwrap();
    assert!(matches!(outcome, TimelineOutcome::PublishedApproved { .. }));
    assert_eq!(h.provider.posted().len(), 1);
}

#[tokio::test]
async fn test_claimed_approval_is_never_published_twice() {
    let dir = TempDir::new().unwrap();
    let h = harness(test_config(&dir), ScriptedLlm::unavailable());
    let staged = h.ctx.store.stage_post("once only", None, t0()).unwrap();
    h.ctx.store.decide_pending(&staged.id, true, t0()).unwrap();

    // Claimed by a cycle that published but never finished its bookkeeping
    assert!(h.ctx.store.claim_approved(&staged.id).unwrap());

    TimelineJob::new(h.ctx.clone()).run_cycle().await.unwrap();
    assert!(h.provider.posted().iter().all(|p| p.content != "once only"));
}
