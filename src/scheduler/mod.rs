//! Scheduler Loops
//!
//! Four cooperating loops, each an independent tokio task:
//! - Ingestion: pull new mentions, optionally reply
//! - Timeline-Poster: publish approved posts, stage or post new ones
//! - Learning-Worker: turn unprocessed items into memories
//! - Self-Style-Worker: periodically regenerate our own style guide
//!
//! Loops never call each other; they share the lock, the clock and the store
//! through `AppContext`.

pub mod gates;
mod ingestion;
mod learning;
mod runner;
mod self_style;
mod timeline;

pub use gates::{GateDecision, PostingBudget};
pub use ingestion::{IngestionJob, IngestionReport, MENTIONS_CURSOR};
pub use learning::{LearningJob, LearningReport};
pub use runner::{CycleOutcome, Job, LoopConfig, LoopState, LoopStats, LoopStatsSnapshot, ScheduledLoop};
pub use self_style::SelfStyleJob;
pub use timeline::{TimelineJob, TimelineOutcome};

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::context::AppContext;
use crate::social::ProviderError;

/// Decide what a provider failure means for the current cycle. Transient and
/// not-found errors end the cycle quietly; auth and other errors surface as
/// cycle failures.
pub(crate) fn provider_failure(job: &str, err: ProviderError) -> anyhow::Result<()> {
    match err {
        ProviderError::RateLimited(retry_after) => {
            warn!("{}: rate limited (retry after {:?}s), trying next cycle", job, retry_after);
            Ok(())
        }
        ProviderError::Network(msg) => {
            warn!("{}: network error, trying next cycle: {}", job, msg);
            Ok(())
        }
        ProviderError::NotFound(what) => {
            info!("{}: not found, skipping: {}", job, what);
            Ok(())
        }
        e @ ProviderError::AuthFailed(_) => {
            error!("{}: provider rejected credentials: {}", job, e);
            Err(e.into())
        }
        e @ ProviderError::Other(_) => Err(e.into()),
    }
}

/// Build the four loops from configuration
pub fn build_loops(ctx: &Arc<AppContext>) -> Vec<Arc<ScheduledLoop>> {
    let config = &ctx.config;
    let ttl = config.lock_ttl;

    let jobs: Vec<(Arc<dyn Job>, LoopConfig)> = vec![
        (
            Arc::new(IngestionJob::new(ctx.clone())),
            LoopConfig::fixed(config.ingestion.poll_interval, ttl),
        ),
        (
            Arc::new(TimelineJob::new(ctx.clone())),
            LoopConfig {
                interval: config.posting.interval,
                jitter_min: config.posting.jitter_min,
                jitter_max: config.posting.jitter_max,
                lock_ttl: ttl,
            },
        ),
        (
            Arc::new(LearningJob::new(ctx.clone())),
            LoopConfig::fixed(config.learning.interval, ttl),
        ),
        (
            Arc::new(SelfStyleJob::new(ctx.clone())),
            LoopConfig::fixed(config.self_style.interval, ttl),
        ),
    ];

    jobs.into_iter()
        .map(|(job, loop_config)| {
            Arc::new(ScheduledLoop::new(job, ctx.lock.clone(), ctx.clock.clone(), loop_config))
        })
        .collect()
}

/// Spawn every loop; each stops when `shutdown` flips to true
pub fn spawn_all(loops: &[Arc<ScheduledLoop>], shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
    loops
        .iter()
        .map(|l| {
            let l = l.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { l.run(shutdown).await })
        })
        .collect()
}
