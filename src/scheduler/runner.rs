//! Loop runner
//!
//! Drives one `Job` through the common cycle:
//! Idle -> AcquiringLock -> (Working | Skipped) -> Sleeping -> Idle, until
//! shutdown. While the job works, a heartbeat extends the lock every third
//! of its ttl; if an extension fails the work is dropped mid-flight. The lock
//! is released after every unit of work whatever the outcome, and a panicking
//! job is caught and counted as a failure.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use parking_lot::Mutex;
use rand::Rng;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::lock::DistributedLock;

/// Lower bound on the heartbeat period
const MIN_HEARTBEAT: Duration = Duration::from_millis(100);

/// One unit of loop work
#[async_trait]
pub trait Job: Send + Sync {
    /// Loop name, also the lock name
    fn name(&self) -> &str;

    async fn run_once(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    AcquiringLock,
    Working,
    Skipped,
    Sleeping,
    Stopped,
}

/// Outcome of one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed,
    /// Lock held elsewhere (or lock store down)
    Skipped,
    Failed,
    Panicked,
    /// Lock could not be extended; the work was abandoned
    LockLost,
}

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub interval: Duration,
    pub jitter_min: Duration,
    pub jitter_max: Duration,
    pub lock_ttl: Duration,
}

impl LoopConfig {
    pub fn fixed(interval: Duration, lock_ttl: Duration) -> Self {
        Self {
            interval,
            jitter_min: Duration::ZERO,
            jitter_max: Duration::ZERO,
            lock_ttl,
        }
    }
}

/// Loop statistics
#[derive(Debug, Default)]
pub struct LoopStats {
    pub cycles: AtomicU64,
    pub completed: AtomicU64,
    pub skipped: AtomicU64,
    pub failures: AtomicU64,
    pub panics: AtomicU64,
    pub locks_lost: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopStatsSnapshot {
    pub cycles: u64,
    pub completed: u64,
    pub skipped: u64,
    pub failures: u64,
    pub panics: u64,
    pub locks_lost: u64,
}

impl LoopStats {
    pub fn snapshot(&self) -> LoopStatsSnapshot {
        LoopStatsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            panics: self.panics.load(Ordering::Relaxed),
            locks_lost: self.locks_lost.load(Ordering::Relaxed),
        }
    }
}

pub struct ScheduledLoop {
    job: Arc<dyn Job>,
    lock: Arc<DistributedLock>,
    clock: Arc<dyn Clock>,
    config: LoopConfig,
    state: Mutex<LoopState>,
    next_run_at: Mutex<Option<DateTime<Utc>>>,
    stats: LoopStats,
}

impl ScheduledLoop {
    pub fn new(job: Arc<dyn Job>, lock: Arc<DistributedLock>, clock: Arc<dyn Clock>, config: LoopConfig) -> Self {
        Self {
            job,
            lock,
            clock,
            config,
            state: Mutex::new(LoopState::Idle),
            next_run_at: Mutex::new(None),
            stats: LoopStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        self.job.name()
    }

    pub fn state(&self) -> LoopState {
        *self.state.lock()
    }

    pub fn next_run_at(&self) -> Option<DateTime<Utc>> {
        *self.next_run_at.lock()
    }

    pub fn stats(&self) -> LoopStatsSnapshot {
        self.stats.snapshot()
    }

    fn set_state(&self, state: LoopState) {
        *self.state.lock() = state;
    }

    /// Acquire, work, release. Never panics, never returns an error.
    pub async fn run_cycle(&self) -> CycleOutcome {
        self.stats.cycles.fetch_add(1, Ordering::Relaxed);
        self.set_state(LoopState::AcquiringLock);

        let Some(mut handle) = self.lock.acquire(self.job.name(), self.config.lock_ttl).await else {
            debug!("{}: lock busy, skipping cycle", self.job.name());
            self.stats.skipped.fetch_add(1, Ordering::Relaxed);
            self.set_state(LoopState::Skipped);
            return CycleOutcome::Skipped;
        };

        self.set_state(LoopState::Working);
        let heartbeat = (self.config.lock_ttl / 3).max(MIN_HEARTBEAT);
        let work = AssertUnwindSafe(self.job.run_once()).catch_unwind();
        tokio::pin!(work);

        let result = loop {
            tokio::select! {
                biased;
                result = &mut work => break Some(result),
                _ = self.clock.sleep(heartbeat) => {
                    if !self.lock.extend(&mut handle, self.config.lock_ttl).await {
                        break None;
                    }
                    debug!("{}: lock extended", self.job.name());
                }
            }
        };

        let Some(result) = result else {
            // Someone else may own the lock by now, leave it alone
            self.stats.failures.fetch_add(1, Ordering::Relaxed);
            self.stats.locks_lost.fetch_add(1, Ordering::Relaxed);
            error!("{}: lock lost mid-cycle, work abandoned", self.job.name());
            return CycleOutcome::LockLost;
        };

        if !self.lock.release(handle).await {
            warn!("{}: lock expired before release", self.job.name());
        }

        match result {
            Ok(Ok(())) => {
                self.stats.completed.fetch_add(1, Ordering::Relaxed);
                CycleOutcome::Completed
            }
            Ok(Err(e)) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                error!("{}: cycle failed: {:#}", self.job.name(), e);
                CycleOutcome::Failed
            }
            Err(panic) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                self.stats.panics.fetch_add(1, Ordering::Relaxed);
                error!("{}: cycle panicked: {}", self.job.name(), panic_message(panic.as_ref()));
                CycleOutcome::Panicked
            }
        }
    }

    /// Base interval plus uniform jitter
    pub fn next_delay(&self) -> Duration {
        let (min, max) = (self.config.jitter_min, self.config.jitter_max);
        let jitter = if max > min {
            let millis = rand::thread_rng().gen_range(min.as_millis() as u64..=max.as_millis() as u64);
            Duration::from_millis(millis)
        } else {
            min
        };
        self.config.interval + jitter
    }

    /// Record when the next cycle is due, return the delay
    fn schedule_next(&self) -> Duration {
        let delay = self.next_delay();
        let at = self.clock.now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        *self.next_run_at.lock() = Some(at);
        debug!("{}: next run at {}", self.job.name(), at);
        delay
    }

    /// One full iteration without shutdown handling
    pub async fn tick(&self) -> CycleOutcome {
        let outcome = self.run_cycle().await;
        let delay = self.schedule_next();
        self.set_state(LoopState::Sleeping);
        self.clock.sleep(delay).await;
        self.set_state(LoopState::Idle);
        outcome
    }

    /// Run until the shutdown signal flips to true (or its sender is gone)
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Starting {} loop (every {:?})", self.job.name(), self.config.interval);

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.run_cycle().await;
            let delay = self.schedule_next();
            self.set_state(LoopState::Sleeping);

            tokio::select! {
                _ = self.clock.sleep(delay) => {
                    self.set_state(LoopState::Idle);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.set_state(LoopState::Stopped);
        let stats = self.stats();
        info!(
            "{} loop stopped: cycles={}, completed={}, skipped={}, failures={}",
            self.job.name(),
            stats.cycles,
            stats.completed,
            stats.skipped,
            stats.failures
        );
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
