//! Clock Abstraction
//!
//! Every loop reads time and sleeps through a `Clock` so interval logic can be
//! driven deterministically in tests:
//! - `SystemClock`: wall clock + tokio timer
//! - `FakeClock`: records requested sleeps and advances its own time instead

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::time::Duration;

/// Time source used by loops, locks and stores
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current time
    fn now(&self) -> DateTime<Utc>;

    /// Suspend the caller for `duration` (zero is a no-op)
    async fn sleep(&self, duration: Duration);

    /// Current time as unix epoch seconds
    fn timestamp(&self) -> i64 {
        self.now().timestamp()
    }
}

/// Real clock backed by the system timer
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug)]
struct FakeClockState {
    now: DateTime<Utc>,
    sleeps: Vec<Duration>,
}

/// Test clock: sleeping never blocks, it moves time forward by exactly the
/// requested duration and remembers the request.
#[derive(Debug)]
pub struct FakeClock {
    state: Mutex<FakeClockState>,
}

impl FakeClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(FakeClockState {
                now: start,
                sleeps: Vec::new(),
            }),
        }
    }

    /// Move time forward without recording a sleep
    pub fn advance(&self, by: Duration) {
        let mut state = self.state.lock();
        state.now += chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
    }

    /// Every sleep requested so far, in order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.state.lock().sleeps.clone()
    }

    /// Sum of all requested sleeps
    pub fn total_slept(&self) -> Duration {
        self.state.lock().sleeps.iter().sum()
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

#[async_trait]
impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        self.state.lock().now
    }

    async fn sleep(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        {
            let mut state = self.state.lock();
            state.sleeps.push(duration);
            state.now += chrono::Duration::from_std(duration)
                .unwrap_or_else(|_| chrono::Duration::zero());
        }
        // Let other tasks run so fake-clock loops don't starve the runtime
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_fake_clock_records_and_advances() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let clock = FakeClock::new(t0);

        clock.sleep(Duration::from_secs(60)).await;
        clock.sleep(Duration::from_secs(30)).await;

        assert_eq!(clock.sleeps(), vec![Duration::from_secs(60), Duration::from_secs(30)]);
        assert_eq!(clock.now(), t0 + chrono::Duration::seconds(90));
        assert_eq!(clock.timestamp(), t0.timestamp() + 90);
    }

    #[tokio::test]
    async fn test_zero_sleep_is_noop() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = FakeClock::new(t0);

        clock.sleep(Duration::ZERO).await;

        assert!(clock.sleeps().is_empty());
        assert_eq!(clock.now(), t0);
    }

    #[test]
    fn test_advance_does_not_record() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = FakeClock::new(t0);

        clock.advance(Duration::from_secs(5));

        assert_eq!(clock.total_slept(), Duration::ZERO);
        assert_eq!(clock.now(), t0 + chrono::Duration::seconds(5));
    }
}
