use dendrite_core::worker::Worker;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

/// Emits `()` once after `delay`, then finishes.
///
/// Workflows implement timeouts with this: declare it while waiting and
/// react to its output, or stop declaring it once the wait is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerWorker {
    pub delay: Duration,
}

impl TimerWorker {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn from_millis(millis: u64) -> Self {
        Self::new(Duration::from_millis(millis))
    }
}

impl Worker for TimerWorker {
    type Output = ();

    fn run(&self) -> BoxStream<'static, anyhow::Result<()>> {
        let delay = self.delay;
        stream::once(async move {
            tokio::time::sleep(delay).await;
            Ok(())
        })
        .boxed()
    }

    /// A different delay restarts the timer.
    fn does_same_work_as(&self, other: &Self) -> bool {
        self.delay == other.delay
    }

    fn describe(&self) -> String {
        format!("TimerWorker({:?})", self.delay)
    }
}

/// Emits the tick number (starting at 1) every `period`. Stops after `limit`
/// ticks when one is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalWorker {
    pub period: Duration,
    #[serde(default)]
    pub limit: Option<u64>,
}

impl IntervalWorker {
    pub fn new(period: Duration) -> Self {
        Self { period, limit: None }
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl Worker for IntervalWorker {
    type Output = u64;

    fn run(&self) -> BoxStream<'static, anyhow::Result<u64>> {
        let period = self.period;
        let limit = self.limit;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        stream::unfold((interval, 0u64), move |(mut interval, count)| async move {
            if limit.is_some_and(|limit| count >= limit) {
                return None;
            }
            interval.tick().await;
            let count = count + 1;
            Some((Ok(count), (interval, count)))
        })
        .boxed()
    }

    fn does_same_work_as(&self, other: &Self) -> bool {
        self == other
    }

    fn describe(&self) -> String {
        format!("IntervalWorker({:?})", self.period)
    }
}
