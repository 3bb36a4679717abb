//! Shared sleep-and-poll primitives
//!
//! Both the buy and sell monitors run the same loop shape: poll on a
//! fixed interval, up to an iteration budget, under an optional wall-clock
//! deadline. `PollClock` owns that budget so the loop body stays free of
//! counter bookkeeping.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::sleep;

/// Granularity of `wait_until` checks
const WAIT_TICK: Duration = Duration::from_millis(100);

/// Outcome of one clock tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollTick {
    /// Budget available; run the poll body for this iteration
    Proceed { iteration: u32 },
    /// The wall-clock deadline passed; stop waiting now
    DeadlineExceeded,
    /// The iteration budget ran out before the deadline
    Exhausted,
}

/// Iteration/deadline budget for one monitoring loop
#[derive(Debug)]
pub struct PollClock {
    interval: Duration,
    max_iterations: u32,
    deadline: Option<DateTime<Utc>>,
    iteration: u32,
}

impl PollClock {
    pub fn new(interval: Duration, max_iterations: u32, deadline: Option<DateTime<Utc>>) -> Self {
        Self {
            interval,
            max_iterations,
            deadline,
            iteration: 0,
        }
    }

    /// Advance the clock: sleeps the polling interval between iterations
    /// and reports whether the caller may poll again.
    ///
    /// The deadline is advisory at tick granularity; an in-flight poll is
    /// never interrupted, so cancellation can lag by up to one interval.
    pub async fn tick(&mut self) -> PollTick {
        if self.iteration >= self.max_iterations {
            return PollTick::Exhausted;
        }
        if self.iteration > 0 {
            sleep(self.interval).await;
        }
        if let Some(deadline) = self.deadline {
            if Utc::now() > deadline {
                return PollTick::DeadlineExceeded;
            }
        }

        let iteration = self.iteration;
        self.iteration += 1;
        PollTick::Proceed { iteration }
    }
}

/// Suspend until the target wall-clock time has passed.
pub async fn wait_until(target: DateTime<Utc>) {
    while Utc::now() <= target {
        sleep(WAIT_TICK).await;
    }
}
