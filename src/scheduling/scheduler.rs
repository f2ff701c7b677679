//! The cooperative, single-threaded scheduling loop: a priority queue of
//! [`Task`]s, serviced one at a time, with a fuzzed delay between runs
//! acting as a global rate limit.
//!
//! ```rust,no_run
//! use datawatch::scheduling::{Delay, Priority, RunOutcome, SchedulingLoop, SystemClock, Task};
//! use std::time::Duration;
//!
//! let mut sched = SchedulingLoop::new(SystemClock::new(), Duration::from_millis(100), 0.25);
//! sched.push(Task::new("example", Priority::Normal, Duration::ZERO, Delay::Fixed(Duration::from_secs(60))));
//! sched.run_until(|_task| RunOutcome::Changed, 1);
//! ```

use std::collections::BinaryHeap;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;

use super::clock::Clock;
use super::task::Task;

/// Errors raised by the scheduling loop.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The queue was empty when a run was requested.
    #[error("no tasks are scheduled")]
    QueueEmpty,
}

/// What a task's run reported back to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The run succeeded and observed a change; backoff resets.
    Changed,
    /// The run succeeded and observed no change; backoff grows.
    Unchanged,
    /// The run failed; treated the same as `Unchanged` for backoff
    /// purposes, so a consistently failing target is not hammered.
    Failed,
    /// The task should not be rescheduled at all.
    Done,
}

/// A single-threaded priority-queue scheduler. Every dequeue waits a
/// fuzzed delay, bounding how fast the loop issues work regardless of
/// how many tasks are due, then invokes the runner and reschedules
/// anchored to the task's original trigger time.
pub struct SchedulingLoop<C: Clock> {
    clock: C,
    queue: BinaryHeap<Task>,
    base_delay: Duration,
    fuzz_fraction: f64,
}

impl<C: Clock> SchedulingLoop<C> {
    /// A scheduler over `clock`, issuing at most one task per
    /// `base_delay` on average, fuzzed by `+/- fuzz_fraction` to avoid
    /// every run landing in lockstep.
    pub fn new(clock: C, base_delay: Duration, fuzz_fraction: f64) -> Self {
        Self {
            clock,
            queue: BinaryHeap::new(),
            base_delay,
            fuzz_fraction: fuzz_fraction.clamp(0.0, 1.0),
        }
    }

    /// Add a task to the queue.
    pub fn push(&mut self, task: Task) {
        self.queue.push(task);
    }

    /// Number of tasks currently queued.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the queue has no tasks.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Peek at the next due task without removing it.
    pub fn peek(&self) -> Option<&Task> {
        self.queue.peek()
    }

    fn fuzzed_delay(&self) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let mut rng = rand::thread_rng();
        let fuzz: f64 = rng.gen_range(-self.fuzz_fraction..=self.fuzz_fraction);
        self.base_delay.mul_f64((1.0 + fuzz).max(0.0))
    }

    /// Wait for the global rate limit, pop the next due task, run it via
    /// `runner`, and reschedule it (unless it reports [`RunOutcome::Done`]).
    /// If the task is not yet due, sleeps until it is, on top of the
    /// rate-limit delay.
    pub fn step<F: FnMut(&Task) -> RunOutcome>(&mut self, mut runner: F) -> Result<RunOutcome, SchedulerError> {
        let mut task = self.queue.pop().ok_or(SchedulerError::QueueEmpty)?;
        let now = self.clock.now();
        if task.next_run > now {
            self.clock.sleep(task.next_run - now);
        }
        if task.apply_global_ratelimit {
            self.clock.sleep(self.fuzzed_delay());
        }
        let outcome = runner(&task);
        match outcome {
            RunOutcome::Done => {}
            RunOutcome::Changed => {
                task.reschedule(true);
                self.queue.push(task);
            }
            RunOutcome::Unchanged | RunOutcome::Failed => {
                task.reschedule(false);
                self.queue.push(task);
            }
        }
        Ok(outcome)
    }

    /// Run `step` up to `iterations` times with the same `runner`,
    /// stopping early if the queue empties. Returns every outcome
    /// observed, in order.
    pub fn run_until<F: FnMut(&Task) -> RunOutcome>(&mut self, mut runner: F, iterations: usize) -> Vec<RunOutcome> {
        let mut outcomes = Vec::with_capacity(iterations);
        for _ in 0..iterations {
            if self.is_empty() {
                break;
            }
            match self.step(&mut runner) {
                Ok(outcome) => outcomes.push(outcome),
                Err(SchedulerError::QueueEmpty) => break,
            }
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::super::clock::VirtualClock;
    use super::super::task::{Delay, Priority};
    use super::*;

    #[test]
    fn step_reschedules_anchored_to_trigger_time() {
        let mut sched = SchedulingLoop::new(VirtualClock::new(), Duration::ZERO, 0.0);
        sched.push(Task::new(
            "t",
            Priority::Normal,
            Duration::from_secs(0),
            Delay::Fixed(Duration::from_secs(30)),
        ));
        sched.step(|_task| RunOutcome::Changed).unwrap();
        let next = sched.peek().unwrap();
        assert_eq!(next.next_run, Duration::from_secs(30));
    }

    #[test]
    fn done_tasks_are_not_requeued() {
        let mut sched = SchedulingLoop::new(VirtualClock::new(), Duration::ZERO, 0.0);
        sched.push(Task::new(
            "t",
            Priority::Normal,
            Duration::from_secs(0),
            Delay::Fixed(Duration::from_secs(30)),
        ));
        sched.step(|_task| RunOutcome::Done).unwrap();
        assert!(sched.is_empty());
    }

    #[test]
    fn empty_queue_step_errors() {
        let mut sched: SchedulingLoop<VirtualClock> = SchedulingLoop::new(VirtualClock::new(), Duration::ZERO, 0.0);
        assert!(matches!(sched.step(|_| RunOutcome::Done), Err(SchedulerError::QueueEmpty)));
    }

    #[test]
    fn run_until_drains_and_reports_outcomes_in_order() {
        let mut sched = SchedulingLoop::new(VirtualClock::new(), Duration::ZERO, 0.0);
        sched.push(Task::new(
            "t",
            Priority::Normal,
            Duration::from_secs(0),
            Delay::Fixed(Duration::from_secs(1)),
        ));
        let mut call = 0;
        let outcomes = sched.run_until(
            |_task| {
                call += 1;
                if call < 3 {
                    RunOutcome::Unchanged
                } else {
                    RunOutcome::Done
                }
            },
            10,
        );
        assert_eq!(outcomes, vec![RunOutcome::Unchanged, RunOutcome::Unchanged, RunOutcome::Done]);
        assert!(sched.is_empty());
    }
}
