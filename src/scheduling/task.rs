//! A unit of scheduled work: an identity, a priority, and the time it
//! next wants to run.

use std::time::Duration;

/// Relative importance of a task when two are due at the same time.
/// Ties within a priority break by earliest original trigger time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Background work: link discovery, housekeeping.
    Low,
    /// Ordinary polling of a known target.
    Normal,
    /// Work the caller wants serviced ahead of everything else pending.
    High,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// How a task's next run should be chosen after it completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delay {
    /// Always wait the same interval before the next run.
    Fixed(Duration),
    /// Wait an interval that grows with consecutive quiescent runs, up to
    /// a cap, and resets whenever the run reports a change.
    Backoff {
        /// The interval used immediately after a run that found a
        /// change.
        base: Duration,
        /// The largest interval backoff will reach.
        max: Duration,
        /// Multiplier applied to the previous interval after each
        /// quiescent run.
        factor: f64,
    },
}

/// A task pending execution.
#[derive(Debug, Clone)]
pub struct Task {
    /// Opaque identity used to route the task to its handler.
    pub id: String,
    /// Scheduling priority.
    pub priority: Priority,
    /// Clock-relative time this task is next due.
    pub next_run: Duration,
    /// The time this task was originally due before any queueing delay;
    /// rescheduling anchors to this, not to the time the task actually
    /// ran, so a busy scheduler does not drift a task's cadence.
    pub trigger_time: Duration,
    /// How to compute the next `next_run` after a run.
    pub delay: Delay,
    /// Current backoff interval, valid only when `delay` is
    /// [`Delay::Backoff`]; starts at `base` and grows on each quiescent
    /// run.
    pub current_backoff: Duration,
    /// Number of times this task has run.
    pub run_count: u64,
    /// Whether this task waits out the scheduler's global fuzzed delay
    /// before running. Housekeeping tasks (checkpoint flushes, summaries)
    /// set this to `false` so they are not throttled behind fetch traffic.
    pub apply_global_ratelimit: bool,
}

impl Task {
    /// A new task due at `first_run`.
    pub fn new(id: impl Into<String>, priority: Priority, first_run: Duration, delay: Delay) -> Self {
        let current_backoff = match delay {
            Delay::Fixed(d) => d,
            Delay::Backoff { base, .. } => base,
        };
        Self {
            id: id.into(),
            priority,
            next_run: first_run,
            trigger_time: first_run,
            delay,
            current_backoff,
            run_count: 0,
            apply_global_ratelimit: true,
        }
    }

    /// Exempt this task from the scheduler's global rate limit.
    pub fn without_global_ratelimit(mut self) -> Self {
        self.apply_global_ratelimit = false;
        self
    }

    /// Compute this task's next due time after a run, anchored to
    /// `self.trigger_time` rather than the clock time the run actually
    /// finished at.
    ///
    /// `changed` is ignored for [`Delay::Fixed`] and resets/advances the
    /// backoff interval for [`Delay::Backoff`].
    pub fn reschedule(&mut self, changed: bool) {
        self.run_count += 1;
        let interval = match self.delay {
            Delay::Fixed(d) => d,
            Delay::Backoff { base, max, factor } => {
                if changed {
                    self.current_backoff = base;
                } else {
                    let grown = self.current_backoff.mul_f64(factor);
                    self.current_backoff = grown.min(max);
                }
                self.current_backoff
            }
        };
        self.trigger_time += interval;
        self.next_run = self.trigger_time;
    }
}

/// Ordering for the scheduler's priority queue: earliest `next_run`
/// first, ties broken by higher [`Priority`], further ties broken by
/// task id for determinism.
impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.next_run == other.next_run && self.priority == other.priority && self.id == other.id
    }
}
impl Eq for Task {}

impl PartialOrd for Task {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Task {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .next_run
            .cmp(&self.next_run)
            .then_with(|| self.priority.cmp(&other.priority))
            .then_with(|| other.id.cmp(&self.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_delay_reschedules_from_trigger_time() {
        let mut task = Task::new("t", Priority::Normal, Duration::from_secs(10), Delay::Fixed(Duration::from_secs(5)));
        task.reschedule(true);
        assert_eq!(task.next_run, Duration::from_secs(15));
        task.reschedule(true);
        assert_eq!(task.next_run, Duration::from_secs(20));
    }

    #[test]
    fn backoff_grows_when_quiescent_and_resets_on_change() {
        let mut task = Task::new(
            "t",
            Priority::Normal,
            Duration::from_secs(0),
            Delay::Backoff {
                base: Duration::from_secs(10),
                max: Duration::from_secs(100),
                factor: 2.0,
            },
        );
        task.reschedule(false);
        assert_eq!(task.current_backoff, Duration::from_secs(20));
        task.reschedule(false);
        assert_eq!(task.current_backoff, Duration::from_secs(40));
        task.reschedule(true);
        assert_eq!(task.current_backoff, Duration::from_secs(10));
    }

    #[test]
    fn backoff_is_capped_at_max() {
        let mut task = Task::new(
            "t",
            Priority::Normal,
            Duration::from_secs(0),
            Delay::Backoff {
                base: Duration::from_secs(10),
                max: Duration::from_secs(25),
                factor: 4.0,
            },
        );
        task.reschedule(false);
        task.reschedule(false);
        task.reschedule(false);
        assert_eq!(task.current_backoff, Duration::from_secs(25));
    }

    #[test]
    fn ordering_prefers_earliest_next_run() {
        let a = Task::new("a", Priority::Normal, Duration::from_secs(5), Delay::Fixed(Duration::from_secs(1)));
        let b = Task::new("b", Priority::Normal, Duration::from_secs(1), Delay::Fixed(Duration::from_secs(1)));
        let mut heap = std::collections::BinaryHeap::new();
        heap.push(a);
        heap.push(b);
        assert_eq!(heap.pop().unwrap().id, "b");
    }
}
