//! Observes asynchronous platform tasks until they reach a terminal state.

use std::time::{Duration, Instant};

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::inventory::{Inventory, TaskHandle, TaskPayload, TaskState};

/// Default interval between two polls of the same task.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Normalised outcome of a tracked task.
///
/// Successful tasks with and without a result are distinct from each other
/// and from failure, so callers can tell "returned X" from "returned nothing"
/// from "failed".
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TaskOutcome {
    /// The task succeeded and produced a value.
    Completed(TaskPayload),
    /// The task succeeded without producing a value.
    CompletedEmpty,
    /// The task failed with the remote error message.
    Failed(String),
    /// The configured deadline elapsed before the task finished.
    TimedOut,
}

impl TaskOutcome {
    /// Returns `true` for both success variants.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::CompletedEmpty)
    }
}

/// Polls tasks at a fixed interval, optionally bounded by a deadline.
///
/// Without a deadline the tracker waits for as long as the remote task runs.
/// The tracker never returns an error: failures are part of the outcome.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TaskTracker {
    poll_interval: Duration,
    deadline: Option<Duration>,
}

impl Default for TaskTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskTracker {
    /// Creates a tracker polling every three seconds with no deadline.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            deadline: None,
        }
    }

    /// Overrides the poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Bounds every wait; `None` waits indefinitely.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Returns the configured poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Waits for `task` to finish and normalises its outcome.
    ///
    /// Remote failures and transport errors while polling are logged at
    /// warning level and reported as [`TaskOutcome::Failed`]. A task still
    /// running at the deadline is cancelled before [`TaskOutcome::TimedOut`]
    /// is returned.
    pub async fn wait<I: Inventory>(&self, inventory: &I, task: &TaskHandle) -> TaskOutcome {
        let started = Instant::now();

        loop {
            let state = match inventory.poll_task(task).await {
                Ok(state) => state,
                Err(err) => {
                    let message = format!("failed to poll task: {err}");
                    warn!(task = %task, "{message}");
                    return TaskOutcome::Failed(message);
                }
            };

            match state {
                TaskState::Running => {}
                TaskState::Succeeded(Some(payload)) => {
                    debug!(task = %task, "task succeeded");
                    return TaskOutcome::Completed(payload);
                }
                TaskState::Succeeded(None) => {
                    debug!(task = %task, "task succeeded without a result");
                    return TaskOutcome::CompletedEmpty;
                }
                TaskState::Failed(message) => {
                    warn!(task = %task, "{message}");
                    return TaskOutcome::Failed(message);
                }
            }

            if self
                .deadline
                .is_some_and(|deadline| started.elapsed() >= deadline)
            {
                warn!(task = %task, "task did not finish before the deadline, cancelling");
                if let Err(err) = inventory.cancel_task(task).await {
                    warn!(task = %task, "failed to cancel task: {err}");
                }
                return TaskOutcome::TimedOut;
            }

            sleep(self.poll_interval).await;
        }
    }
}
