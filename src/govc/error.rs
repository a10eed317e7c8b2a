//! Errors raised by the `govc` transport.

use thiserror::Error;

/// Errors returned by [`super::GovcInventory`].
#[derive(Debug, Error)]
pub enum GovcError {
    /// Raised when the `govc` binary cannot be started.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Operating system error.
        #[source]
        source: std::io::Error,
    },
    /// Raised when a synchronous `govc` command exits unsuccessfully.
    #[error("{command} exited with status {status_text}: {stderr}")]
    CommandFailure {
        /// Rendered command line, without credentials.
        command: String,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the command.
        stderr: String,
    },
    /// Raised when JSON output cannot be parsed.
    #[error("failed to parse output of {command}: {message}")]
    Parse {
        /// Rendered command line.
        command: String,
        /// Parser error message.
        message: String,
    },
    /// Raised when polling a task that is not tracked.
    #[error("unknown task {0}")]
    UnknownTask(String),
    /// Raised when the background wait on a task panicked or was cancelled.
    #[error("task {task} was lost: {message}")]
    TaskLost {
        /// Task identifier.
        task: String,
        /// Join error message.
        message: String,
    },
}
