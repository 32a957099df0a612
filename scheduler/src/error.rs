//! Crate-level error type for the Scheduler's public command surface.

use std::fmt;

#[derive(Debug)]
pub enum SchedulerError {
    /// `add` was called for a job whose prior state was not `Stopped`.
    Duplicate(String),
    /// `stop`/`kill`/`delete`/`quick_start` referenced a job id the
    /// Scheduler has never seen.
    UnknownJob(String),
    /// The command-dispatch task is gone (the Scheduler was dropped).
    ChannelClosed,
    /// `restore` could not load the persisted job table.
    Store(String),
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerError::Duplicate(id) => write!(f, "job {id:?} is already scheduled"),
            SchedulerError::UnknownJob(id) => write!(f, "no such job {id:?}"),
            SchedulerError::ChannelClosed => write!(f, "scheduler command channel is closed"),
            SchedulerError::Store(msg) => write!(f, "store error: {msg}"),
        }
    }
}

impl std::error::Error for SchedulerError {}
