//! The dependency rendezvous (§4.4): correlates an inbound `DepResult` with
//! the Execution that is waiting for it, keyed by `task_time`.
//!
//! Per the Design Notes' suggested redesign, the correlation ledger is a
//! `task_time -> sink` map owned by the `JobHandle` (see
//! [`crate::handle::JobHandle::dep_waiters`]) rather than a single channel
//! multiplexed by re-enqueue-and-sleep: a result for `task_time = T` is
//! routed to the waiter for `T` in O(1), with no possibility of one
//! Execution stealing another's message.

use crate::handle::JobHandle;
use crate::job::{Dependency, DepResult, TaskTime};
use crate::ports::DependencyTransport;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// The overall ceiling a dependency wait may block for, regardless of how
/// long individual upstream scripts take.
const DEPENDENCY_WAIT_CEILING: Duration = Duration::from_secs(3600);

/// Capacity of the per-wait result channel: exactly one `DepResult` is ever
/// sent into it, by construction (the sink is removed from the map before
/// any second send could occur).
const SINK_CAPACITY: usize = 1;

/// The 5-second send timeout `resolve_dependency` applies when delivering a
/// result, per §4.4 / §5.
pub const RESOLVE_SEND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub enum DependencyError {
    /// `push_dependencies` returned `false`.
    DispatchFailed,
    /// The caller's `cancel` token fired before a result arrived.
    Cancelled,
    /// No result arrived within [`DEPENDENCY_WAIT_CEILING`].
    Timeout,
    /// An upstream dependency reported a non-empty error string.
    UpstreamFailed { log_bytes: Vec<u8>, message: String },
    /// The sink was dropped without a send (the Scheduler is shutting down).
    ChannelClosed,
}

impl fmt::Display for DependencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyError::DispatchFailed => write!(f, "failed to dispatch dependencies"),
            DependencyError::Cancelled => write!(f, "dependency wait was cancelled"),
            DependencyError::Timeout => write!(f, "dependency wait exceeded {DEPENDENCY_WAIT_CEILING:?}"),
            DependencyError::UpstreamFailed { message, .. } => write!(f, "dependency failed: {message}"),
            DependencyError::ChannelClosed => write!(f, "dependency result sink closed without a result"),
        }
    }
}

impl std::error::Error for DependencyError {}

/// Registers a sink for `task_time`, asks the transport to dispatch `deps`,
/// then waits for either a matching result, cancellation, or the overall
/// deadline. The sink is always removed from `handle.dep_waiters` before
/// returning, on every path.
pub async fn wait_depends(
    cancel: &CancellationToken,
    job_id: &str,
    handle: &JobHandle,
    deps: &[Dependency],
    task_time: TaskTime,
    sync: bool,
    transport: &dyn DependencyTransport,
) -> Result<Vec<u8>, DependencyError> {
    if deps.is_empty() {
        return Ok(Vec::new());
    }

    let (tx, mut rx) = mpsc::channel::<DepResult>(SINK_CAPACITY);
    handle.dep_waiters.lock().await.insert(task_time, tx);

    if !transport.push_dependencies(job_id, deps, task_time, sync).await {
        handle.dep_waiters.lock().await.remove(&task_time);
        return Err(DependencyError::DispatchFailed);
    }

    let outcome = tokio::select! {
        _ = cancel.cancelled() => Err(DependencyError::Cancelled),
        _ = tokio::time::sleep(DEPENDENCY_WAIT_CEILING) => Err(DependencyError::Timeout),
        received = rx.recv() => match received {
            Some(result) if result.error_string.is_empty() => Ok(result.log_bytes),
            Some(result) => Err(DependencyError::UpstreamFailed {
                log_bytes: result.log_bytes,
                message: result.error_string,
            }),
            None => Err(DependencyError::ChannelClosed),
        },
    };

    handle.dep_waiters.lock().await.remove(&task_time);
    outcome
}
