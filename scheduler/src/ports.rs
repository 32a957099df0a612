//! External collaborators, expressed as object-safe traits ("ports" in the
//! hexagonal sense) so the core never depends on a concrete spawner, mailer,
//! store, or transport. Each has exactly one thin, in-process adapter under
//! `adapters/`.

use crate::job::{Dependency, JobId, TaskList, TaskTime};
use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Runs one job command to completion, teeing its output to disk and,
/// if given, appending it to `log_sink` too (used to build up a combined
/// dependency + process log for a single end-of-run flush).
#[async_trait]
pub trait Spawner: Send + Sync {
    async fn exec_script(
        &self,
        cancel: CancellationToken,
        log_name: &str,
        command: &str,
        args: &[String],
        log_dir: &Path,
        log_sink: Option<&mut Vec<u8>>,
    ) -> Result<(), SpawnError>;
}

#[derive(Debug)]
pub enum SpawnError {
    Io(std::io::Error),
    NonZeroExit(i32),
    Cancelled,
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpawnError::Io(e) => write!(f, "failed to spawn child process: {e}"),
            SpawnError::NonZeroExit(code) => write!(f, "child process exited with status {code}"),
            SpawnError::Cancelled => write!(f, "execution was cancelled"),
        }
    }
}

impl std::error::Error for SpawnError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SpawnError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SpawnError {
    fn from(e: std::io::Error) -> Self {
        SpawnError::Io(e)
    }
}

/// Persists arbitrary log bytes for a job, independent of any particular
/// Execution. Used directly by [`crate::execution`] only on the
/// dependency-failure path, since a successful run's combined log is
/// already teed to disk by the `Spawner` itself.
#[async_trait]
pub trait LogWriter: Send + Sync {
    async fn write_log(&self, log_dir: &Path, log_name: &str, bytes: &[u8]) -> Result<(), std::io::Error>;
}

/// Best-effort notification. Adapters are expected to be fire-and-forget:
/// the caller never blocks an Execution on mail delivery.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_mail(&self, to: &str, subject: &str, body: &str);
}

/// The persistent job table: a flat `job_id -> JobSnapshot` map flushed to
/// disk as a point-in-time JSON snapshot.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn update(&self, f: Box<dyn FnOnce(&mut TaskList) + Send>);
    async fn sync(&self) -> Result<(), StoreError>;
    async fn load(&self) -> Result<TaskList, StoreError>;
}

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Serde(serde_json::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "store I/O error: {e}"),
            StoreError::Serde(e) => write!(f, "store (de)serialization error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(e) => Some(e),
            StoreError::Serde(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serde(e)
    }
}

/// The outbound half of the dependency protocol: hand a set of upstream
/// script invocations to the control plane for dispatch. The inbound half
/// (`resolve_dependency`) is implemented directly by
/// [`crate::scheduler::Scheduler`], which is the only thing holding the job
/// table the result needs to be routed through; see
/// [`DependencyResolver`] for the trait an adapter calls back through.
///
/// `job_id` is not part of the distilled contract (a real RPC binding would
/// carry the correlation back to the right node/job through its own wire
/// protocol); it is threaded through here explicitly so an in-process
/// adapter has something concrete to call `resolve_dependency` with.
#[async_trait]
pub trait DependencyTransport: Send + Sync {
    async fn push_dependencies(&self, job_id: &str, deps: &[Dependency], task_time: TaskTime, sync: bool) -> bool;
}

/// The inbound half of the dependency protocol, implemented by the
/// Scheduler and called by a `DependencyTransport` adapter once an upstream
/// script it dispatched has completed.
#[async_trait]
pub trait DependencyResolver: Send + Sync {
    async fn resolve_dependency(&self, job_id: JobId, log_bytes: Vec<u8>, task_time: TaskTime, err: String);
}

/// The inbound control-plane surface: add/stop/kill/delete/quick_start, as
/// implemented by [`crate::scheduler::Scheduler`]. Expressed as a trait so a
/// future RPC binding can depend on `Arc<dyn ControlPlane>` instead of the
/// concrete Scheduler.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn add(&self, job: crate::job::Job) -> Result<(), crate::error::SchedulerError>;
    async fn stop(&self, job_id: &str) -> Result<(), crate::error::SchedulerError>;
    async fn kill(&self, job_id: &str) -> Result<(), crate::error::SchedulerError>;
    async fn delete(&self, job_id: &str) -> Result<(), crate::error::SchedulerError>;
    async fn quick_start(&self, job: crate::job::Job) -> Result<Vec<u8>, crate::error::SchedulerError>;
}
