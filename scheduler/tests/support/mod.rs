//! Deterministic test doubles for the five ports, used by the end-to-end
//! scenario tests. None of these touch the filesystem or the network; the
//! "sleep" and "fail" commands a [`MockSpawner`] understands are enough to
//! drive every scenario in SPEC_FULL.md §9 under `tokio::time::pause`.

use async_trait::async_trait;
use cron_core::job::TaskList;
use cron_core::ports::{DependencyTransport, JobStore, LogWriter, Mailer, SpawnError, Spawner, StoreError};
use cron_core::Dependency;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub command: String,
    pub args: Vec<String>,
    pub log_name: String,
}

/// Understands three fake commands so tests don't fork real processes:
/// `echo` (succeeds immediately, echoing `args` into the log sink),
/// `sleep` (sleeps `args[0]` seconds on the virtual clock, cancellable),
/// and `fail` (always returns a non-zero exit).
#[derive(Default)]
pub struct MockSpawner {
    pub invocations: Arc<Mutex<Vec<Invocation>>>,
}

#[async_trait]
impl Spawner for MockSpawner {
    async fn exec_script(
        &self,
        cancel: CancellationToken,
        log_name: &str,
        command: &str,
        args: &[String],
        _log_dir: &Path,
        log_sink: Option<&mut Vec<u8>>,
    ) -> Result<(), SpawnError> {
        self.invocations.lock().await.push(Invocation {
            command: command.to_owned(),
            args: args.to_vec(),
            log_name: log_name.to_owned(),
        });

        match command {
            "sleep" => {
                let secs: u64 = args.first().and_then(|s| s.parse().ok()).unwrap_or(0);
                tokio::select! {
                    _ = cancel.cancelled() => Err(SpawnError::Cancelled),
                    _ = tokio::time::sleep(Duration::from_secs(secs)) => Ok(()),
                }
            }
            "fail" => Err(SpawnError::NonZeroExit(1)),
            _ => {
                if let Some(sink) = log_sink {
                    sink.extend_from_slice(args.join(" ").as_bytes());
                }
                Ok(())
            }
        }
    }
}

#[derive(Default)]
pub struct RecordingLogWriter {
    pub writes: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
}

#[async_trait]
impl LogWriter for RecordingLogWriter {
    async fn write_log(&self, _log_dir: &Path, log_name: &str, bytes: &[u8]) -> Result<(), std::io::Error> {
        self.writes.lock().await.push((log_name.to_owned(), bytes.to_vec()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Arc<Mutex<Vec<(String, String, String)>>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_mail(&self, to: &str, subject: &str, body: &str) {
        self.sent.lock().await.push((to.to_owned(), subject.to_owned(), body.to_owned()));
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<TaskList>,
    pub sync_count: Arc<Mutex<usize>>,
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn update(&self, f: Box<dyn FnOnce(&mut TaskList) + Send>) {
        let mut state = self.state.lock().await;
        f(&mut state);
    }

    async fn sync(&self) -> Result<(), StoreError> {
        *self.sync_count.lock().await += 1;
        Ok(())
    }

    async fn load(&self) -> Result<TaskList, StoreError> {
        Ok(self.state.lock().await.clone())
    }
}

/// Records every `push_dependencies` call but never auto-resolves; tests
/// inject `resolve_dependency` calls directly on the `Scheduler` in
/// whatever order the scenario needs.
#[derive(Default)]
pub struct RecordingTransport {
    pub pushed: Arc<Mutex<Vec<(String, Vec<Dependency>, i64, bool)>>>,
}

#[async_trait]
impl DependencyTransport for RecordingTransport {
    async fn push_dependencies(&self, job_id: &str, deps: &[Dependency], task_time: i64, sync: bool) -> bool {
        self.pushed.lock().await.push((job_id.to_owned(), deps.to_vec(), task_time, sync));
        true
    }
}
