//! The Scheduler (§4.5): owns the job table, routes commands, and fans out
//! the minute clock.

use crate::config::Config;
use crate::context::Ports;
use crate::error::SchedulerError;
use crate::handle::JobHandle;
use crate::job::{Job, JobId, JobState};
use crate::ports::{ControlPlane, DependencyResolver};
use async_trait::async_trait;
use chrono::Utc;
use fxhash::FxHasher32;
use futures::future::join_all;
use std::collections::HashMap;
use std::hash::BuildHasherDefault;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;

/// Depth of the inbound command queue (§4.5: "bounded inbound queue").
const COMMAND_QUEUE_CAPACITY: usize = 64;

/// Soft per-recipient timeout for the minute-clock fan-out (§4.3/§5).
const CLOCK_FANOUT_TIMEOUT: Duration = Duration::from_secs(2);

struct JobEntry {
    job: Arc<Job>,
    handle: Option<Arc<JobHandle>>,
    loop_task: Option<JoinHandle<()>>,
}

/// Keyed by `JobId`, hashed with the same fast non-cryptographic hasher the
/// original job table used for its own lookup maps.
type JobTable = Arc<RwLock<HashMap<JobId, JobEntry, BuildHasherDefault<FxHasher32>>>>;

enum Command {
    Add(Job, oneshot::Sender<Result<(), SchedulerError>>),
    Stop(JobId, oneshot::Sender<Result<(), SchedulerError>>),
    Kill(JobId, oneshot::Sender<Result<(), SchedulerError>>),
    Delete(JobId, oneshot::Sender<Result<(), SchedulerError>>),
    QuickStart(Job, oneshot::Sender<Result<Vec<u8>, SchedulerError>>),
    ResolveDependency(JobId, Vec<u8>, i64, String),
}

/// Owns the job table and the background tasks driving it. Dropping a
/// `Scheduler` aborts its dispatch and clock tasks; it does not drain live
/// jobs (use `stop`/`kill` explicitly for a graceful shutdown).
pub struct Scheduler {
    jobs: JobTable,
    commands: mpsc::Sender<Command>,
    dispatch_task: JoinHandle<()>,
    clock_task: JoinHandle<()>,
}

impl Scheduler {
    pub fn new(ports: Ports, config: Arc<Config>) -> Self {
        let jobs: JobTable = Arc::new(RwLock::new(HashMap::with_hasher(BuildHasherDefault::default())));
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);

        let dispatch_task = tokio::spawn(run_dispatcher(jobs.clone(), ports, config, rx));
        let clock_task = tokio::spawn(run_clock(jobs.clone()));

        Self { jobs, commands: tx, dispatch_task, clock_task }
    }

    /// Iterates the persisted job table and re-arms every job whose
    /// persisted `state != Stopped` (§4.5 startup).
    pub async fn restore(&self, store: &dyn crate::ports::JobStore) -> Result<(), SchedulerError> {
        let snapshot = store.load().await.map_err(|e| SchedulerError::Store(e.to_string()))?;
        for (id, entry) in snapshot {
            if entry.state == JobState::Stopped as u8 {
                continue;
            }
            if let Some(job) = entry.into_job() {
                if let Err(err) = self.add(job).await {
                    log::warn!(target: "scheduler::Scheduler::restore", "failed to re-arm job {id}: {err}");
                }
            } else {
                log::warn!(target: "scheduler::Scheduler::restore", "job {id} has an unparseable stored schedule, skipping");
            }
        }
        Ok(())
    }

    async fn call<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<R, SchedulerError>>) -> Command,
    ) -> Result<R, SchedulerError> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(make(tx)).await.map_err(|_| SchedulerError::ChannelClosed)?;
        rx.await.map_err(|_| SchedulerError::ChannelClosed)?
    }

    pub async fn add(&self, job: Job) -> Result<(), SchedulerError> {
        self.call(|reply| Command::Add(job, reply)).await
    }

    pub async fn stop(&self, job_id: &str) -> Result<(), SchedulerError> {
        let job_id = job_id.to_owned();
        self.call(|reply| Command::Stop(job_id, reply)).await
    }

    pub async fn kill(&self, job_id: &str) -> Result<(), SchedulerError> {
        let job_id = job_id.to_owned();
        self.call(|reply| Command::Kill(job_id, reply)).await
    }

    pub async fn delete(&self, job_id: &str) -> Result<(), SchedulerError> {
        let job_id = job_id.to_owned();
        self.call(|reply| Command::Delete(job_id, reply)).await
    }

    pub async fn quick_start(&self, job: Job) -> Result<Vec<u8>, SchedulerError> {
        self.call(|reply| Command::QuickStart(job, reply)).await
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.dispatch_task.abort();
        self.clock_task.abort();
    }
}

#[async_trait]
impl ControlPlane for Scheduler {
    async fn add(&self, job: Job) -> Result<(), SchedulerError> {
        Scheduler::add(self, job).await
    }
    async fn stop(&self, job_id: &str) -> Result<(), SchedulerError> {
        Scheduler::stop(self, job_id).await
    }
    async fn kill(&self, job_id: &str) -> Result<(), SchedulerError> {
        Scheduler::kill(self, job_id).await
    }
    async fn delete(&self, job_id: &str) -> Result<(), SchedulerError> {
        Scheduler::delete(self, job_id).await
    }
    async fn quick_start(&self, job: Job) -> Result<Vec<u8>, SchedulerError> {
        Scheduler::quick_start(self, job).await
    }
}

#[async_trait]
impl DependencyResolver for Scheduler {
    /// The inbound half of §4.4: looks up the JobHandle, then the sink for
    /// `task_time`, and delivers the result with a 5-second send timeout.
    async fn resolve_dependency(&self, job_id: JobId, log_bytes: Vec<u8>, task_time: i64, err: String) {
        let _ = self.commands.send(Command::ResolveDependency(job_id, log_bytes, task_time, err)).await;
    }
}

async fn run_dispatcher(jobs: JobTable, ports: Ports, config: Arc<Config>, mut rx: mpsc::Receiver<Command>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::Add(job, reply) => {
                let _ = reply.send(handle_add(&jobs, &ports, &config, job).await);
            }
            Command::Stop(job_id, reply) => {
                // Drains off the dispatcher (see `handle_stop`): a stopped
                // job's in-flight Execution may still be parked in
                // `wait_depends`, and only a `Command::ResolveDependency`
                // arriving on this same channel can release it. Awaiting
                // the drain here would starve that command and stall the
                // whole scheduler until the dependency's 3600s ceiling.
                handle_stop(&jobs, job_id, reply).await;
            }
            Command::Kill(job_id, reply) => {
                let _ = reply.send(handle_kill(&jobs, &job_id).await);
            }
            Command::Delete(job_id, reply) => {
                let _ = reply.send(handle_delete(&jobs, &ports, &job_id).await);
            }
            Command::QuickStart(job, reply) => {
                let _ = reply.send(handle_quick_start(&jobs, &ports, &config, job).await);
            }
            Command::ResolveDependency(job_id, log_bytes, task_time, err) => {
                handle_resolve_dependency(&jobs, job_id, log_bytes, task_time, err).await;
            }
        }
    }
}

async fn handle_add(jobs: &JobTable, ports: &Ports, config: &Arc<Config>, job: Job) -> Result<(), SchedulerError> {
    let mut table = jobs.write().await;
    if let Some(existing) = table.get(&job.id) {
        if existing.job.state() != JobState::Stopped {
            return Err(SchedulerError::Duplicate(job.id));
        }
    }

    let job = Arc::new(job);
    job.set_state(JobState::Scheduled);

    let (handle, clock_rx) = JobHandle::new(job.max_concurrent);
    let handle = Arc::new(handle);

    let loop_task = tokio::spawn(crate::job_loop::run(job.clone(), handle.clone(), clock_rx, ports.clone(), config.clone()));

    table.insert(job.id.clone(), JobEntry { job, handle: Some(handle), loop_task: Some(loop_task) });
    log::info!(target: "scheduler::handle_add", "job added and scheduled");
    Ok(())
}

/// Takes `job_id`'s `handle`/`loop_task` out of the table (leaving the
/// `Job` entry itself in place) and cancels `cancel_loop`. Returns `None`
/// for an unknown or already-stopped job — both are a no-op to the caller.
async fn take_and_cancel_loop(jobs: &JobTable, job_id: &JobId) -> Option<(Arc<JobHandle>, Option<JoinHandle<()>>)> {
    let mut table = jobs.write().await;
    let entry = table.get_mut(job_id)?;
    let handle = entry.handle.take()?;
    let loop_task = entry.loop_task.take();
    handle.cancel_loop.cancel();
    Some((handle, loop_task))
}

/// Cancels the Job loop and replies once its drain completes — but not
/// inline on the dispatcher. A job's in-flight Execution may still be
/// parked in `wait_depends`, unblockable except by a
/// `Command::ResolveDependency` arriving on this same channel, so the
/// drain is awaited on a spawned task instead, leaving the dispatcher free
/// to keep servicing other commands (including the very resolve the
/// Execution may be waiting on).
///
/// The table's `entry.handle` is left in place (only `loop_task` is taken)
/// for as long as the drain is running, since `handle_resolve_dependency`
/// looks the `JobHandle` up by `job_id` through this same table; clearing
/// it eagerly would make every dependency result for the stopping job look
/// like a "lost result" for the rest of the drain. It's cleared only once
/// the Job loop has actually finished.
async fn handle_stop(jobs: &JobTable, job_id: JobId, reply: oneshot::Sender<Result<(), SchedulerError>>) {
    let found = {
        let mut table = jobs.write().await;
        match table.get_mut(&job_id) {
            Some(entry) if entry.handle.is_some() => {
                let handle = entry.handle.clone().expect("checked Some above");
                let loop_task = entry.loop_task.take();
                handle.cancel_loop.cancel();
                Some((handle, loop_task))
            }
            _ => None,
        }
    };

    let Some((_handle, loop_task)) = found else {
        log::warn!(target: "scheduler::handle_stop", "stop for unknown or already-stopped job {job_id}, treating as no-op");
        let _ = reply.send(Ok(()));
        return;
    };

    let jobs = jobs.clone();
    tokio::spawn(async move {
        if let Some(loop_task) = loop_task {
            if let Err(join_err) = loop_task.await {
                log::warn!(target: "scheduler::handle_stop", "job {job_id} loop task panicked: {join_err}");
            }
        }
        if let Some(entry) = jobs.write().await.get_mut(&job_id) {
            entry.handle = None;
        }
        let _ = reply.send(Ok(()));
    });
}

async fn handle_kill(jobs: &JobTable, job_id: &JobId) -> Result<(), SchedulerError> {
    let table = jobs.read().await;
    match table.get(job_id) {
        Some(entry) => {
            if let Some(handle) = &entry.handle {
                handle.cancel_all_executions().await;
            }
            Ok(())
        }
        None => {
            log::warn!(target: "scheduler::handle_kill", "kill for unknown job {job_id}, treating as no-op");
            Ok(())
        }
    }
}

async fn handle_delete(jobs: &JobTable, ports: &Ports, job_id: &JobId) -> Result<(), SchedulerError> {
    ports
        .store
        .update({
            let job_id = job_id.clone();
            Box::new(move |list| {
                list.remove(&job_id);
            })
        })
        .await;

    // delete = kill + stop, then drop the table entry entirely. `kill` runs
    // first and cancels every live Execution's own token directly, so any
    // dependency wait unblocks via its `cancel` branch rather than waiting
    // on a `resolve_dependency` command — draining inline here does not
    // reintroduce the dispatcher stall `handle_stop` avoids.
    let _ = handle_kill(jobs, job_id).await;
    if let Some((_handle, loop_task)) = take_and_cancel_loop(jobs, job_id).await {
        if let Some(loop_task) = loop_task {
            if let Err(join_err) = loop_task.await {
                log::warn!(target: "scheduler::handle_delete", "job {job_id} loop task panicked: {join_err}");
            }
        }
    }
    jobs.write().await.remove(job_id);
    Ok(())
}

async fn handle_quick_start(jobs: &JobTable, ports: &Ports, config: &Arc<Config>, job: Job) -> Result<Vec<u8>, SchedulerError> {
    let job = Arc::new(job);

    let handle = {
        let table = jobs.read().await;
        match table.get(&job.id) {
            Some(entry) if entry.handle.is_some() => entry.handle.clone().unwrap(),
            _ => Arc::new(JobHandle::new(job.max_concurrent).0),
        }
    };

    let cancel = handle.admit_execution().await;
    let (tx, rx) = oneshot::channel();

    handle
        .executions
        .lock()
        .await
        .spawn(crate::execution::run(job, handle.clone(), cancel, ports.clone(), config.clone(), JobState::Stopped, Some(tx)));

    rx.await.map_err(|_| SchedulerError::ChannelClosed)
}

async fn handle_resolve_dependency(jobs: &JobTable, job_id: JobId, log_bytes: Vec<u8>, task_time: i64, err: String) {
    let handle = {
        let table = jobs.read().await;
        table.get(&job_id).and_then(|entry| entry.handle.clone())
    };

    let Some(handle) = handle else {
        log::warn!(target: "scheduler::handle_resolve_dependency", "resolve_dependency for unknown/stopped job {job_id}, dropping");
        return;
    };

    let sink = handle.dep_waiters.lock().await.remove(&task_time);
    let Some(sink) = sink else {
        log::warn!(target: "scheduler::handle_resolve_dependency", "lost result: job {job_id} task_time {task_time} has no waiter");
        return;
    };

    let result = crate::job::DepResult { task_time, log_bytes, error_string: err, done: true };
    if sink.send_timeout(result, crate::dependency::RESOLVE_SEND_TIMEOUT).await.is_err() {
        log::warn!(target: "scheduler::handle_resolve_dependency", "dropped result for job {job_id} task_time {task_time}: send timed out or waiter gone");
    }
}

async fn run_clock(jobs: JobTable) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let now = Utc::now();
        let table = jobs.read().await;
        let sends = table.values().filter_map(|entry| entry.handle.as_ref()).map(|handle| {
            let tx = handle.clock_in.clone();
            async move {
                if tx.send_timeout(now, CLOCK_FANOUT_TIMEOUT).await.is_err() {
                    log::debug!(target: "scheduler::run_clock", "clock tick missed by a busy job loop");
                }
            }
        });
        join_all(sends).await;
    }
}
