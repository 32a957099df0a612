//! The persistent `Job` definition and its observable runtime counters.
//!
//! Every field besides the counters is fixed at construction time; the
//! counters (`state`, `running_count`, `last_exec_time`, `last_cost_ns`) are
//! mutated concurrently by every live Execution, so they live behind atomics
//! (or a short-lived std `Mutex` for the timestamp, never held across an
//! `.await`).

use calendar::Schedule;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Mutex;

pub type JobId = String;

/// Seconds since the Unix epoch at which an Execution began; the
/// correlation key for dependency results.
pub type TaskTime = i64;

/// What to do when a job's command outlives `timeout_secs`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeoutPolicy {
    None,
    Mail,
    Kill,
    MailAndKill,
    Ignore,
}

/// `state == Running` iff `running_count > 0`; `state == Scheduled` iff the
/// Job loop is live and `running_count == 0`; `state == Stopped` iff no
/// [`crate::handle::JobHandle`] exists for this job.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    Stopped = 0,
    Scheduled = 1,
    Running = 2,
}

impl JobState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => JobState::Stopped,
            1 => JobState::Scheduled,
            2 => JobState::Running,
            _ => unreachable!("JobState only ever stores 0..=2"),
        }
    }
}

/// A static description of an upstream script dispatched via
/// `push_dependencies`. See [`crate::dependency`] for the rendezvous that
/// correlates its result back to the waiting Execution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub from_node: String,
    pub dest_node: String,
    pub command: String,
    pub args: Vec<String>,
}

/// The outcome of a Dependency, reported back via `resolve_dependency`.
#[derive(Clone, Debug)]
pub struct DepResult {
    pub task_time: TaskTime,
    pub log_bytes: Vec<u8>,
    pub error_string: String,
    pub done: bool,
}

/// A persistent scheduling definition: schedule, command, and policy, plus
/// the observable counters every live Execution mutates.
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub schedule: Schedule,
    /// The textual form `schedule` was parsed from, kept only so
    /// `snapshot`/`JobSnapshot::into_job` can round-trip through storage
    /// without `calendar::Schedule` needing to be `Serialize` itself.
    pub schedule_text: String,
    pub command: String,
    pub args: Vec<String>,
    pub timeout_secs: u64,
    pub timeout_policy: TimeoutPolicy,
    pub max_concurrent: usize,
    pub sync_dependencies: bool,
    pub mail_to: String,
    pub mail_on_unexpected_exit: bool,
    pub dependencies: Vec<Dependency>,

    state: AtomicU8,
    running_count: AtomicUsize,
    last_exec_time: Mutex<Option<DateTime<Utc>>>,
    last_cost_ns: AtomicI64,
}

impl Job {
    pub fn new(
        id: impl Into<JobId>,
        name: impl Into<String>,
        schedule: Schedule,
        schedule_text: impl Into<String>,
        command: impl Into<String>,
        args: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            schedule,
            schedule_text: schedule_text.into(),
            command: command.into(),
            args,
            timeout_secs: 0,
            timeout_policy: TimeoutPolicy::None,
            max_concurrent: 1,
            sync_dependencies: false,
            mail_to: String::new(),
            mail_on_unexpected_exit: false,
            dependencies: Vec::new(),
            state: AtomicU8::new(JobState::Stopped as u8),
            running_count: AtomicUsize::new(0),
            last_exec_time: Mutex::new(None),
            last_cost_ns: AtomicI64::new(0),
        }
    }

    pub fn log_name(&self) -> String {
        format!("{}-{}.log", self.name, self.id)
    }

    pub fn state(&self) -> JobState {
        JobState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn set_state(&self, state: JobState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub fn running_count(&self) -> usize {
        self.running_count.load(Ordering::SeqCst)
    }

    pub(crate) fn begin_execution(&self) {
        self.running_count.fetch_add(1, Ordering::SeqCst);
        self.set_state(JobState::Running);
    }

    /// Returns the remaining count after the decrement, matching the
    /// algorithm's step 7 ("if counter reached zero restore state").
    pub(crate) fn end_execution(&self, state_on_completion: JobState) -> usize {
        let remaining = self.running_count.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining == 0 {
            self.set_state(state_on_completion);
        }
        remaining
    }

    pub fn last_exec_time(&self) -> Option<DateTime<Utc>> {
        *self.last_exec_time.lock().expect("last_exec_time mutex poisoned")
    }

    pub(crate) fn set_last_exec_time(&self, at: DateTime<Utc>) {
        *self.last_exec_time.lock().expect("last_exec_time mutex poisoned") = Some(at);
    }

    pub fn last_cost_ns(&self) -> i64 {
        self.last_cost_ns.load(Ordering::SeqCst)
    }

    pub(crate) fn set_last_cost_ns(&self, ns: i64) {
        self.last_cost_ns.store(ns, Ordering::SeqCst);
    }

    /// A snapshot of the persisted fields, suitable for `JobStore`.
    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            schedule: self.schedule_text.clone(),
            command: self.command.clone(),
            args: self.args.clone(),
            timeout_secs: self.timeout_secs,
            timeout_policy: self.timeout_policy,
            max_concurrent: self.max_concurrent,
            sync_dependencies: self.sync_dependencies,
            mail_to: self.mail_to.clone(),
            mail_on_unexpected_exit: self.mail_on_unexpected_exit,
            dependencies: self.dependencies.clone(),
            state: self.state() as u8,
        }
    }
}

/// The on-disk shape of a [`Job`]: its persisted fields plus the `state` it
/// had at snapshot time, used to re-arm jobs on boot. The schedule is kept
/// as its original textual form since `calendar::Schedule` is not `Serialize`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub name: String,
    pub schedule: String,
    pub command: String,
    pub args: Vec<String>,
    pub timeout_secs: u64,
    pub timeout_policy: TimeoutPolicy,
    pub max_concurrent: usize,
    pub sync_dependencies: bool,
    pub mail_to: String,
    pub mail_on_unexpected_exit: bool,
    pub dependencies: Vec<Dependency>,
    pub state: u8,
}

impl JobSnapshot {
    /// Rebuilds a `Job`, re-parsing the schedule from its textual form.
    /// Returns `None` if the stored schedule string is no longer parseable
    /// (a corrupt or hand-edited store file).
    pub fn into_job(self) -> Option<Job> {
        let schedule = Schedule::from_str(&self.schedule).ok()?;
        Some(Job {
            id: self.id,
            name: self.name,
            schedule,
            schedule_text: self.schedule,
            command: self.command,
            args: self.args,
            timeout_secs: self.timeout_secs,
            timeout_policy: self.timeout_policy,
            max_concurrent: self.max_concurrent,
            sync_dependencies: self.sync_dependencies,
            mail_to: self.mail_to,
            mail_on_unexpected_exit: self.mail_on_unexpected_exit,
            dependencies: self.dependencies,
            state: AtomicU8::new(self.state),
            running_count: AtomicUsize::new(0),
            last_exec_time: Mutex::new(None),
            last_cost_ns: AtomicI64::new(0),
        })
    }
}

pub type TaskList = HashMap<JobId, JobSnapshot>;
