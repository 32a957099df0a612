//! The long-running per-job activity (§4.3): reads minute ticks, fires
//! matching Executions, and drains on cancellation.

use crate::config::Config;
use crate::context::Ports;
use crate::execution;
use crate::handle::JobHandle;
use crate::job::{Job, JobState};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Runs until `handle.cancel_loop` fires, then drains every live Execution
/// before returning. Each tick spawns its Execution onto `handle.executions`
/// (a panic inside one Execution surfaces only as an `Err` on its own
/// `JoinHandle`, isolated by `tokio::spawn`, and never reaches this loop).
pub async fn run(job: Arc<Job>, handle: Arc<JobHandle>, mut clock_in: mpsc::Receiver<DateTime<Utc>>, ports: Ports, config: Arc<Config>) {
    loop {
        tokio::select! {
            _ = handle.cancel_loop.cancelled() => break,
            tick = clock_in.recv() => {
                match tick {
                    Some(now) => {
                        if job.schedule.matches(&now) {
                            spawn_execution(&job, &handle, &ports, &config).await;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    let mut executions = handle.executions.lock().await;
    while let Some(joined) = executions.join_next().await {
        if let Err(join_err) = joined {
            log::warn!(target: "job_loop::run", "job {} execution panicked: {join_err}", job.id);
        }
    }
    drop(executions);

    job.set_state(JobState::Stopped);
    log::debug!(target: "job_loop::run", "job {} loop drained and stopped", job.id);
}

async fn spawn_execution(job: &Arc<Job>, handle: &Arc<JobHandle>, ports: &Ports, config: &Arc<Config>) {
    let cancel = handle.admit_execution().await;
    let job = job.clone();
    let handle_clone = handle.clone();
    let ports = ports.clone();
    let config = config.clone();
    handle
        .executions
        .lock()
        .await
        .spawn(async move {
            execution::run(job, handle_clone, cancel, ports, config, JobState::Scheduled, None).await;
        });
}
