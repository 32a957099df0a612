//! One invocation of a job's command (§4.2): dependency wait, timeout
//! watchdog, spawn, and reporting.

use crate::config::Config;
use crate::context::Ports;
use crate::dependency::{self, DependencyError};
use crate::handle::JobHandle;
use crate::job::{Job, JobState, TimeoutPolicy};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Runs one Execution of `job` to completion.
///
/// Precondition: the caller already holds a slot in `handle`'s cancellation
/// ring (i.e. `cancel` came from [`JobHandle::admit_execution`]).
pub async fn run(
    job: Arc<Job>,
    handle: Arc<JobHandle>,
    cancel: CancellationToken,
    ports: Ports,
    config: Arc<Config>,
    state_on_completion: JobState,
    log_sink: Option<tokio::sync::oneshot::Sender<Vec<u8>>>,
) {
    let start = Utc::now();
    let task_time = start.timestamp();
    job.begin_execution();
    job.set_last_exec_time(start);

    let log_name = job.log_name();
    let mut log_buffer: Vec<u8> = Vec::new();

    if !job.dependencies.is_empty() {
        let wait = dependency::wait_depends(
            &cancel,
            &job.id,
            &handle,
            &job.dependencies,
            task_time,
            job.sync_dependencies,
            ports.dependencies.as_ref(),
        )
        .await;

        match wait {
            Ok(bytes) => log_buffer = bytes,
            Err(err) => {
                log::warn!(
                    target: "execution::run",
                    "job {} task_time {} dependency wait failed: {err}",
                    job.id,
                    task_time
                );
                append_dependency_failure_line(&mut log_buffer, &config.addr, &err);
                if let Err(io_err) = ports.log_writer.write_log(&config.log_dir, &log_name, &log_buffer).await {
                    log::warn!(target: "execution::run", "failed to flush dependency-failure log for job {}: {io_err}", job.id);
                }
                if job.mail_on_unexpected_exit {
                    send_mail_async(
                        ports.mailer.clone(),
                        job.mail_to.clone(),
                        format!("[{}] job {} dependency failure", config.addr, job.name),
                        err.to_string(),
                    );
                }
                finish(&job, &handle, state_on_completion, start);
                if let Err(sync_err) = ports.store.sync().await {
                    log::warn!(target: "execution::run", "store sync after job {} dependency failure failed: {sync_err}", job.id);
                }
                if let Some(sink) = log_sink {
                    let _ = sink.send(log_buffer);
                }
                return;
            }
        }
    }

    let done = Arc::new(AtomicBool::new(false));
    let watchdog = if job.timeout_secs > 0 {
        Some(spawn_timeout_watchdog(
            job.clone(),
            ports.mailer.clone(),
            config.clone(),
            cancel.clone(),
            done.clone(),
            Duration::from_secs(job.timeout_secs),
        ))
    } else {
        None
    };

    let spawn_result = ports
        .spawner
        .exec_script(
            cancel.clone(),
            &log_name,
            &job.command,
            &job.args,
            &config.log_dir,
            Some(&mut log_buffer),
        )
        .await;

    done.store(true, Ordering::SeqCst);
    if let Some(watchdog) = watchdog {
        watchdog.abort();
    }

    if let Err(ref spawn_err) = spawn_result {
        log::warn!(target: "execution::run", "job {} execution failed: {spawn_err}", job.id);
        if job.mail_on_unexpected_exit {
            send_mail_async(
                ports.mailer.clone(),
                job.mail_to.clone(),
                format!("[{}] job {} exited unexpectedly", config.addr, job.name),
                spawn_err.to_string(),
            );
        }
    }

    finish(&job, &handle, state_on_completion, start);

    if let Err(sync_err) = ports.store.sync().await {
        log::warn!(target: "execution::run", "store sync after job {} failed: {sync_err}", job.id);
    }

    if let Some(sink) = log_sink {
        let _ = sink.send(log_buffer);
    }
}

fn finish(job: &Job, _handle: &JobHandle, state_on_completion: JobState, start: chrono::DateTime<Utc>) {
    let elapsed = Utc::now() - start;
    job.set_last_cost_ns(elapsed.num_nanoseconds().unwrap_or(i64::MAX));
    job.end_execution(state_on_completion);
}

fn append_dependency_failure_line(buffer: &mut Vec<u8>, addr: &str, err: &DependencyError) {
    let line = format!("[{} {}]>> dependency wait failed: {err}\n", Utc::now().to_rfc3339(), addr);
    buffer.extend_from_slice(line.as_bytes());
}

fn send_mail_async(
    mailer: Arc<dyn crate::ports::Mailer>,
    to: String,
    subject: String,
    body: String,
) {
    tokio::spawn(async move {
        mailer.send_mail(&to, &subject, &body).await;
    });
}

fn spawn_timeout_watchdog(
    job: Arc<Job>,
    mailer: Arc<dyn crate::ports::Mailer>,
    config: Arc<Config>,
    cancel: CancellationToken,
    done: Arc<AtomicBool>,
    timeout: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        if done.load(Ordering::SeqCst) {
            return;
        }
        log::debug!(target: "execution::spawn_timeout_watchdog", "job {} timed out after {timeout:?}", job.id);
        match job.timeout_policy {
            TimeoutPolicy::None | TimeoutPolicy::Ignore => {}
            TimeoutPolicy::Mail => {
                send_mail_async(
                    mailer,
                    job.mail_to.clone(),
                    format!("[{}] job {} timed out", config.addr, job.name),
                    format!("execution exceeded {timeout:?}"),
                );
            }
            TimeoutPolicy::Kill => {
                cancel.cancel();
            }
            TimeoutPolicy::MailAndKill => {
                cancel.cancel();
                send_mail_async(
                    mailer,
                    job.mail_to.clone(),
                    format!("[{}] job {} timed out", config.addr, job.name),
                    format!("execution exceeded {timeout:?}"),
                );
            }
        }
    })
}
