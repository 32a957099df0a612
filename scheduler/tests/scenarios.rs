//! End-to-end scenario tests, one per SPEC_FULL.md §9 numbered scenario.

mod support;

use calendar::Schedule;
use cron_core::context::Ports;
use cron_core::execution;
use cron_core::handle::JobHandle;
use cron_core::job::{DepResult, Dependency, Job, JobState, TimeoutPolicy};
use cron_core::{Config, Scheduler};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use support::{InMemoryStore, MockSpawner, RecordingLogWriter, RecordingMailer, RecordingTransport};

async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

fn test_ports(spawner: Arc<MockSpawner>, transport: Arc<RecordingTransport>) -> Ports {
    Ports {
        spawner,
        log_writer: Arc::new(RecordingLogWriter::default()),
        mailer: Arc::new(RecordingMailer::default()),
        store: Arc::new(InMemoryStore::default()),
        dependencies: transport,
    }
}

fn every_minute_job(id: &str, command: &str, args: Vec<&str>) -> Job {
    let mut job = Job::new(
        id,
        format!("{id}-job"),
        Schedule::from_str("* * * * *").unwrap(),
        "* * * * *",
        command,
        args.into_iter().map(str::to_owned).collect(),
    );
    job.max_concurrent = 1;
    job
}

#[tokio::test(start_paused = true)]
async fn scenario_1_bare_tick_fires_on_match() {
    let spawner = Arc::new(MockSpawner::default());
    let transport = Arc::new(RecordingTransport::default());
    let ports = test_ports(spawner.clone(), transport);
    let scheduler = Arc::new(Scheduler::new(ports, Arc::new(Config::default())));

    let job = every_minute_job("1", "echo", vec!["A"]);
    scheduler.add(job).await.expect("add should succeed");

    // The clock task's very first tick can race the `add` above, so advance
    // a full period to guarantee at least one fresh tick lands after the
    // job is in the table.
    tokio::time::advance(Duration::from_secs(60)).await;
    settle().await;

    let invocations = spawner.invocations.lock().await;
    assert_eq!(invocations.len(), 1);
    assert_eq!(invocations[0].command, "echo");
    assert_eq!(invocations[0].args, vec!["A".to_owned()]);
    assert_eq!(invocations[0].log_name, "1-job-1.log");
}

#[tokio::test(start_paused = true)]
async fn scenario_2_timeout_kill() {
    let spawner = Arc::new(MockSpawner::default());
    let mut job = every_minute_job("2", "sleep", vec!["10"]);
    job.timeout_secs = 1;
    job.timeout_policy = TimeoutPolicy::Kill;
    let job = Arc::new(job);

    let (handle, _clock_rx) = JobHandle::new(job.max_concurrent);
    let handle = Arc::new(handle);
    let cancel = handle.admit_execution().await;

    let ports = test_ports(spawner.clone(), Arc::new(RecordingTransport::default()));
    let config = Arc::new(Config::default());

    let run = tokio::spawn(execution::run(job.clone(), handle.clone(), cancel, ports, config, JobState::Scheduled, None));

    tokio::time::advance(Duration::from_secs(1)).await;
    settle().await;
    run.await.expect("execution task should not panic");

    assert_eq!(spawner.invocations.lock().await.len(), 1);
    assert_eq!(job.running_count(), 0);
    assert_eq!(job.state(), JobState::Scheduled);
}

#[tokio::test(start_paused = true)]
async fn scenario_3_concurrency_ceiling() {
    let spawner = Arc::new(MockSpawner::default());
    let mut job = every_minute_job("3", "sleep", vec!["60"]);
    job.max_concurrent = 2;
    let job = Arc::new(job);

    let (handle, _clock_rx) = JobHandle::new(job.max_concurrent);
    let handle = Arc::new(handle);
    let ports = test_ports(spawner.clone(), Arc::new(RecordingTransport::default()));
    let config = Arc::new(Config::default());

    let mut cancels = Vec::new();
    for _ in 0..3 {
        let cancel = handle.admit_execution().await;
        cancels.push(cancel.clone());
        tokio::spawn(execution::run(job.clone(), handle.clone(), cancel, ports.clone(), config.clone(), JobState::Scheduled, None));
        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;
    }

    // The tick-M execution (the first admitted) was evicted by the third
    // admit_execution call and should have observed cancellation.
    assert!(cancels[0].is_cancelled());
    assert!(!cancels[1].is_cancelled());
    assert!(!cancels[2].is_cancelled());
    assert!(job.running_count() <= job.max_concurrent);
}

#[tokio::test]
async fn scenario_4_dependency_rendezvous_fan_out() {
    let (handle, _clock_rx) = JobHandle::new(4);
    let handle = Arc::new(handle);
    let task_time = 1_700_000_000_i64;
    let cancel = tokio_util::sync::CancellationToken::new();
    let deps = vec![
        Dependency { from_node: "n1".into(), dest_node: "n2".into(), command: "d1".into(), args: vec![] },
        Dependency { from_node: "n1".into(), dest_node: "n3".into(), command: "d2".into(), args: vec![] },
    ];
    let transport = Arc::new(RecordingTransport::default());

    let wait = tokio::spawn({
        let handle = handle.clone();
        let transport = transport.clone();
        let cancel = cancel.clone();
        let deps = deps.clone();
        async move { cron_core::dependency::wait_depends(&cancel, "job-4", &handle, &deps, task_time, false, transport.as_ref()).await }
    });

    // Let `wait_depends` register its sink and call `push_dependencies`
    // before we simulate the fanned-out dependencies completing.
    settle().await;
    let pushed = transport.pushed.lock().await.clone();
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0], ("job-4".to_owned(), deps.clone(), task_time, false));

    let sink = handle.dep_waiters.lock().await.get(&task_time).cloned().expect("wait should have registered a sink");
    sink.send_timeout(
        DepResult { task_time, log_bytes: b"combined output".to_vec(), error_string: String::new(), done: true },
        Duration::from_secs(5),
    )
    .await
    .expect("sink should accept the result");

    let result = wait.await.expect("wait task should not panic");
    assert_eq!(result.unwrap(), b"combined output".to_vec());
    assert!(handle.dep_waiters.lock().await.is_empty());
}

#[tokio::test]
async fn scenario_5_dependency_rendezvous_wrong_task_time_is_routed_correctly() {
    let (handle, _clock_rx) = JobHandle::new(4);
    let handle = Arc::new(handle);
    let t1 = 1_700_000_000_i64;
    let t2 = 1_700_000_060_i64;
    let cancel = tokio_util::sync::CancellationToken::new();
    let transport = Arc::new(RecordingTransport::default());
    let deps = vec![Dependency { from_node: "n1".into(), dest_node: "n2".into(), command: "d1".into(), args: vec![] }];

    let wait_e1 = tokio::spawn({
        let handle = handle.clone();
        let transport = transport.clone();
        let cancel = cancel.clone();
        let deps = deps.clone();
        async move { cron_core::dependency::wait_depends(&cancel, "job-5", &handle, &deps, t1, false, transport.as_ref()).await }
    });
    let wait_e2 = tokio::spawn({
        let handle = handle.clone();
        let transport = transport.clone();
        let cancel = cancel.clone();
        let deps = deps.clone();
        async move { cron_core::dependency::wait_depends(&cancel, "job-5", &handle, &deps, t2, false, transport.as_ref()).await }
    });

    settle().await;
    assert_eq!(handle.dep_waiters.lock().await.len(), 2);

    // Inject T2's result first, then T1's, and confirm each wait is
    // released by its own task_time regardless of the interleaving.
    for (task_time, payload) in [(t2, b"out-t2".to_vec()), (t1, b"out-t1".to_vec())] {
        let sink = handle.dep_waiters.lock().await.get(&task_time).cloned();
        if let Some(sink) = sink {
            let _ = sink
                .send_timeout(
                    DepResult { task_time, log_bytes: payload, error_string: String::new(), done: true },
                    Duration::from_secs(5),
                )
                .await;
        }
    }

    let result_e1 = wait_e1.await.expect("wait_e1 task should not panic");
    let result_e2 = wait_e2.await.expect("wait_e2 task should not panic");
    assert_eq!(result_e1.unwrap(), b"out-t1".to_vec());
    assert_eq!(result_e2.unwrap(), b"out-t2".to_vec());
    assert!(handle.dep_waiters.lock().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn scenario_6_stop_drains_live_executions() {
    let spawner = Arc::new(MockSpawner::default());
    let transport = Arc::new(RecordingTransport::default());
    let ports = test_ports(spawner.clone(), transport);
    let scheduler = Arc::new(Scheduler::new(ports, Arc::new(Config::default())));

    let job = every_minute_job("6", "sleep", vec!["5"]);
    scheduler.add(job).await.expect("add should succeed");

    tokio::time::advance(Duration::from_secs(60)).await;
    settle().await;

    let scheduler_clone = scheduler.clone();
    let stop = tokio::spawn(async move { scheduler_clone.stop("6").await });

    // `stop` must not resolve until the 5s sleep finishes.
    settle().await;
    assert!(!stop.is_finished());

    tokio::time::advance(Duration::from_secs(5)).await;
    settle().await;

    stop.await.expect("stop task should not panic").expect("stop should succeed");
}
