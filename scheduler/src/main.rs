use async_trait::async_trait;
use cron_core::adapters::{FileLogWriter, JsonFileStore, LoggingMailer, LoopbackTransport, ProcessSpawner};
use cron_core::ports::DependencyResolver;
use cron_core::{Config, Job, Ports, Scheduler};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

/// Resolves dependency callbacks by forwarding to whatever is later placed
/// in `inner` — a small piece of wiring glue needed because
/// `LoopbackTransport` wants a `DependencyResolver` to call back on, but the
/// only thing that implements it (`Scheduler`) doesn't exist until after
/// its `Ports` (which embed the transport) are built.
struct DeferredResolver(Arc<OnceCell<Arc<dyn DependencyResolver>>>);

#[async_trait]
impl DependencyResolver for DeferredResolver {
    async fn resolve_dependency(&self, job_id: String, log_bytes: Vec<u8>, task_time: i64, err: String) {
        if let Some(resolver) = self.0.get() {
            resolver.resolve_dependency(job_id, log_bytes, task_time, err).await;
        } else {
            log::warn!(target: "cron_core_demo::DeferredResolver", "dropped a dependency result: scheduler not wired up yet");
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = Arc::new(Config::from_env());
    let spawner = Arc::new(ProcessSpawner::new());
    let store = Arc::new(JsonFileStore::new("jobs.json"));

    let resolver_cell: Arc<OnceCell<Arc<dyn DependencyResolver>>> = Arc::new(OnceCell::new());
    let dependencies = Arc::new(LoopbackTransport::new(
        spawner.clone(),
        Arc::new(DeferredResolver(resolver_cell.clone())),
        config.clone(),
    ));

    let ports = Ports {
        spawner,
        log_writer: Arc::new(FileLogWriter::new()),
        mailer: Arc::new(LoggingMailer::new()),
        store: store.clone(),
        dependencies,
    };
    let scheduler = Arc::new(Scheduler::new(ports, config));
    let _ = resolver_cell.set(scheduler.clone() as Arc<dyn DependencyResolver>);

    if let Err(e) = scheduler.restore(store.as_ref()).await {
        log::warn!(target: "cron_core_demo::main", "failed to restore persisted jobs: {e}");
    }

    let job = Job::new("1", "hello-world", "* * * * *".parse().unwrap(), "* * * * *", "echo", vec!["Hello World!".to_owned()]);
    if let Err(e) = scheduler.add(job).await {
        log::warn!(target: "cron_core_demo::main", "failed to add hello-world job: {e}");
    }

    tokio::time::sleep(Duration::from_secs(180)).await;
    if let Err(e) = scheduler.stop("1").await {
        log::warn!(target: "cron_core_demo::main", "failed to stop hello-world job: {e}");
    }
}
