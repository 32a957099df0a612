//! Dispatches "upstream" dependency scripts via the same `Spawner` used for
//! local jobs and calls `resolve_dependency` back in-process. This is what
//! makes the dependency-rendezvous tests deterministic without standing up
//! a real network: there is no peer node, only another invocation of the
//! same spawner, correlated back to the waiting job by the caller.

use crate::config::Config;
use crate::job::Dependency;
use crate::ports::{DependencyResolver, DependencyTransport, Spawner};
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct LoopbackTransport {
    spawner: Arc<dyn Spawner>,
    resolver: Arc<dyn DependencyResolver>,
    config: Arc<Config>,
}

impl LoopbackTransport {
    pub fn new(spawner: Arc<dyn Spawner>, resolver: Arc<dyn DependencyResolver>, config: Arc<Config>) -> Self {
        Self { spawner, resolver, config }
    }
}

async fn run_one(spawner: &Arc<dyn Spawner>, config: &Arc<Config>, task_time: i64, dep: &Dependency) -> (Vec<u8>, Option<String>) {
    let mut buffer = Vec::new();
    let log_name = format!("dep-{}-{task_time}.log", dep.command);
    let result = spawner
        .exec_script(CancellationToken::new(), &log_name, &dep.command, &dep.args, &config.log_dir, Some(&mut buffer))
        .await;
    (buffer, result.err().map(|e| e.to_string()))
}

async fn run_pipelined(spawner: &Arc<dyn Spawner>, config: &Arc<Config>, task_time: i64, deps: &[Dependency]) -> (Vec<u8>, String) {
    let mut combined = Vec::new();
    for dep in deps {
        let (bytes, err) = run_one(spawner, config, task_time, dep).await;
        combined.extend_from_slice(&bytes);
        if let Some(err) = err {
            return (combined, err);
        }
    }
    (combined, String::new())
}

async fn run_fan_out(spawner: &Arc<dyn Spawner>, config: &Arc<Config>, task_time: i64, deps: &[Dependency]) -> (Vec<u8>, String) {
    let results = join_all(deps.iter().map(|dep| run_one(spawner, config, task_time, dep))).await;
    let mut combined = Vec::new();
    let mut first_error = String::new();
    for (bytes, err) in results {
        combined.extend_from_slice(&bytes);
        if first_error.is_empty() {
            if let Some(err) = err {
                first_error = err;
            }
        }
    }
    (combined, first_error)
}

#[async_trait]
impl DependencyTransport for LoopbackTransport {
    async fn push_dependencies(&self, job_id: &str, deps: &[Dependency], task_time: i64, sync: bool) -> bool {
        let deps = deps.to_vec();
        let spawner = self.spawner.clone();
        let resolver = self.resolver.clone();
        let config = self.config.clone();
        let job_id = job_id.to_owned();

        tokio::spawn(async move {
            let (log_bytes, err) =
                if sync { run_pipelined(&spawner, &config, task_time, &deps).await } else { run_fan_out(&spawner, &config, task_time, &deps).await };
            resolver.resolve_dependency(job_id, log_bytes, task_time, err).await;
        });
        true
    }
}
