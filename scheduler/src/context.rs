//! Bundles the five external ports behind a single handle so Execution and
//! Job-loop code don't have to thread five separate `Arc`s around.

use crate::ports::{DependencyTransport, JobStore, LogWriter, Mailer, Spawner};
use std::sync::Arc;

#[derive(Clone)]
pub struct Ports {
    pub spawner: Arc<dyn Spawner>,
    pub log_writer: Arc<dyn LogWriter>,
    pub mailer: Arc<dyn Mailer>,
    pub store: Arc<dyn JobStore>,
    pub dependencies: Arc<dyn DependencyTransport>,
}
