//! A flat JSON-snapshot store behind a mutex: no WAL, no transactions, no
//! migrations. Grounded in the teacher's `DateTimeWrapper`-style custom
//! (de)serialization, though here the schedule's textual form is enough to
//! avoid needing a custom `Serialize` for `calendar::Schedule` at all.

use crate::job::TaskList;
use crate::ports::{JobStore, StoreError};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::Mutex;

pub struct JsonFileStore {
    path: PathBuf,
    state: Mutex<TaskList>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), state: Mutex::new(TaskList::new()) }
    }
}

#[async_trait]
impl JobStore for JsonFileStore {
    async fn update(&self, f: Box<dyn FnOnce(&mut TaskList) + Send>) {
        let mut state = self.state.lock().await;
        f(&mut state);
    }

    async fn sync(&self) -> Result<(), StoreError> {
        let snapshot = {
            let state = self.state.lock().await;
            serde_json::to_vec_pretty(&*state)?
        };
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, snapshot).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }

    async fn load(&self) -> Result<TaskList, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                let loaded: TaskList = serde_json::from_slice(&bytes)?;
                *self.state.lock().await = loaded.clone();
                Ok(loaded)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(TaskList::new()),
            Err(e) => Err(e.into()),
        }
    }
}
