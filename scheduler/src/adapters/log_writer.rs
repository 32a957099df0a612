use crate::ports::LogWriter;
use async_trait::async_trait;
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// Appends to `log_dir/log_name`, creating both as needed. Used only on
/// the dependency-failure path, where the spawner is never invoked to tee
/// its own output.
pub struct FileLogWriter;

impl FileLogWriter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FileLogWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogWriter for FileLogWriter {
    async fn write_log(&self, log_dir: &Path, log_name: &str, bytes: &[u8]) -> Result<(), std::io::Error> {
        tokio::fs::create_dir_all(log_dir).await?;
        let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(log_dir.join(log_name)).await?;
        file.write_all(bytes).await?;
        file.flush().await
    }
}
