//! A thin adapter over `tokio::process::Command`: no sandboxing, no
//! resource limits, no shell interpretation beyond what the OS gives for
//! free.

use crate::ports::{SpawnError, Spawner};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct ProcessSpawner;

impl ProcessSpawner {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ProcessSpawner {
    fn default() -> Self {
        Self::new()
    }
}

const PUMP_CHANNEL_DEPTH: usize = 16;
const READ_CHUNK_SIZE: usize = 4096;

async fn pump(mut reader: impl AsyncRead + Unpin, tx: mpsc::Sender<Vec<u8>>) {
    let mut buf = [0u8; READ_CHUNK_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).await.is_err() {
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl Spawner for ProcessSpawner {
    async fn exec_script(
        &self,
        cancel: CancellationToken,
        log_name: &str,
        command: &str,
        args: &[String],
        log_dir: &Path,
        mut log_sink: Option<&mut Vec<u8>>,
    ) -> Result<(), SpawnError> {
        tokio::fs::create_dir_all(log_dir).await?;
        let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(log_dir.join(log_name)).await?;

        let mut child = tokio::process::Command::new(command)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");

        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(PUMP_CHANNEL_DEPTH);
        let stdout_pump = tokio::spawn(pump(stdout, tx.clone()));
        let stderr_pump = tokio::spawn(pump(stderr, tx));

        // `child.wait()` captures `&mut child` for as long as `wait_fut`
        // lives, so cancellation can't also call `child.start_kill()` here
        // (a second, conflicting `&mut child`). Instead, on cancellation we
        // stop polling and return; `child` then drops at the end of this
        // function with `kill_on_drop(true)` already set, which kills it.
        let wait_fut = child.wait();
        tokio::pin!(wait_fut);

        let mut rx_closed = false;
        let status = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break None;
                }
                chunk = rx.recv(), if !rx_closed => {
                    match chunk {
                        Some(bytes) => {
                            file.write_all(&bytes).await?;
                            if let Some(sink) = log_sink.as_deref_mut() {
                                sink.extend_from_slice(&bytes);
                            }
                        }
                        None => rx_closed = true,
                    }
                }
                status = &mut wait_fut => {
                    break Some(status?);
                }
            }
        };

        let Some(status) = status else {
            return Err(SpawnError::Cancelled);
        };

        // The child has exited; both pumps see EOF shortly after and drop
        // their `tx` clones, so draining `rx` to close terminates.
        let _ = stdout_pump.await;
        let _ = stderr_pump.await;
        while let Some(bytes) = rx.recv().await {
            file.write_all(&bytes).await?;
            if let Some(sink) = log_sink.as_deref_mut() {
                sink.extend_from_slice(&bytes);
            }
        }
        file.flush().await?;

        if !status.success() {
            return Err(SpawnError::NonZeroExit(status.code().unwrap_or(-1)));
        }
        Ok(())
    }
}
