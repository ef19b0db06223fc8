//! Queued single-handle file writer.
//!
//! All writes to one replay log go through a single background task that owns the
//! file handle, so lines land in submission order. The handle is closed after an
//! idle period and reopened (append mode) on the next write.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};

enum WriterCommand {
    Append(String),
    /// Truncate, then write these lines.
    Rewrite(Vec<String>),
    Flush(oneshot::Sender<()>),
    Close(oneshot::Sender<()>),
}

pub struct ReplayLogWriter {
    path: PathBuf,
    tx: mpsc::UnboundedSender<WriterCommand>,
}

impl ReplayLogWriter {
    /// Starts the writer task. Must be called inside a Tokio runtime.
    pub fn open(path: impl Into<PathBuf>, idle_close: Duration) -> Self {
        let path = path.into();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(writer_loop(path.clone(), idle_close, rx));
        Self { path, tx }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queues one line. Failures are logged by the writer task.
    pub fn append(&self, line: String) {
        if self.tx.send(WriterCommand::Append(line)).is_err() {
            tracing::error!("Replay log {} is closed, dropping write", self.path.display());
        }
    }

    pub fn rewrite(&self, lines: Vec<String>) {
        if self.tx.send(WriterCommand::Rewrite(lines)).is_err() {
            tracing::error!("Replay log {} is closed, dropping rewrite", self.path.display());
        }
    }

    /// Resolves once every previously queued write was attempted.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(WriterCommand::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }

    /// Flushes pending writes and stops the writer task.
    pub async fn close(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(WriterCommand::Close(ack)).is_ok() {
            let _ = done.await;
        }
    }
}

async fn writer_loop(
    path: PathBuf,
    idle_close: Duration,
    mut rx: mpsc::UnboundedReceiver<WriterCommand>,
) {
    let mut file: Option<File> = None;

    loop {
        let command = if file.is_some() {
            match tokio::time::timeout(idle_close, rx.recv()).await {
                Ok(command) => command,
                Err(_) => {
                    tracing::trace!("Closing idle replay log {}", path.display());
                    file = None;
                    continue;
                }
            }
        } else {
            rx.recv().await
        };

        match command {
            Some(WriterCommand::Append(line)) => {
                if let Err(e) = append_line(&path, &mut file, &line).await {
                    tracing::error!("Replay log write to {} failed: {}", path.display(), e);
                    file = None;
                }
            }
            Some(WriterCommand::Rewrite(lines)) => {
                if let Err(e) = rewrite_file(&path, &mut file, &lines).await {
                    tracing::error!("Replay log rewrite of {} failed: {}", path.display(), e);
                    file = None;
                }
            }
            Some(WriterCommand::Flush(ack)) => {
                let _ = ack.send(());
            }
            Some(WriterCommand::Close(ack)) => {
                drop(file.take());
                let _ = ack.send(());
                break;
            }
            None => break,
        }
    }
}

async fn append_line(path: &Path, file: &mut Option<File>, line: &str) -> std::io::Result<()> {
    if file.is_none() {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let opened = OpenOptions::new().create(true).append(true).open(path).await?;
        *file = Some(opened);
    }
    if let Some(handle) = file.as_mut() {
        handle.write_all(line.as_bytes()).await?;
        handle.write_all(b"\n").await?;
        handle.flush().await?;
    }
    Ok(())
}

async fn rewrite_file(path: &Path, file: &mut Option<File>, lines: &[String]) -> std::io::Result<()> {
    *file = None;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut handle = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .await?;
    let mut buffer = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
    for line in lines {
        buffer.push_str(line);
        buffer.push('\n');
    }
    handle.write_all(buffer.as_bytes()).await?;
    handle.flush().await?;
    *file = Some(handle);
    Ok(())
}
