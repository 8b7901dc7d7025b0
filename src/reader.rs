use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use log::{debug, warn};
use tokio::{
    fs::{File, OpenOptions},
    io::AsyncWriteExt,
    sync::watch,
    task::JoinHandle,
};

use crate::{connection::Connection, error::Result, notify::Notifier, transport::decode_line};

/// Handle to a running line reader loop.
///
/// The loop owns the read side of the connection until it is stopped, and
/// republishes every non-empty line as a chat notification while appending
/// it to a log file.
pub(crate) struct ReadLoop {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
    log_path: PathBuf,
}
impl ReadLoop {
    /// Open the log and spawn the loop. Fails only if the log can't be opened.
    pub async fn start(conn: Arc<Connection>, log_path: PathBuf, events: Notifier) -> Result<Self> {
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await?;

        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(read_lines(conn, log, events, stop_rx));

        Ok(Self {
            stop,
            handle,
            log_path,
        })
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Ask the loop to exit and wait up to `grace` for it.
    pub async fn stop(mut self, grace: Duration) {
        let _ = self.stop.send(true);

        if tokio::time::timeout(grace, &mut self.handle).await.is_err() {
            warn!("Line reader did not stop within {grace:?}, aborting it");
            self.handle.abort();
        }
    }

    pub fn abort(self) {
        let _ = self.stop.send(true);
        self.handle.abort();
    }
}

async fn read_lines(
    conn: Arc<Connection>,
    mut log: File,
    events: Notifier,
    mut stop: watch::Receiver<bool>,
) {
    let timeout = conn.settings().timeout;

    let mut reader = tokio::select! {
        _ = stop.changed() => return,
        reader = conn.reader() => reader,
    };
    debug!("Line reader running on {}", conn.settings().port);

    while conn.is_open() {
        let line = tokio::select! {
            _ = stop.changed() => break,
            line = reader.read_line(timeout) => conn.check(line),
        };

        let raw = match line {
            Ok(Some(raw)) => raw,
            Ok(None) => continue,
            Err(e) => {
                events.system(format!("Error reading: {e}"));
                break;
            }
        };

        let text = decode_line(&raw);
        if text.is_empty() {
            continue;
        }

        events.chat(text.as_str());
        if let Err(e) = append_line(&mut log, &text).await {
            events.system(format!("Error writing log: {e}"));
            break;
        }
    }

    debug!("Line reader exited");
}

async fn append_line(log: &mut File, text: &str) -> std::io::Result<()> {
    log.write_all(text.as_bytes()).await?;
    log.write_all(b"\r\n").await?;
    log.flush().await
}
