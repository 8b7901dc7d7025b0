use log::warn;
use tokio::sync::{Mutex, MutexGuard, watch};

use crate::{
    config::ConnectionSettings,
    error::{Error, Result},
    transport::{LineReader, LineWriter, Link, frame_command},
};

/// One open serial link, shared by the service and its background tasks.
///
/// The writer mutex is the single write path: every command goes out whole
/// before the next one starts. The reader mutex is held by whichever consumer
/// currently owns the read side (line reader loop or a measurement sweep).
pub(crate) struct Connection {
    settings: ConnectionSettings,
    open: watch::Sender<bool>,
    reader: Mutex<Box<dyn LineReader>>,
    writer: Mutex<Box<dyn LineWriter>>,
}
impl Connection {
    pub fn new(settings: ConnectionSettings, link: Link) -> Self {
        Self {
            settings,
            open: watch::Sender::new(true),
            reader: Mutex::new(link.reader),
            writer: Mutex::new(link.writer),
        }
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    pub fn is_open(&self) -> bool {
        *self.open.borrow()
    }

    /// Background tasks check this flag and wind down on their own.
    pub fn mark_closed(&self) {
        self.open.send_replace(false);
    }

    /// Resolves once the link has been closed or lost.
    pub async fn closed(&self) {
        let mut open = self.open.subscribe();
        let _ = open.wait_for(|open| !*open).await;
    }

    /// Pass `res` through, taking the link down if the device went away.
    pub fn check<T>(&self, res: Result<T>) -> Result<T> {
        if let Err(Error::Disconnected(e)) = &res {
            if self.open.send_replace(false) {
                warn!("Lost {}: {e}", self.settings.port);
            }
        }
        res
    }

    /// Frame `command` with CR/LF and write it atomically.
    pub async fn send(&self, command: &str) -> Result<()> {
        if !self.is_open() {
            return Err(Error::NotOpen);
        }

        let data = frame_command(command);
        let res = self.writer.lock().await.write_all(&data).await;
        self.check(res)
    }

    pub async fn reader(&self) -> MutexGuard<'_, Box<dyn LineReader>> {
        self.reader.lock().await
    }

    pub async fn close(&self) -> Result<()> {
        self.mark_closed();
        self.writer.lock().await.close().await
    }
}
