use std::time::Duration;

use async_trait::async_trait;

mod serial;

pub use serial::{SerialConnector, available_ports, available_ports_with_desc};

use crate::{config::ConnectionSettings, error::Result};

/// Line terminator appended to every outbound command
pub const COMMAND_TERMINATOR: &[u8] = b"\r\n";

/// Read side of an open link. Owned by exactly one consumer at a time.
#[async_trait]
pub trait LineReader: Send {
    /// Wait up to `timeout` for one newline-terminated line.
    ///
    /// Returns `Ok(None)` when nothing complete arrived in time. Bytes of a
    /// partially received line are kept and completed by the next call.
    async fn read_line(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>>;

    /// Drop everything received but not yet consumed.
    async fn clear_input(&mut self) -> Result<()>;
}

/// Write side of an open link.
#[async_trait]
pub trait LineWriter: Send {
    async fn write_all(&mut self, data: &[u8]) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// Both halves of a freshly opened link.
pub struct Link {
    pub reader: Box<dyn LineReader>,
    pub writer: Box<dyn LineWriter>,
}

/// Opens links. The service owns one and calls it on every `open`.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, settings: &ConnectionSettings) -> Result<Link>;
}

pub fn frame_command(command: &str) -> Vec<u8> {
    let mut data = Vec::with_capacity(command.len() + COMMAND_TERMINATOR.len());
    data.extend_from_slice(command.as_bytes());
    data.extend_from_slice(COMMAND_TERMINATOR);
    data
}

/// Decode an inbound line, dropping invalid UTF-8 and surrounding whitespace.
pub fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .replace(char::REPLACEMENT_CHARACTER, "")
        .trim()
        .to_string()
}

/// Render raw traffic for debug logs with line endings made visible.
pub(crate) fn visible(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .replace('\n', "␤")
        .replace('\r', "␍")
}
