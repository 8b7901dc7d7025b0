#![allow(dead_code)]

use std::{
    collections::VecDeque,
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use serlink_rs::{
    ConnectionSettings, Notification, SequenceConfig,
    error::{Error, Result},
    transport::{Connector, LineReader, LineWriter, Link},
};
use tokio::{
    sync::{Notify, mpsc::UnboundedReceiver},
    time::Instant,
};

type Responder = Box<dyn FnMut(&str) -> Vec<String> + Send>;

struct State {
    /// Commands received, with CR/LF stripped, and when they arrived
    written: Vec<(Instant, String)>,
    raw: Vec<Vec<u8>>,
    inbox: VecDeque<Vec<u8>>,
    responder: Responder,
    /// Writes succeed until this many have been received
    fail_after: Option<usize>,
    /// Lines handed out so far, and after how many reading fails
    delivered: usize,
    fail_reads_after: Option<usize>,
    /// Next read fails once without taking the device down
    glitch: bool,
    /// Reader and writer halves not yet dropped
    halves: usize,
    refuse_open: bool,
    opens: usize,
    closed: bool,
}

/// In-memory stand-in for the instrument on the other end of the line.
#[derive(Clone)]
pub struct Instrument {
    state: Arc<Mutex<State>>,
    arrived: Arc<Notify>,
}
impl Instrument {
    pub fn new(responder: impl FnMut(&str) -> Vec<String> + Send + 'static) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                written: vec![],
                raw: vec![],
                inbox: VecDeque::new(),
                responder: Box::new(responder),
                fail_after: None,
                delivered: 0,
                fail_reads_after: None,
                glitch: false,
                halves: 0,
                refuse_open: false,
                opens: 0,
                closed: false,
            })),
            arrived: Arc::new(Notify::new()),
        }
    }

    /// Never answers anything
    pub fn silent() -> Self {
        Self::new(|_| vec![])
    }

    /// Answers every trigger with `reply`
    pub fn replying(reply: &'static str) -> Self {
        Self::new(move |cmd| {
            if cmd == "RL" {
                vec![reply.to_string()]
            } else {
                vec![]
            }
        })
    }

    pub fn connector(&self) -> Box<dyn Connector> {
        Box::new(MockConnector(self.clone()))
    }

    /// Unsolicited output from the device
    pub fn push_line(&self, line: &str) {
        let mut data = line.as_bytes().to_vec();
        data.extend_from_slice(b"\r\n");
        self.state.lock().unwrap().inbox.push_back(data);
        self.arrived.notify_one();
    }

    pub fn written(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .written
            .iter()
            .map(|(_, cmd)| cmd.clone())
            .collect()
    }

    pub fn written_at(&self) -> Vec<(Instant, String)> {
        self.state.lock().unwrap().written.clone()
    }

    pub fn raw(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().raw.clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.written().iter().filter(|cmd| *cmd == command).count()
    }

    pub fn fail_writes_after(&self, writes: usize) {
        self.state.lock().unwrap().fail_after = Some(writes);
    }

    /// Reads report the device gone once `lines` lines have been read
    pub fn fail_reads_after(&self, lines: usize) {
        self.state.lock().unwrap().fail_reads_after = Some(lines);
        self.arrived.notify_one();
    }

    pub fn glitch_next_read(&self) {
        self.state.lock().unwrap().glitch = true;
        self.arrived.notify_one();
    }

    pub fn halves_held(&self) -> usize {
        self.state.lock().unwrap().halves
    }

    pub fn refuse_open(&self) {
        self.state.lock().unwrap().refuse_open = true;
    }

    pub fn opens(&self) -> usize {
        self.state.lock().unwrap().opens
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    fn release_half(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.halves = state.halves.saturating_sub(1);
        }
    }
}

struct MockConnector(Instrument);

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, settings: &ConnectionSettings) -> Result<Link> {
        let mut state = self.0.state.lock().unwrap();
        if state.refuse_open {
            return Err(Error::Transport(format!("no such device: {}", settings.port)));
        }
        state.opens += 1;
        state.closed = false;
        state.fail_after = None;
        state.fail_reads_after = None;
        state.halves += 2;

        Ok(Link {
            reader: Box::new(MockReader(self.0.clone())),
            writer: Box::new(MockWriter(self.0.clone())),
        })
    }
}

struct MockReader(Instrument);

#[async_trait]
impl LineReader for MockReader {
    async fn read_line(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut state = self.0.state.lock().unwrap();
                if state
                    .fail_reads_after
                    .is_some_and(|limit| state.delivered >= limit)
                {
                    return Err(Error::Disconnected("device unplugged".into()));
                }
                if std::mem::take(&mut state.glitch) {
                    return Err(Error::IoError(std::io::Error::other("framing error")));
                }
                if let Some(line) = state.inbox.pop_front() {
                    state.delivered += 1;
                    return Ok(Some(line));
                }
            }
            if tokio::time::timeout_at(deadline, self.0.arrived.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }

    async fn clear_input(&mut self) -> Result<()> {
        self.0.state.lock().unwrap().inbox.clear();
        Ok(())
    }
}
impl Drop for MockReader {
    fn drop(&mut self) {
        self.0.release_half();
    }
}

struct MockWriter(Instrument);

#[async_trait]
impl LineWriter for MockWriter {
    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let replies = {
            let mut state = self.0.state.lock().unwrap();
            if state.fail_after.is_some_and(|limit| state.written.len() >= limit) {
                return Err(Error::Disconnected("device unplugged".into()));
            }

            let command = String::from_utf8_lossy(data)
                .trim_end_matches("\r\n")
                .to_string();
            state.raw.push(data.to_vec());
            state.written.push((Instant::now(), command.clone()));
            (state.responder)(&command)
        };

        for reply in replies {
            self.0.push_line(&reply);
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.0.state.lock().unwrap().closed = true;
        Ok(())
    }
}
impl Drop for MockWriter {
    fn drop(&mut self) {
        self.0.release_half();
    }
}

pub fn settings(dir: &Path, auto_read: bool) -> ConnectionSettings {
    ConnectionSettings {
        timeout: Duration::from_secs(1),
        settle_delay: Duration::from_secs(2),
        auto_read,
        log_path: dir.join("log.txt"),
        ..ConnectionSettings::new("mock0", 9600)
    }
}

pub fn sequence(repeats: usize, retries: u32) -> SequenceConfig {
    SequenceConfig {
        repeats,
        retries,
        csv_path: None,
        ..SequenceConfig::default()
    }
}

/// Everything notified so far
pub fn drain(rx: &mut UnboundedReceiver<Notification>) -> Vec<Notification> {
    let mut notes = vec![];
    while let Ok(note) = rx.try_recv() {
        notes.push(note);
    }
    notes
}

pub fn system_texts(notes: &[Notification]) -> Vec<String> {
    notes
        .iter()
        .filter_map(|note| match note {
            Notification::System(text) => Some(text.clone()),
            Notification::Chat(_) => None,
        })
        .collect()
}

pub fn chat_texts(notes: &[Notification]) -> Vec<String> {
    notes
        .iter()
        .filter_map(|note| match note {
            Notification::Chat(text) => Some(text.clone()),
            Notification::System(_) => None,
        })
        .collect()
}
