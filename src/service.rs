use std::{
    future::Future,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use log::{debug, warn};
use tokio::task::JoinHandle;

use crate::{
    config::{ConnectionSettings, SequenceConfig},
    connection::Connection,
    error::{Error, Result},
    measurement,
    notify::Notifier,
    reader::ReadLoop,
    sender::{self, ScriptLine},
    transport::{Connector, SerialConnector},
};

/// How long `stop_read` waits for the loop before aborting it
const STOP_GRACE: Duration = Duration::from_millis(500);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Slot for one kind of background send job.
#[derive(Default)]
struct JobSlot(Mutex<Option<JoinHandle<()>>>);
impl JobSlot {
    fn is_active(&self) -> bool {
        lock(&self.0).as_ref().is_some_and(|job| !job.is_finished())
    }

    /// Spawn `job` unless one is still running. Returns whether it was spawned.
    fn try_spawn(&self, job: impl Future<Output = ()> + Send + 'static) -> bool {
        let mut slot = lock(&self.0);
        if slot.as_ref().is_some_and(|running| !running.is_finished()) {
            return false;
        }
        *slot = Some(tokio::spawn(job));
        true
    }

    async fn wait(&self) {
        let job = lock(&self.0).take();
        if let Some(job) = job {
            if let Err(e) = job.await {
                warn!("Send job ended abnormally: {e}");
            }
        }
    }

    /// Give a job that has seen the port close `grace` to exit, then abort it.
    async fn finish(&self, grace: Duration) {
        let job = lock(&self.0).take();
        if let Some(mut job) = job {
            if tokio::time::timeout(grace, &mut job).await.is_err() {
                warn!("Send job did not exit within {grace:?}, aborting it");
                job.abort();
                let _ = job.await;
            }
        }
    }

    fn abort(&self) {
        if let Some(job) = lock(&self.0).take() {
            job.abort();
        }
    }
}

/// Clears the busy flag however the sweep ends.
struct BusyGuard(Arc<AtomicBool>);
impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// The line reader loop, shared with the sweep task that pauses it.
#[derive(Default)]
struct ReaderSlot {
    /// Serializes starting and stopping the loop
    gate: tokio::sync::Mutex<()>,
    current: Mutex<Option<ReadLoop>>,
}
impl ReaderSlot {
    fn is_running(&self) -> bool {
        lock(&self.current)
            .as_ref()
            .is_some_and(|reader| reader.is_running())
    }

    async fn start(&self, conn: Arc<Connection>, log_path: PathBuf, events: &Notifier) {
        let _gate = self.gate.lock().await;

        /* Checked under the gate so a concurrent close can't miss this loop */
        if !conn.is_open() {
            events.system("Port is not open.");
            return;
        }
        if self.is_running() {
            events.system("Already reading.");
            return;
        }

        match ReadLoop::start(conn, log_path.clone(), events.clone()).await {
            Ok(reader) => {
                *lock(&self.current) = Some(reader);
                events.system(format!(
                    "Continuous reading started (log: {}).",
                    log_path.display()
                ));
            }
            Err(e) => events.system(format!("Error opening log {}: {e}", log_path.display())),
        }
    }

    /// Stop the loop if it runs. Returns its log path so it can be resumed.
    async fn pause(&self, events: &Notifier) -> Option<PathBuf> {
        let _gate = self.gate.lock().await;

        let reader = lock(&self.current).take()?;
        if !reader.is_running() {
            return None;
        }

        let path = reader.log_path().to_path_buf();
        reader.stop(STOP_GRACE).await;
        events.system("Continuous reading stopped.");
        Some(path)
    }

    fn abort(&self) {
        if let Some(reader) = lock(&self.current).take() {
            reader.abort();
        }
    }
}

/// Owner of the serial connection and everything running on it.
///
/// Share it by reference (or `Arc`) with every consumer; all operations take
/// `&self`. Status and errors go out as notifications. Only [`open`] reports
/// failure to the caller.
///
/// [`open`]: SerialService::open
pub struct SerialService {
    connector: Box<dyn Connector>,
    events: Notifier,
    /// Serializes open and close
    lifecycle: tokio::sync::Mutex<()>,
    conn: Mutex<Option<Arc<Connection>>>,
    reading: Arc<ReaderSlot>,
    batch_job: JobSlot,
    file_job: JobSlot,
    sequence_busy: Arc<AtomicBool>,
}
impl SerialService {
    /// Service talking to local serial devices.
    pub fn new(events: Notifier) -> Self {
        Self::with_connector(Box::new(SerialConnector), events)
    }

    pub fn with_connector(connector: Box<dyn Connector>, events: Notifier) -> Self {
        Self {
            connector,
            events,
            lifecycle: tokio::sync::Mutex::new(()),
            conn: Mutex::new(None),
            reading: Arc::default(),
            batch_job: JobSlot::default(),
            file_job: JobSlot::default(),
            sequence_busy: Arc::default(),
        }
    }

    fn connection(&self) -> Option<Arc<Connection>> {
        lock(&self.conn).clone().filter(|conn| conn.is_open())
    }

    pub fn is_open(&self) -> bool {
        self.connection().is_some()
    }

    pub fn is_reading(&self) -> bool {
        self.reading.is_running()
    }

    /// Settings of the open connection
    pub fn settings(&self) -> Option<ConnectionSettings> {
        self.connection().map(|conn| conn.settings().clone())
    }

    /// Open the port, wait for the device to settle, and start reading
    /// unless `auto_read` is off.
    pub async fn open(&self, settings: ConnectionSettings) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;

        if self.is_open() {
            self.events.system(format!(
                "Port {} is already open. Close it first.",
                settings.port
            ));
            return Err(Error::AlreadyOpen);
        }

        /* A link lost to a device error still holds the port until released */
        let stale = lock(&self.conn).take();
        if let Some(stale) = stale {
            self.release(&stale).await;
        }

        let link = match self.connector.open(&settings).await {
            Ok(link) => link,
            Err(e) => {
                self.events.system(format!("Error opening port: {e}"));
                return Err(e);
            }
        };

        tokio::time::sleep(settings.settle_delay).await;

        let auto_read = settings.auto_read;
        self.events.system(format!(
            "Port {} opened @ {} bps.",
            settings.port, settings.baud
        ));
        *lock(&self.conn) = Some(Arc::new(Connection::new(settings, link)));

        if auto_read {
            self.start_read(None).await;
        }

        Ok(())
    }

    /// Stop reading and close the port. Safe to call at any time.
    ///
    /// Returns once the reader loop and both send jobs are gone, so the
    /// device is free to be opened again.
    pub async fn close(&self) {
        let _lifecycle = self.lifecycle.lock().await;

        let conn = lock(&self.conn).take();
        let Some(conn) = conn else {
            return;
        };

        conn.mark_closed();
        self.stop_read().await;
        self.release(&conn).await;

        let limit = conn.settings().timeout;
        match tokio::time::timeout(limit, conn.close()).await {
            Ok(Ok(())) => self.events.system("Port closed."),
            Ok(Err(e)) => warn!("Error closing port: {e}"),
            Err(_) => warn!("Closing port timed out after {limit:?}"),
        }
    }

    /// Wait for everything running on `conn` to let go of it.
    async fn release(&self, conn: &Connection) {
        conn.mark_closed();
        self.reading.abort();

        let grace = conn.settings().timeout;
        self.batch_job.finish(grace).await;
        self.file_job.finish(grace).await;
    }

    /// Start the line reader loop, logging to `log_path` or the configured
    /// default.
    pub async fn start_read(&self, log_path: Option<&Path>) {
        let Some(conn) = self.connection() else {
            self.events.system("Port is not open.");
            return;
        };

        let path = log_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| conn.settings().log_path.clone());

        self.reading.start(conn, path, &self.events).await;
    }

    pub async fn stop_read(&self) {
        self.reading.pause(&self.events).await;
    }

    /// Send one command, terminated with CR/LF.
    pub async fn send(&self, command: &str) {
        let Some(conn) = self.connection() else {
            self.events.system("Port is not open.");
            return;
        };

        if let Err(e) = conn.send(command).await {
            self.events.system(format!("Error sending data: {e}"));
        }
    }

    /// Send `commands` in order in the background, pausing `interval` after
    /// each. Returns false when another batch is still running.
    pub fn send_batch<I, S>(&self, commands: I, interval: Duration) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.batch_job.is_active() {
            self.events.system("A batch send is already in progress.");
            return false;
        }
        let Some(conn) = self.connection() else {
            self.events.system("Port is not open. Send cancelled.");
            return false;
        };

        let commands = commands.into_iter().map(Into::into).collect();
        let job = sender::batch_job(conn, self.events.clone(), commands, interval);
        if !self.batch_job.try_spawn(job) {
            self.events.system("A batch send is already in progress.");
            return false;
        }
        true
    }

    /// Play back a command script in the background.
    ///
    /// Returns false when another script is running or the file can't be read.
    pub async fn send_from_file(&self, path: &Path, default_interval: Duration) -> bool {
        if self.file_job.is_active() {
            self.events.system("A file send is already in progress.");
            return false;
        }

        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.events
                    .system(format!("File not found: {}", path.display()));
                return false;
            }
            Err(e) => {
                self.events
                    .system(format!("Error reading {}: {e}", path.display()));
                return false;
            }
        };
        let script: Vec<ScriptLine> = sender::parse_script(&text);
        debug!("Loaded {} script lines from {}", script.len(), path.display());

        let Some(conn) = self.connection() else {
            self.events.system("Port is not open. Send cancelled.");
            return false;
        };

        let job = sender::script_job(conn, self.events.clone(), script, default_interval);
        if !self.file_job.try_spawn(job) {
            self.events.system("A file send is already in progress.");
            return false;
        }
        true
    }

    /// Wait for background batch and file sends to finish.
    pub async fn wait_for_sends(&self) {
        self.batch_job.wait().await;
        self.file_job.wait().await;
    }

    /// Run a measurement sweep and return one sample per step.
    ///
    /// The line reader loop is paused for the duration and resumed afterwards,
    /// also when the sweep fails, unless the port was lost meanwhile. An empty
    /// result means the sweep could not start. With a non-empty `csv_path`,
    /// results are exported before return.
    ///
    /// The sweep runs on its own task: dropping the returned future only stops
    /// waiting for it. Resuming the reader, the export and the busy flag are
    /// all handled by that task.
    pub async fn run_sequence(&self, config: &SequenceConfig) -> Vec<f64> {
        let Some(conn) = self.connection() else {
            self.events.system("Port is not open.");
            return vec![];
        };
        if self.sequence_busy.swap(true, Ordering::AcqRel) {
            self.events
                .system("A measurement sequence is already running.");
            return vec![];
        }
        let busy = BusyGuard(self.sequence_busy.clone());

        let job = tokio::spawn(sequence_job(
            conn,
            self.reading.clone(),
            self.events.clone(),
            config.clone(),
            busy,
        ));
        match job.await {
            Ok(results) => results,
            Err(e) => {
                self.events.system(format!("Error in sequence: {e}"));
                vec![]
            }
        }
    }
}
impl Drop for SerialService {
    fn drop(&mut self) {
        if let Some(conn) = lock(&self.conn).take() {
            conn.mark_closed();
        }
        self.reading.abort();
        self.batch_job.abort();
        self.file_job.abort();
    }
}

async fn sequence_job(
    conn: Arc<Connection>,
    reading: Arc<ReaderSlot>,
    events: Notifier,
    config: SequenceConfig,
    _busy: BusyGuard,
) -> Vec<f64> {
    let resume = reading.pause(&events).await;

    let sweep = tokio::spawn(measurement::run_sequence(
        conn.clone(),
        events.clone(),
        config.clone(),
    ));
    let results = match sweep.await {
        Ok(results) => results,
        Err(e) => {
            events.system(format!("Error in sequence: {e}"));
            vec![]
        }
    };

    /* A port lost mid-sweep stays down until it is opened again */
    if let Some(log_path) = resume {
        if conn.is_open() {
            reading.start(conn, log_path, &events).await;
        }
    }

    if let Some(path) = config
        .csv_path
        .clone()
        .filter(|path| !path.as_os_str().is_empty())
    {
        export(&results, path, &config, &events).await;
    }

    results
}

async fn export(results: &[f64], path: PathBuf, config: &SequenceConfig, events: &Notifier) {
    let values = results.to_vec();
    let (start_hz, step_hz, precision) = (config.start_hz, config.step_hz, config.precision);

    let saved = tokio::task::spawn_blocking(move || {
        measurement::save_csv(&values, &path, start_hz, step_hz, precision)
    })
    .await;

    match saved {
        Ok(Ok(path)) => events.system(format!("CSV saved: {}", path.display())),
        Ok(Err(e)) => events.system(format!("Error saving CSV: {e}")),
        Err(e) => events.system(format!("Error saving CSV: {e}")),
    }
}
