//! Distortion sweep: instrument setup, then repeated advance-and-sample.

mod export;
mod parse;

use std::{ops::RangeInclusive, sync::Arc, time::Duration};

use log::{info, warn};
use tokio::time::sleep;

pub use export::{CSV_HEADER, frequency_at, save_csv};
pub use parse::{Parsed, parse_response, try_read_once};

use crate::{
    config::SequenceConfig,
    connection::Connection,
    error::{Error, Result},
    notify::Notifier,
    transport::LineReader,
};

/// Starts a conversion; the instrument answers with one reading
pub const TRIGGER_COMMAND: &str = "RL";
/// Steps the generator to the next frequency
pub const ADVANCE_COMMAND: &str = "UP";

/// Instrument setup, sent once at the start of every sweep: clear, setpoint,
/// mode selection, amplitude and frequencies, then the first trigger.
pub const SETUP_SEQUENCE: [&str; 9] = [
    "CLR", "34.0SP", "P2", "O1", "AP 1.0VL", "FR 1.0KZ", "FN 1.0KZ", "S3", TRIGGER_COMMAND,
];

/// Entries of [`SETUP_SEQUENCE`] that produce a sample
pub const SETUP_SAMPLE_POINTS: usize = 1;

/// Readings outside this range are stale or garbage and get retried
pub const ACCEPTED_RANGE: RangeInclusive<f64> = 0.0..=100.0;

/// Recorded when no acceptable reading arrives after all retries
pub const SENTINEL_SAMPLE: f64 = 0.0;

/// Number of samples a complete sweep produces.
pub fn expected_samples(repeats: usize) -> usize {
    SETUP_SAMPLE_POINTS + repeats
}

/// Run one sweep. Never fails: errors end the sweep early and are reported,
/// and whatever was collected so far is returned.
pub(crate) async fn run_sequence(
    conn: Arc<Connection>,
    events: Notifier,
    config: SequenceConfig,
) -> Vec<f64> {
    let mut results = Vec::with_capacity(expected_samples(config.repeats));

    if let Err(e) = sweep(&conn, &events, &config, &mut results).await {
        events.system(format!("Error in sequence: {e}"));
    }

    info!(
        "Sequence finished with {}/{} samples",
        results.len(),
        expected_samples(config.repeats)
    );
    results
}

async fn sweep(
    conn: &Connection,
    events: &Notifier,
    config: &SequenceConfig,
    results: &mut Vec<f64>,
) -> Result<()> {
    let mut reader = conn.reader().await;

    /* Stale lines from before the sweep would be taken as readings */
    match conn.check(reader.clear_input().await) {
        Err(e @ Error::Disconnected(_)) => return Err(e),
        Err(e) => warn!("Could not clear input before sweep: {e}"),
        Ok(()) => {}
    }

    let mut sampler = Sampler {
        conn,
        reader: &mut **reader,
        events,
        max_wait: conn.settings().timeout,
        retries: config.retries,
        retry_delay: config.retry_delay,
    };

    for command in SETUP_SEQUENCE {
        conn.send(command).await?;
        sleep(config.delay).await;

        if command == TRIGGER_COMMAND {
            results.push(sampler.sample().await?);
        }
    }

    for _ in 0..config.repeats {
        conn.send(ADVANCE_COMMAND).await?;
        sleep(config.delay).await;
        conn.send(TRIGGER_COMMAND).await?;
        sleep(config.delay).await;

        results.push(sampler.sample().await?);
    }

    Ok(())
}

/// Acquires one sample with bounded retries.
struct Sampler<'a> {
    conn: &'a Connection,
    reader: &'a mut dyn LineReader,
    events: &'a Notifier,
    max_wait: Duration,
    retries: u32,
    retry_delay: Duration,
}
impl Sampler<'_> {
    /// The trigger for the first attempt has already been sent by the caller.
    /// Each retry re-sends it to force a fresh conversion.
    async fn sample(&mut self) -> Result<f64> {
        if let Some(value) = self.read_once().await? {
            if ACCEPTED_RANGE.contains(&value) {
                return Ok(value);
            }
            self.events
                .system(format!("Value out of range: {value}, retrying..."));
        }

        for attempt in 1..=self.retries {
            self.events.system(format!(
                "Retrying {TRIGGER_COMMAND} ({attempt}/{})...",
                self.retries
            ));
            self.conn.send(TRIGGER_COMMAND).await?;
            sleep(self.retry_delay).await;

            if let Some(value) = self.read_once().await? {
                if ACCEPTED_RANGE.contains(&value) {
                    return Ok(value);
                }
                self.events.system(format!(
                    "Value out of range: {value} (attempt {attempt}/{})",
                    self.retries
                ));
            }
        }

        self.events.system(format!(
            "No valid value after {} retries, recording {SENTINEL_SAMPLE:.1}",
            self.retries
        ));
        Ok(SENTINEL_SAMPLE)
    }

    async fn read_once(&mut self) -> Result<Option<f64>> {
        let res = try_read_once(self.reader, self.max_wait, self.events).await;
        self.conn.check(res)
    }
}
