use std::{path::PathBuf, time::Duration};

/// Parameters for one serial link.
#[derive(Clone, Debug)]
pub struct ConnectionSettings {
    /// Device path or name, e.g. `/dev/ttyUSB0` or `COM3`
    pub port: String,
    pub baud: u32,
    /// Read timeout used by every line read on this link
    pub timeout: Duration,
    /// Wait after opening before the device is used. Some boards reset when
    /// the port opens and drop anything sent during boot.
    pub settle_delay: Duration,
    /// Start the line reader loop as soon as the port is open
    pub auto_read: bool,
    /// Default log file for the line reader loop
    pub log_path: PathBuf,
}
impl ConnectionSettings {
    pub fn new(port: &str, baud: u32) -> Self {
        Self {
            port: port.to_string(),
            baud,
            ..Default::default()
        }
    }
}
impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud: 115_200,
            timeout: Duration::from_secs(1),
            settle_delay: Duration::from_secs(2),
            auto_read: true,
            log_path: PathBuf::from("log.txt"),
        }
    }
}

/// Parameters for one measurement sweep.
#[derive(Clone, Debug)]
pub struct SequenceConfig {
    /// Number of advance-and-sample cycles after the setup sequence
    pub repeats: usize,
    /// Pause after every command of the sweep
    pub delay: Duration,
    /// Where to export results. `None` or an empty path skips the export.
    pub csv_path: Option<PathBuf>,
    pub start_hz: u64,
    pub step_hz: u64,
    /// Extra trigger-and-read attempts per sample
    pub retries: u32,
    pub retry_delay: Duration,
    /// Decimals written for each measurement in the CSV
    pub precision: usize,
}
impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            repeats: 10,
            delay: Duration::from_millis(500),
            csv_path: Some(PathBuf::from("thd_data.csv")),
            start_hz: 1000,
            step_hz: 1000,
            retries: 3,
            retry_delay: Duration::from_millis(200),
            precision: 6,
        }
    }
}
