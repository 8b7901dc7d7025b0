use std::path::{Path, PathBuf};

use log::info;

use crate::error::Result;

pub const CSV_HEADER: [&str; 2] = ["Frequency", "Measurement"];

/// Frequency paired with the sample at `index`, pinned at `u64::MAX`.
pub fn frequency_at(index: usize, start_hz: u64, step_hz: u64) -> u64 {
    let offset = u64::try_from(index)
        .unwrap_or(u64::MAX)
        .saturating_mul(step_hz);
    start_hz.saturating_add(offset)
}

/// Write `values` as a frequency/measurement table.
///
/// Rows follow sample order, the frequency of row `i` being
/// `start_hz + i * step_hz`. Values are written with `precision` decimals.
pub fn save_csv(
    values: &[f64],
    path: &Path,
    start_hz: u64,
    step_hz: u64,
    precision: usize,
) -> Result<PathBuf> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(CSV_HEADER)?;

    for (idx, value) in values.iter().enumerate() {
        writer.write_record([
            frequency_at(idx, start_hz, step_hz).to_string(),
            format!("{value:.precision$}"),
        ])?;
    }
    writer.flush()?;

    info!("Saved {} samples to {}", values.len(), path.display());
    Ok(path.to_path_buf())
}
