//! On-disk formats for parameter matrices, training statistics and
//! configuration echoes.
//!
//! Matrices are written one embedding per line, comma-separated, using the
//! shortest representation that parses back to the identical `f64`.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use ndarray::Array2;
use serde::Serialize;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::training::EpochStats;

/// File name of the per-epoch statistics table.
pub const STATS_FILE: &str = "stats.csv";
/// File name of the echoed run configuration.
pub const CONFIG_FILE: &str = "config.json";

/// Write `matrix` with one row per line.
pub fn dump_matrix(path: impl AsRef<Path>, matrix: &Array2<f64>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;
    for row in matrix.rows() {
        writer.write_record(row.iter().map(f64::to_string))?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a matrix written by [`dump_matrix`].
///
/// All rows must have the same width.
pub fn load_matrix(path: impl AsRef<Path>) -> Result<Array2<f64>> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let mut values = Vec::new();
    let mut rows = 0usize;
    let mut width = None;
    for (index, record) in reader.records().enumerate() {
        let record = record?;
        let parse_error = |message: String| Error::Parse {
            path: path.to_path_buf(),
            line: index + 1,
            message,
        };
        match width {
            None => width = Some(record.len()),
            Some(w) if w != record.len() => {
                return Err(parse_error(format!(
                    "expected {w} values, found {}",
                    record.len()
                )))
            }
            Some(_) => {}
        }
        for field in &record {
            let value: f64 = field
                .trim()
                .parse()
                .map_err(|e| parse_error(format!("bad number {field:?}: {e}")))?;
            values.push(value);
        }
        rows += 1;
    }

    let cols = width.unwrap_or(0);
    Array2::from_shape_vec((rows, cols), values)
        .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
}

/// Pretty-print `value` as JSON to `path`.
pub fn dump_json<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, value)?;
    Ok(())
}

/// Echo the run configuration as pretty JSON.
pub fn dump_config(path: impl AsRef<Path>, config: &Config) -> Result<()> {
    dump_json(path, config)
}

/// Write per-epoch statistics as `epoch,loss,time,mrr`.
///
/// The loss column is the loss function's mean loss; for the pairwise loss
/// that is violations per gradient computation. Epochs without a validation
/// pass report an MRR of −1.
pub fn write_stats(path: impl AsRef<Path>, stats: &[EpochStats]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["epoch", "loss", "time", "mrr"])?;
    for s in stats {
        writer.write_record([
            s.epoch.to_string(),
            s.loss.to_string(),
            s.time.to_string(),
            s.mrr.unwrap_or(-1.0).to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
