// Result sinks
//
// The pipeline hands each Outcome to every registered handler. Sinks log
// their own failures instead of returning them so that one broken output
// does not hide the others.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::evaluator::PairReport;
use crate::pipeline::Outcome;

/// Results file written into the work directory
pub const RESULTS_FILE: &str = "tdoa_results.json";

const CSV_HEADER: &str = concat!(
    "capture_epoch,latitude,longitude,converged,",
    "station_a,station_b,tdoa_seconds,tdoa_microseconds,",
    "distance_difference_meters,quality"
);

/// Trait for output handlers
pub trait OutputHandler: Send {
    /// Handle the outcome of one run
    fn handle_result(&mut self, outcome: &Outcome);
}

/// Pretty JSON results file, rewritten on every outcome
pub struct JsonOutput {
    path: PathBuf,
}

impl JsonOutput {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        JsonOutput { path: path.into() }
    }

    /// `tdoa_results.json` inside `work_dir`
    pub fn in_work_dir<P: AsRef<Path>>(work_dir: P) -> Self {
        Self::new(work_dir.as_ref().join(RESULTS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, outcome: &Outcome) -> Result<(), crate::error::TdoaError> {
        let json = serde_json::to_string_pretty(outcome)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

impl OutputHandler for JsonOutput {
    fn handle_result(&mut self, outcome: &Outcome) {
        match self.write(outcome) {
            Ok(()) => info!("Results saved to {}", self.path.display()),
            Err(e) => error!("Failed to write {}: {}", self.path.display(), e),
        }
    }
}

/// CSV pair table, one row per station pair, appended
pub struct CsvOutput {
    writer: BufWriter<File>,
}

impl CsvOutput {
    /// Open `path` for appending; the header is written only to an empty file
    pub fn new<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let empty = file.metadata()?.len() == 0;
        let mut writer = BufWriter::new(file);
        if empty {
            writeln!(writer, "{}", CSV_HEADER)?;
        }
        Ok(CsvOutput { writer })
    }

    fn write_rows(&mut self, outcome: &Outcome) -> std::io::Result<()> {
        let (epoch, position, converged, rows) = match outcome {
            Outcome::Located(record) => (
                record.capture_epoch,
                Some((record.latitude, record.longitude)),
                record.converged,
                record.pairs.clone(),
            ),
            Outcome::InsufficientForMultilateration { capture_epoch, pairs, .. } => {
                let rows: Vec<PairReport> = pairs.iter().map(PairReport::from).collect();
                (*capture_epoch, None, false, rows)
            }
        };
        let (lat, lon) = match position {
            Some((lat, lon)) => (format!("{:.6}", lat), format!("{:.6}", lon)),
            None => (String::new(), String::new()),
        };

        for row in &rows {
            writeln!(
                self.writer,
                "{:.6},{},{},{},{},{},{:.9},{:.3},{:.1},{:.3}",
                epoch,
                lat,
                lon,
                converged,
                row.station_a,
                row.station_b,
                row.tdoa_seconds,
                row.tdoa_microseconds,
                row.distance_difference_meters,
                row.quality
            )?;
        }
        self.writer.flush()
    }
}

impl OutputHandler for CsvOutput {
    fn handle_result(&mut self, outcome: &Outcome) {
        if let Err(e) = self.write_rows(outcome) {
            error!("Failed to write CSV: {}", e);
        }
    }
}

/// Human-readable summary through tracing
#[derive(Default)]
pub struct LogOutput;

impl OutputHandler for LogOutput {
    fn handle_result(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Located(record) => {
                info!("TDOA measurements:");
                for pair in &record.pairs {
                    info!(
                        "  {} - {}: {:.3} us ({:.1} m), quality {:.3}",
                        pair.station_a,
                        pair.station_b,
                        pair.tdoa_microseconds,
                        pair.distance_difference_meters,
                        pair.quality
                    );
                }
                info!("Estimated position: {:.6}, {:.6}", record.latitude, record.longitude);
                if !record.converged {
                    warn!("Solver did not converge after {} iterations", record.iterations);
                }
                if let (Some(reference), Some(error)) = (&record.reference, record.error_meters) {
                    info!(
                        "Error vs {}: {:.1} meters ({:.2} km)",
                        reference.name.as_deref().unwrap_or("reference"),
                        error,
                        error / 1000.0
                    );
                }
            }
            Outcome::InsufficientForMultilateration { stations, pairs, skipped, .. } => {
                warn!(
                    "Insufficient stations for multilateration: {} stations, {} pairs, {} skipped",
                    stations.len(),
                    pairs.len(),
                    skipped.len()
                );
            }
        }
    }
}
