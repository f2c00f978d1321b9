// Scenario files: station table, reference transmitter and capture records
//
// A scenario is a JSON document next to a set of raw `.cf32` sample files
// (interleaved little-endian f32 I/Q). Capture entries that cannot be turned
// into a StationCapture are logged and skipped; a scenario that cannot be
// read or parsed at all is an error.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::capture::{IqSample, StationCapture};
use crate::error::TdoaError;
use crate::pipeline::PipelineConfig;
use crate::station::{ReferencePosition, StationPosition, StationTable};

/// Bytes per interleaved f32 I/Q pair
const CF32_PAIR_BYTES: usize = 8;

/// One entry of the `captures` array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureEntry {
    pub station_id: String,
    /// Start of the first sample, seconds since epoch
    pub timestamp: f64,
    pub sample_rate: f64,
    pub center_freq: f64,
    /// Relative to the scenario file
    pub samples_file: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct ScenarioDocument {
    stations: Vec<StationPosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reference: Option<ReferencePosition>,
    #[serde(default)]
    captures: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pipeline: Option<PipelineConfig>,
}

/// Everything one run needs
#[derive(Debug, Clone, Default)]
pub struct Scenario {
    pub stations: StationTable,
    pub reference: Option<ReferencePosition>,
    pub captures: Vec<StationCapture>,
    pub pipeline: PipelineConfig,
}

impl Scenario {
    /// Load a scenario file and every capture it names
    ///
    /// # Arguments
    /// * `path` - scenario JSON; `samples_file` entries resolve against its directory
    ///
    /// # Returns
    /// The scenario with malformed capture entries already dropped
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, TdoaError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let scenario = Self::from_json(&text, base_dir)?;

        info!(
            "Loaded scenario {}: {} stations, {} captures",
            path.display(),
            scenario.stations.len(),
            scenario.captures.len()
        );
        Ok(scenario)
    }

    /// Parse a scenario document, reading sample files relative to `base_dir`
    pub fn from_json(text: &str, base_dir: &Path) -> Result<Self, TdoaError> {
        let document: ScenarioDocument = serde_json::from_str(text)?;

        let mut captures = Vec::with_capacity(document.captures.len());
        for value in document.captures {
            match load_capture(value, base_dir) {
                Ok(capture) => captures.push(capture),
                Err(e) => warn!("Skipping capture: {}", e),
            }
        }

        Ok(Scenario {
            stations: document.stations.into_iter().collect(),
            reference: document.reference,
            captures,
            pipeline: document.pipeline.unwrap_or_default(),
        })
    }

    /// Write the scenario to `path`, one `<station>_<n>.cf32` file per capture beside it
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), TdoaError> {
        let path = path.as_ref();
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

        let mut entries = Vec::with_capacity(self.captures.len());
        for (n, capture) in self.captures.iter().enumerate() {
            let samples_file = PathBuf::from(format!("{}_{}.cf32", capture.station_id, n));
            write_cf32(base_dir.join(&samples_file), &capture.samples)?;
            let entry = CaptureEntry {
                station_id: capture.station_id.clone(),
                timestamp: capture.start_timestamp,
                sample_rate: capture.sample_rate,
                center_freq: capture.center_freq,
                samples_file,
            };
            entries.push(serde_json::to_value(entry)?);
        }

        let document = ScenarioDocument {
            stations: self.stations.iter().cloned().collect(),
            reference: self.reference.clone(),
            captures: entries,
            pipeline: Some(self.pipeline.clone()),
        };
        fs::write(path, serde_json::to_string_pretty(&document)?)?;
        Ok(())
    }
}

fn load_capture(value: serde_json::Value, base_dir: &Path) -> Result<StationCapture, TdoaError> {
    let station_id = value
        .get("station_id")
        .and_then(|v| v.as_str())
        .unwrap_or("<unknown>")
        .to_string();
    let malformed = |reason: String| TdoaError::MalformedCapture {
        station_id: station_id.clone(),
        reason,
    };

    let entry: CaptureEntry = serde_json::from_value(value).map_err(|e| malformed(e.to_string()))?;
    let samples_path = base_dir.join(&entry.samples_file);
    let samples = read_cf32(&samples_path)
        .map_err(|e| malformed(format!("{}: {}", samples_path.display(), e)))?;

    Ok(StationCapture::new(
        entry.station_id,
        entry.timestamp,
        entry.sample_rate,
        entry.center_freq,
        samples,
    ))
}

/// Read interleaved little-endian f32 I/Q; a trailing partial pair is ignored
pub fn read_cf32<P: AsRef<Path>>(path: P) -> std::io::Result<Vec<IqSample>> {
    let bytes = fs::read(path)?;
    Ok(decode_cf32(&bytes))
}

pub fn decode_cf32(bytes: &[u8]) -> Vec<IqSample> {
    bytes
        .chunks_exact(CF32_PAIR_BYTES)
        .map(|chunk| {
            let i = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            let q = f32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
            IqSample::new(i as f64, q as f64)
        })
        .collect()
}

/// Write samples as interleaved little-endian f32 I/Q
pub fn write_cf32<P: AsRef<Path>>(path: P, samples: &[IqSample]) -> std::io::Result<()> {
    let mut writer = BufWriter::new(fs::File::create(path)?);
    for s in samples {
        writer.write_all(&(s.re as f32).to_le_bytes())?;
        writer.write_all(&(s.im as f32).to_le_bytes())?;
    }
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synchronizer::TieBreak;
    use tempfile::TempDir;

    fn samples() -> Vec<IqSample> {
        vec![
            IqSample::new(0.5, -0.25),
            IqSample::new(1.0, 0.0),
            IqSample::new(-0.75, 0.125),
        ]
    }

    #[test]
    fn test_decode_ignores_partial_pair() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1.5f32.to_le_bytes());
        bytes.extend_from_slice(&(-2.0f32).to_le_bytes());
        bytes.extend_from_slice(&3.0f32.to_le_bytes());
        let decoded = decode_cf32(&bytes);
        assert_eq!(decoded, vec![IqSample::new(1.5, -2.0)]);
    }

    #[test]
    fn test_cf32_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.cf32");
        write_cf32(&path, &samples()).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), 24);
        assert_eq!(read_cf32(&path).unwrap(), samples());
    }

    #[test]
    fn test_load_scenario() {
        let dir = TempDir::new().unwrap();
        write_cf32(dir.path().join("s1.cf32"), &samples()).unwrap();
        write_cf32(dir.path().join("s2.cf32"), &samples()).unwrap();

        let text = r#"{
            "stations": [
                {"id": "station1", "name": "West Omaha", "lat": 41.2565, "lon": -96.1969},
                {"id": "station2", "lat": 41.1543, "lon": -95.9145}
            ],
            "reference": {"name": "WXL68", "lat": 41.2619, "lon": -96.0819},
            "captures": [
                {"station_id": "station1", "timestamp": 100.0, "sample_rate": 2048000.0,
                 "center_freq": 162400000.0, "samples_file": "s1.cf32"},
                {"station_id": "station2", "timestamp": 100.2, "sample_rate": 2048000.0,
                 "center_freq": 162400000.0, "samples_file": "s2.cf32"}
            ],
            "pipeline": {
                "sync": {"tolerance": 0.5, "tie_break": "latest_representative"},
                "min_quality": 3.0
            }
        }"#;
        let path = dir.path().join("scenario.json");
        fs::write(&path, text).unwrap();

        let scenario = Scenario::load(&path).unwrap();
        assert_eq!(scenario.stations.len(), 2);
        assert_eq!(
            scenario.stations.get("station1").and_then(|s| s.name.as_deref()),
            Some("West Omaha")
        );
        assert_eq!(scenario.reference.as_ref().and_then(|r| r.name.as_deref()), Some("WXL68"));
        assert_eq!(scenario.captures.len(), 2);
        assert_eq!(scenario.captures[1].start_timestamp, 100.2);
        assert_eq!(scenario.captures[1].samples, samples());
        assert_eq!(scenario.pipeline.sync.tolerance, 0.5);
        assert_eq!(scenario.pipeline.sync.tie_break, TieBreak::LatestRepresentative);
        assert_eq!(scenario.pipeline.min_quality, Some(3.0));
    }

    #[test]
    fn test_malformed_captures_skipped() {
        let dir = TempDir::new().unwrap();
        write_cf32(dir.path().join("good.cf32"), &samples()).unwrap();

        let text = r#"{
            "stations": [],
            "captures": [
                {"station_id": "station1", "timestamp": 1.0, "sample_rate": 1e6,
                 "center_freq": 1e8, "samples_file": "good.cf32"},
                {"station_id": "station2", "sample_rate": 1e6,
                 "center_freq": 1e8, "samples_file": "good.cf32"},
                {"station_id": "station3", "timestamp": 1.0, "sample_rate": 1e6,
                 "center_freq": 1e8, "samples_file": "missing.cf32"},
                "not an object"
            ]
        }"#;

        let scenario = Scenario::from_json(text, dir.path()).unwrap();
        assert_eq!(scenario.captures.len(), 1);
        assert_eq!(scenario.captures[0].station_id, "station1");
        assert!(scenario.reference.is_none());
        assert!(scenario.pipeline.min_quality.is_none());
    }

    #[test]
    fn test_unparseable_document() {
        let result = Scenario::from_json("{\"captures\": []}", Path::new("."));
        assert!(matches!(result, Err(TdoaError::Json(_))));
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = Scenario::load(dir.path().join("nope.json"));
        assert!(matches!(result, Err(TdoaError::Io(_))));
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let scenario = Scenario {
            stations: vec![StationPosition::new("station1", 41.0, -96.0)].into_iter().collect(),
            reference: Some(ReferencePosition::new(41.1, -96.1)),
            captures: vec![StationCapture::new("station1", 12.5, 1e6, 162.4e6, samples())],
            pipeline: PipelineConfig::default(),
        };
        let path = dir.path().join("scenario.json");
        scenario.save(&path).unwrap();

        let loaded = Scenario::load(&path).unwrap();
        assert_eq!(loaded.captures.len(), 1);
        assert_eq!(loaded.captures[0].samples, samples());
        assert_eq!(loaded.captures[0].start_timestamp, 12.5);
        assert_eq!(loaded.reference, scenario.reference);
        assert!(dir.path().join("station1_0.cf32").exists());
    }
}
