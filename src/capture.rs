// Raw per-station IQ captures

use rustfft::num_complex::Complex64;

use crate::error::TdoaError;

/// Complex baseband sample
pub type IqSample = Complex64;

/// One station's recording window, as produced by the acquisition side
#[derive(Debug, Clone)]
pub struct StationCapture {
    pub station_id: String,
    /// Start of the first sample, seconds since epoch
    pub start_timestamp: f64,
    /// Hz
    pub sample_rate: f64,
    /// Hz
    pub center_freq: f64,
    pub samples: Vec<IqSample>,
}

impl StationCapture {
    pub fn new(
        station_id: impl Into<String>,
        start_timestamp: f64,
        sample_rate: f64,
        center_freq: f64,
        samples: Vec<IqSample>,
    ) -> Self {
        StationCapture {
            station_id: station_id.into(),
            start_timestamp,
            sample_rate,
            center_freq,
            samples,
        }
    }

    /// Check the record invariants
    ///
    /// # Errors
    /// `TdoaError::MalformedCapture` naming the first violated invariant.
    pub fn validate(&self) -> Result<(), TdoaError> {
        let reason = if self.station_id.is_empty() {
            Some("empty station id")
        } else if !self.start_timestamp.is_finite() {
            Some("non-finite start timestamp")
        } else if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            Some("sample rate must be positive")
        } else if self.samples.is_empty() {
            Some("no samples")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(TdoaError::MalformedCapture {
                station_id: self.station_id.clone(),
                reason: reason.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Recording length in seconds
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture(rate: f64, n: usize) -> StationCapture {
        let samples = vec![IqSample::new(1.0, 0.0); n];
        StationCapture::new("station1", 1751236060.0, rate, 162.4e6, samples)
    }

    #[test]
    fn test_valid_capture() {
        let c = capture(2.048e6, 2048);
        assert!(c.validate().is_ok());
        assert!((c.duration() - 1e-3).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_non_positive_rate() {
        for rate in [0.0, -1.0, f64::NAN] {
            match capture(rate, 16).validate() {
                Err(TdoaError::MalformedCapture { station_id, .. }) => {
                    assert_eq!(station_id, "station1")
                }
                other => panic!("expected MalformedCapture, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_rejects_empty_samples() {
        assert!(matches!(
            capture(1e6, 0).validate(),
            Err(TdoaError::MalformedCapture { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_timestamp_and_id() {
        let mut c = capture(1e6, 4);
        c.start_timestamp = f64::INFINITY;
        assert!(c.validate().is_err());

        let mut c = capture(1e6, 4);
        c.station_id.clear();
        assert!(c.validate().is_err());
    }
}
