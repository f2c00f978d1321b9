// Pairwise cross-correlation TDOA estimation
//
// For every station pair in a CaptureSet, the leading window of both sample
// streams is mean-removed, power-normalized and cross-correlated. The lag of
// the largest correlation magnitude, converted to seconds and corrected by
// the difference of the capture start timestamps, is the pair's TDOA.
//
// Sign convention: a positive delay means the signal reached station A after
// station B, matching the solver's (|p - A| - |p - B|) / c.

use std::sync::Arc;

use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::capture::{IqSample, StationCapture};
use crate::constants::{CORRELATION_WINDOW, NORMALIZATION_EPSILON, SPEED_OF_LIGHT};
use crate::error::TdoaError;
use crate::synchronizer::CaptureSet;

/// How the full cross-correlation is evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationMethod {
    /// Zero-padded FFT, O(n log n)
    #[default]
    Fft,
    /// Sliding dot product, O(n^2). Reference for testing.
    Direct,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelatorConfig {
    /// Seconds of samples analysed per pair
    pub window_seconds: f64,
    /// Added to the standard deviation before normalizing
    pub epsilon: f64,
    pub method: CorrelationMethod,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        CorrelatorConfig {
            window_seconds: CORRELATION_WINDOW,
            epsilon: NORMALIZATION_EPSILON,
            method: CorrelationMethod::default(),
        }
    }
}

/// Time difference of arrival for one station pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairwiseTdoa {
    pub station_a: String,
    pub station_b: String,
    /// Arrival time at A minus arrival time at B (s)
    pub delay_seconds: f64,
    /// Correlation magnitude at the chosen peak
    pub quality: f64,
}

impl PairwiseTdoa {
    /// Implied range difference |p - A| - |p - B| in meters
    pub fn distance_difference(&self) -> f64 {
        self.delay_seconds * SPEED_OF_LIGHT
    }
}

/// A pair that could not be measured
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedPair {
    pub station_a: String,
    pub station_b: String,
    pub reason: String,
}

/// Output of correlating every pair in a capture set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorrelationReport {
    pub measurements: Vec<PairwiseTdoa>,
    pub skipped: Vec<SkippedPair>,
}

/// Location of the correlation maximum
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrelationPeak {
    /// Samples; positive when the first sequence lags the second
    pub lag: isize,
    pub magnitude: f64,
}

/// Number of samples analysed for a pair: the shorter capture, capped at the window
pub fn analysis_window(len_a: usize, len_b: usize, sample_rate: f64, window_seconds: f64) -> usize {
    let cap = (window_seconds * sample_rate).floor();
    let cap = if cap.is_finite() && cap >= 1.0 { cap as usize } else { 1 };
    len_a.min(len_b).min(cap)
}

/// Remove the complex mean and scale to unit standard deviation
///
/// `epsilon` keeps zero-variance input finite (the output is then all zeros).
pub fn normalize(samples: &[IqSample], epsilon: f64) -> Vec<IqSample> {
    if samples.is_empty() {
        return Vec::new();
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<IqSample>() / n;
    let variance = samples.iter().map(|s| (s - mean).norm_sqr()).sum::<f64>() / n;
    let scale = 1.0 / (variance.sqrt() + epsilon);
    samples.iter().map(|s| (s - mean) * scale).collect()
}

/// Full cross-correlation r[k] = sum_i a[i + k] * conj(b[i])
///
/// # Returns
/// `a.len() + b.len() - 1` values; index `i` holds lag `i - (b.len() - 1)`.
/// Empty if either input is empty.
pub fn cross_correlate(a: &[IqSample], b: &[IqSample], method: CorrelationMethod) -> Vec<IqSample> {
    if a.is_empty() || b.is_empty() {
        return Vec::new();
    }
    match method {
        CorrelationMethod::Fft => cross_correlate_fft(a, b),
        CorrelationMethod::Direct => cross_correlate_direct(a, b),
    }
}

fn cross_correlate_direct(a: &[IqSample], b: &[IqSample]) -> Vec<IqSample> {
    let (la, lb) = (a.len() as isize, b.len() as isize);
    (-(lb - 1)..la)
        .map(|k| {
            let start = (-k).max(0);
            let end = lb.min(la - k);
            (start..end)
                .map(|i| a[(i + k) as usize] * b[i as usize].conj())
                .sum::<IqSample>()
        })
        .collect()
}

fn cross_correlate_fft(a: &[IqSample], b: &[IqSample]) -> Vec<IqSample> {
    let out_len = a.len() + b.len() - 1;
    let size = out_len.next_power_of_two();

    let mut planner = FftPlanner::<f64>::new();
    let forward: Arc<dyn Fft<f64>> = planner.plan_fft_forward(size);
    let inverse: Arc<dyn Fft<f64>> = planner.plan_fft_inverse(size);

    let mut fa = vec![IqSample::new(0.0, 0.0); size];
    fa[..a.len()].copy_from_slice(a);
    let mut fb = vec![IqSample::new(0.0, 0.0); size];
    fb[..b.len()].copy_from_slice(b);

    forward.process(&mut fa);
    forward.process(&mut fb);

    // A * conj(B), then back to the lag domain (rustfft leaves the 1/N to us)
    for (x, y) in fa.iter_mut().zip(fb.iter()) {
        *x *= y.conj();
    }
    inverse.process(&mut fa);
    let scale = 1.0 / size as f64;

    // Circular result: non-negative lags at the front, negative lags wrapped to the end
    let lb = b.len() as isize;
    (0..out_len)
        .map(|idx| {
            let lag = idx as isize - (lb - 1);
            let pos = if lag >= 0 { lag as usize } else { (size as isize + lag) as usize };
            fa[pos] * scale
        })
        .collect()
}

/// First lag with the largest |r|
///
/// `b_len` is the length of the second sequence passed to `cross_correlate`.
pub fn find_peak(correlation: &[IqSample], b_len: usize) -> Option<CorrelationPeak> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, value) in correlation.iter().enumerate() {
        let magnitude = value.norm();
        if best.map_or(true, |(_, m)| magnitude > m) {
            best = Some((idx, magnitude));
        }
    }
    best.map(|(idx, magnitude)| CorrelationPeak {
        lag: idx as isize - (b_len as isize - 1),
        magnitude,
    })
}

/// Measure the TDOA between two captures
///
/// # Errors
/// `SampleRateMismatch` if the rates differ at all.
pub fn correlate_pair(
    a: &StationCapture,
    b: &StationCapture,
    config: &CorrelatorConfig,
) -> Result<PairwiseTdoa, TdoaError> {
    if a.sample_rate != b.sample_rate {
        return Err(TdoaError::SampleRateMismatch {
            station_a: a.station_id.clone(),
            station_b: b.station_id.clone(),
            rate_a: a.sample_rate,
            rate_b: b.sample_rate,
        });
    }
    let rate = a.sample_rate;

    let n = analysis_window(a.samples.len(), b.samples.len(), rate, config.window_seconds);
    let sig_a = normalize(&a.samples[..n], config.epsilon);
    let sig_b = normalize(&b.samples[..n], config.epsilon);

    let correlation = cross_correlate(&sig_a, &sig_b, config.method);
    let peak = find_peak(&correlation, sig_b.len()).unwrap_or(CorrelationPeak {
        lag: 0,
        magnitude: 0.0,
    });

    let raw_delay = peak.lag as f64 / rate;
    let delay_seconds = raw_delay + (a.start_timestamp - b.start_timestamp);

    debug!(
        station_a = %a.station_id,
        station_b = %b.station_id,
        window = n,
        lag = peak.lag,
        raw_delay,
        delay_seconds,
        quality = peak.magnitude,
        "Correlated pair"
    );

    Ok(PairwiseTdoa {
        station_a: a.station_id.clone(),
        station_b: b.station_id.clone(),
        delay_seconds,
        quality: peak.magnitude,
    })
}

/// Correlate every station pair in the set
///
/// Pairs with mismatched sample rates are reported in `skipped` and do not
/// stop the remaining pairs.
pub fn correlate_all(set: &CaptureSet, config: &CorrelatorConfig) -> CorrelationReport {
    let mut report = CorrelationReport::default();

    for (a, b) in set.pairs() {
        match correlate_pair(a, b, config) {
            Ok(tdoa) => {
                info!(
                    "TDOA {}-{}: {:+.2} us ({:+.1} m), correlation peak {:.3}",
                    tdoa.station_a,
                    tdoa.station_b,
                    tdoa.delay_seconds * 1e6,
                    tdoa.distance_difference(),
                    tdoa.quality
                );
                report.measurements.push(tdoa);
            }
            Err(e) => {
                warn!("Skipping pair {}-{}: {}", a.station_id, b.station_id, e);
                report.skipped.push(SkippedPair {
                    station_a: a.station_id.clone(),
                    station_b: b.station_id.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    info!(
        "Processed {} station pairs ({} skipped)",
        report.measurements.len(),
        report.skipped.len()
    );
    report
}
