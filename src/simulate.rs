// Synthetic capture generation
//
// Produces a set of StationCaptures for a transmitter at a known position:
// one shared wideband waveform, delayed at each station by its propagation
// time (rounded to whole samples) plus independent receiver noise. Used by the
// tests and by the `--simulate` mode of the binary.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::capture::{IqSample, StationCapture};
use crate::constants::SPEED_OF_LIGHT;
use crate::geodesy::LocalProjector;
use crate::station::{ReferencePosition, StationPosition, StationTable};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub sample_rate: f64,
    pub center_freq: f64,
    /// Samples per capture
    pub num_samples: usize,
    /// Nominal start of every capture (s since epoch)
    pub start_timestamp: f64,
    /// Per-station start times are staggered by up to this many whole samples
    pub max_start_skew_samples: usize,
    /// Peak amplitude of the uniform receiver noise (signal peak is 1.0)
    pub noise_amplitude: f64,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            sample_rate: 2.048e6,
            center_freq: 162.4e6,
            num_samples: 16384,
            start_timestamp: 0.0,
            max_start_skew_samples: 0,
            noise_amplitude: 0.1,
            seed: 1,
        }
    }
}

/// Three receivers around Omaha and the WXL68 NOAA weather transmitter
pub fn demo_layout() -> (StationTable, ReferencePosition) {
    let stations: StationTable = vec![
        StationPosition::new("station1", 41.2565, -96.1969).with_name("West Omaha"),
        StationPosition::new("station2", 41.1543, -95.9145).with_name("Bellevue"),
        StationPosition::new("station3", 41.3148, -95.9378).with_name("North Omaha"),
    ]
    .into_iter()
    .collect();
    let reference = ReferencePosition {
        name: Some("WXL68 NOAA".to_string()),
        latitude: 41.2619,
        longitude: -96.0819,
    };
    (stations, reference)
}

/// Uniform random complex samples, each component in [-1, 1)
pub fn random_baseband<R: Rng>(rng: &mut R, len: usize) -> Vec<IqSample> {
    (0..len)
        .map(|_| IqSample::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)))
        .collect()
}

/// Captures of `transmitter` at every station in `stations`
///
/// Station and transmitter positions are projected around the mean station
/// position, the same frame the pipeline solves in.
pub fn simulate_captures(
    stations: &StationTable,
    transmitter: &ReferencePosition,
    config: &SimulationConfig,
) -> Vec<StationCapture> {
    let centers = stations.iter().map(|s| (s.latitude, s.longitude));
    let Some(projector) = LocalProjector::centered_on(centers) else {
        return Vec::new();
    };
    let tx = projector.forward(transmitter.latitude, transmitter.longitude);
    let mut rng = StdRng::seed_from_u64(config.seed);

    // Propagation delay in whole samples, and a start skew, per station
    let timing: Vec<(usize, usize)> = stations
        .iter()
        .map(|s| {
            let distance = projector.forward(s.latitude, s.longitude).distance_to(&tx);
            let delay = (distance / SPEED_OF_LIGHT * config.sample_rate).round() as usize;
            let skew = if config.max_start_skew_samples > 0 {
                rng.gen_range(0..=config.max_start_skew_samples)
            } else {
                0
            };
            (delay, skew)
        })
        .collect();

    let max_delay = timing.iter().map(|&(d, _)| d).max().unwrap_or(0);
    let max_skew = config.max_start_skew_samples;
    let waveform = random_baseband(&mut rng, config.num_samples + max_delay + max_skew);

    stations
        .iter()
        .zip(timing)
        .map(|(station, (delay, skew))| {
            // Sample j, recorded at start + j/fs, holds waveform[j + skew + max_delay - delay]
            let offset = skew + max_delay - delay;
            let samples = waveform[offset..offset + config.num_samples]
                .iter()
                .map(|s| {
                    let noise = IqSample::new(
                        rng.gen_range(-1.0..1.0) * config.noise_amplitude,
                        rng.gen_range(-1.0..1.0) * config.noise_amplitude,
                    );
                    s + noise
                })
                .collect();
            let start = config.start_timestamp + skew as f64 / config.sample_rate;

            debug!(
                station = %station.station_id,
                delay_samples = delay,
                skew_samples = skew,
                "Simulated capture"
            );

            StationCapture::new(
                station.station_id.clone(),
                start,
                config.sample_rate,
                config.center_freq,
                samples,
            )
        })
        .collect()
}
