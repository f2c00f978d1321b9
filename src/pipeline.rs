// End-to-end TDOA localization run
//
// synchronize -> correlate -> (quality gate) -> project -> solve -> evaluate
//
// Each stage consumes the previous stage's output by reference and produces a
// fresh value. Data-availability failures abort before the solver; per-pair
// failures are absorbed by the correlator; solver reliability travels in the
// result fields.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::capture::StationCapture;
use crate::constants::MIN_MULTILATERATION_STATIONS;
use crate::correlator::{correlate_all, CorrelatorConfig, PairwiseTdoa, SkippedPair};
use crate::error::TdoaError;
use crate::evaluator::{evaluate, EvaluationContext, ResultRecord};
use crate::geodesy::LocalProjector;
use crate::solver::{solve, SolverConfig};
use crate::station::{ReferencePosition, StationPosition, StationTable};
use crate::synchronizer::{synchronize, SyncConfig};

/// Hyperbolas needed to fix a planar position
const MIN_INDEPENDENT_MEASUREMENTS: usize = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub sync: SyncConfig,
    pub correlator: CorrelatorConfig,
    pub solver: SolverConfig,
    /// Drop pairs whose correlation quality is below this before solving
    pub min_quality: Option<f64>,
    /// Distinct located stations the surviving pairs must span before the solver runs
    pub min_multilateration_stations: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            sync: SyncConfig::default(),
            correlator: CorrelatorConfig::default(),
            solver: SolverConfig::default(),
            min_quality: None,
            min_multilateration_stations: MIN_MULTILATERATION_STATIONS,
        }
    }
}

/// Result of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Located(ResultRecord),
    /// Too few usable stations or measurements; the solver was not invoked
    InsufficientForMultilateration {
        capture_epoch: f64,
        stations: Vec<String>,
        pairs: Vec<PairwiseTdoa>,
        skipped: Vec<SkippedPair>,
    },
}

impl Outcome {
    pub fn record(&self) -> Option<&ResultRecord> {
        match self {
            Outcome::Located(record) => Some(record),
            Outcome::InsufficientForMultilateration { .. } => None,
        }
    }
}

pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Pipeline { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Locate the transmitter from a batch of captures
    ///
    /// # Errors
    /// * `DataNotFound` when no usable capture exists
    /// * `InsufficientStations` when the synchronized set is too small for any TDOA
    pub fn run<I>(
        &self,
        captures: I,
        stations: &StationTable,
        reference: Option<&ReferencePosition>,
    ) -> Result<Outcome, TdoaError>
    where
        I: IntoIterator<Item = StationCapture>,
    {
        let set = synchronize(captures, &self.config.sync)?;
        let report = correlate_all(&set, &self.config.correlator);

        let measurements = match self.config.min_quality {
            Some(min) => apply_quality_gate(report.measurements, min),
            None => report.measurements,
        };

        let in_set: Vec<&str> = set.station_ids().collect();
        for id in &in_set {
            if !stations.contains(id) {
                warn!("No position known for {}; excluded from multilateration", id);
            }
        }

        // Only pairs that survived correlation and gating constrain the solver
        let usable: Vec<&PairwiseTdoa> = measurements
            .iter()
            .filter(|m| stations.contains(&m.station_a) && stations.contains(&m.station_b))
            .collect();
        let covered: BTreeSet<&str> = usable
            .iter()
            .flat_map(|m| [m.station_a.as_str(), m.station_b.as_str()])
            .collect();
        let locatable = stations.subset(covered.iter().copied());

        if locatable.len() < self.config.min_multilateration_stations
            || usable.len() < MIN_INDEPENDENT_MEASUREMENTS
        {
            warn!(
                "Insufficient for multilateration: {} stations (need {}), {} pairs (need {})",
                locatable.len(),
                self.config.min_multilateration_stations,
                usable.len(),
                MIN_INDEPENDENT_MEASUREMENTS
            );
            return Ok(Outcome::InsufficientForMultilateration {
                capture_epoch: set.epoch(),
                stations: in_set.iter().map(|s| s.to_string()).collect(),
                pairs: measurements,
                skipped: report.skipped,
            });
        }

        let Some(projector) =
            LocalProjector::centered_on(locatable.iter().map(|s| (s.latitude, s.longitude)))
        else {
            return Err(TdoaError::InsufficientStations {
                found: 0,
                required: self.config.min_multilateration_stations,
            });
        };
        let planar = stations.project(&locatable, &projector);
        let station_positions: Vec<StationPosition> =
            locatable.iter().map(|&s| s.clone()).collect();

        info!(
            "Performing multilateration with {} stations, {} pairs",
            locatable.len(),
            usable.len()
        );
        let estimate = solve(&planar, &measurements, &self.config.solver);

        let record = evaluate(
            &estimate,
            &projector,
            &measurements,
            reference,
            EvaluationContext {
                capture_epoch: set.epoch(),
                stations: station_positions,
            },
        );

        info!(
            "Estimated transmitter position: {:.6}, {:.6} (residual {:.3e}, converged {})",
            record.latitude, record.longitude, record.residual, record.converged
        );
        if let Some(error) = record.error_meters {
            info!("Position error: {:.1} meters", error);
        }

        Ok(Outcome::Located(record))
    }
}

/// Keep only pairs with quality >= `min_quality`
pub fn apply_quality_gate(
    measurements: Vec<PairwiseTdoa>,
    min_quality: f64,
) -> Vec<PairwiseTdoa> {
    measurements
        .into_iter()
        .filter(|m| {
            let keep = m.quality >= min_quality;
            if !keep {
                warn!(
                    "Dropping pair {}-{}: quality {:.3} below {:.3}",
                    m.station_a, m.station_b, m.quality, min_quality
                );
            }
            keep
        })
        .collect()
}
