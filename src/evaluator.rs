// Result evaluation
//
// Turns the planar solver output back into geodetic coordinates and packages
// it, with the per-pair measurements and an optional error against a known
// transmitter, into the ResultRecord handed to reporting sinks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::SPEED_OF_LIGHT;
use crate::correlator::PairwiseTdoa;
use crate::geodesy::LocalProjector;
use crate::solver::PositionEstimate;
use crate::station::{ReferencePosition, StationPosition};

/// One row of the per-pair measurement table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairReport {
    pub station_a: String,
    pub station_b: String,
    pub tdoa_seconds: f64,
    pub tdoa_microseconds: f64,
    pub distance_difference_meters: f64,
    pub quality: f64,
}

impl From<&PairwiseTdoa> for PairReport {
    fn from(tdoa: &PairwiseTdoa) -> Self {
        PairReport {
            station_a: tdoa.station_a.clone(),
            station_b: tdoa.station_b.clone(),
            tdoa_seconds: tdoa.delay_seconds,
            tdoa_microseconds: tdoa.delay_seconds * 1e6,
            distance_difference_meters: tdoa.delay_seconds * SPEED_OF_LIGHT,
            quality: tdoa.quality,
        }
    }
}

/// Final localization artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    pub generated_at: DateTime<Utc>,
    /// Representative start timestamp of the capture set (s since epoch)
    pub capture_epoch: f64,
    /// Stations whose positions fed the solver, with their surveyed coordinates
    pub station_positions: Vec<StationPosition>,
    pub projection: LocalProjector,
    pub latitude: f64,
    pub longitude: f64,
    /// Sum of squared TDOA errors (s^2)
    pub residual: f64,
    pub converged: bool,
    pub iterations: usize,
    pub pairs: Vec<PairReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<ReferencePosition>,
    /// Planar distance between estimate and reference (m)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_meters: Option<f64>,
}

/// Run-level facts the evaluator does not derive itself
#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
    pub capture_epoch: f64,
    pub stations: Vec<StationPosition>,
}

/// Convert a planar estimate into a `ResultRecord`
///
/// `projector` must be the one the station positions were projected with.
/// The error against `reference` uses the same local-frame approximation,
/// not a geodesic distance.
pub fn evaluate(
    estimate: &PositionEstimate,
    projector: &LocalProjector,
    measurements: &[PairwiseTdoa],
    reference: Option<&ReferencePosition>,
    context: EvaluationContext,
) -> ResultRecord {
    let (latitude, longitude) = projector.inverse(&estimate.position);

    let error_meters = reference.map(|r| {
        projector
            .forward(r.latitude, r.longitude)
            .distance_to(&estimate.position)
    });

    ResultRecord {
        generated_at: Utc::now(),
        capture_epoch: context.capture_epoch,
        station_positions: context.stations,
        projection: *projector,
        latitude,
        longitude,
        residual: estimate.residual,
        converged: estimate.converged,
        iterations: estimate.iterations,
        pairs: measurements.iter().map(PairReport::from).collect(),
        reference: reference.cloned(),
        error_meters,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geodesy::PlanarPoint;

    fn estimate_at(x: f64, y: f64) -> PositionEstimate {
        PositionEstimate {
            position: PlanarPoint::new(x, y),
            residual: 1e-18,
            converged: true,
            iterations: 6,
        }
    }

    #[test]
    fn test_inverse_projection() {
        let proj = LocalProjector::new(41.25, -96.05);
        let p = proj.forward(41.2619, -96.0819);
        let context = EvaluationContext::default();
        let record = evaluate(&estimate_at(p.x, p.y), &proj, &[], None, context);
        assert!((record.latitude - 41.2619).abs() < 1e-9);
        assert!((record.longitude + 96.0819).abs() < 1e-9);
        assert!(record.error_meters.is_none());
        assert!(record.converged);
        assert_eq!(record.iterations, 6);
    }

    #[test]
    fn test_error_is_planar_distance() {
        let proj = LocalProjector::new(41.25, -96.05);
        let reference = ReferencePosition::new(41.2619, -96.0819);
        let truth = proj.forward(reference.latitude, reference.longitude);
        let record = evaluate(
            &estimate_at(truth.x + 300.0, truth.y - 400.0),
            &proj,
            &[],
            Some(&reference),
            EvaluationContext::default(),
        );
        let error = record.error_meters.unwrap();
        assert!((error - 500.0).abs() < 1e-6, "error {}", error);
        assert_eq!(record.reference, Some(reference));
    }

    #[test]
    fn test_pair_table() {
        let proj = LocalProjector::new(0.0, 0.0);
        let pairs = vec![PairwiseTdoa {
            station_a: "station1".into(),
            station_b: "station2".into(),
            delay_seconds: -12.5e-6,
            quality: 812.0,
        }];
        let record = evaluate(
            &estimate_at(0.0, 0.0),
            &proj,
            &pairs,
            None,
            EvaluationContext {
                capture_epoch: 1751236060.0,
                stations: vec![
                    StationPosition::new("station1", 0.01, 0.0).with_name("West"),
                    StationPosition::new("station2", 0.0, 0.01),
                    StationPosition::new("station3", -0.01, -0.01),
                ],
            },
        );
        assert_eq!(record.pairs.len(), 1);
        let row = &record.pairs[0];
        assert!((row.tdoa_microseconds + 12.5).abs() < 1e-9);
        assert!((row.distance_difference_meters + 12.5e-6 * SPEED_OF_LIGHT).abs() < 1e-9);
        assert_eq!(row.quality, 812.0);
        assert_eq!(record.station_positions.len(), 3);
        assert_eq!(record.capture_epoch, 1751236060.0);

        // Station coordinates travel with the record for map consumers
        let json = serde_json::to_value(&record).unwrap();
        let first = &json["station_positions"][0];
        assert_eq!(first["id"], "station1");
        assert_eq!(first["name"], "West");
        assert_eq!(first["lat"].as_f64(), Some(0.01));
        assert_eq!(json["station_positions"][2]["lon"].as_f64(), Some(-0.01));
    }

    #[test]
    fn test_record_serializes_without_reference() {
        let proj = LocalProjector::new(41.25, -96.05);
        let context = EvaluationContext::default();
        let record = evaluate(&estimate_at(10.0, 10.0), &proj, &[], None, context);
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("error_meters").is_none());
        assert!(json.get("reference").is_none());
        assert_eq!(json["converged"], serde_json::Value::Bool(true));
    }
}
