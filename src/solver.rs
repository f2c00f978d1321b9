// Multilateration solver using least-squares optimization
//
// Minimizes the classical hyperbolic TDOA objective
//
//     sum_i ((|p - A_i| - |p - B_i|) / c - tdoa_i)^2
//
// over the planar transmitter position p. Internally the residuals are kept
// in meters (range differences) for conditioning; the reported residual is
// converted back to seconds squared.
//
// A single Levenberg-Marquardt run is started from the centroid of the
// stations. The objective is non-convex for near-degenerate geometry and no
// attempt is made to escape local minima. The solver never fails: the
// `converged` flag and the residual carry the reliability signal.

use std::collections::BTreeMap;

use nalgebra as na;
use na::{DMatrix, DVector, Vector2};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::{SOLVER_MAX_ITERATIONS, SPEED_OF_LIGHT};
use crate::correlator::PairwiseTdoa;
use crate::geodesy::PlanarPoint;

/// Range cost (m^2) treated as an exact fit
const COST_FLOOR: f64 = 1e-12;

/// Damping retries per iteration before giving up on a step
const MAX_DAMPING_STEPS: usize = 10;

const MAX_DAMPING: f64 = 1e10;
const MIN_DAMPING: f64 = 1e-10;

/// Relative step (m per m of |x|) below which a stall is a numerical minimum
const STALL_STEP_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub max_iterations: usize,
    /// Relative cost reduction below which an accepted step counts as converged
    pub ftol: f64,
    /// Relative step size below which an accepted step counts as converged
    pub xtol: f64,
    /// Gradient max-norm (m) below which the current point counts as converged
    pub gtol: f64,
    /// Initial Levenberg-Marquardt damping
    pub initial_damping: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            max_iterations: SOLVER_MAX_ITERATIONS,
            ftol: 1e-10,
            xtol: 1e-10,
            gtol: 1e-10,
            initial_damping: 0.1,
        }
    }
}

/// Solver output in the local planar frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionEstimate {
    pub position: PlanarPoint,
    /// Sum of squared TDOA errors (s^2)
    pub residual: f64,
    pub converged: bool,
    pub iterations: usize,
}

/// Predicted TDOA (s) at `p` for the pair (a, b)
#[inline]
pub fn predicted_tdoa(p: &PlanarPoint, a: &PlanarPoint, b: &PlanarPoint) -> f64 {
    (p.distance_to(a) - p.distance_to(b)) / SPEED_OF_LIGHT
}

/// Objective value (s^2) at `p`; measurements naming unknown stations are ignored
pub fn objective(
    stations: &BTreeMap<String, PlanarPoint>,
    measurements: &[PairwiseTdoa],
    p: &PlanarPoint,
) -> f64 {
    measurements
        .iter()
        .filter_map(|m| {
            let a = stations.get(&m.station_a)?;
            let b = stations.get(&m.station_b)?;
            let err = predicted_tdoa(p, a, b) - m.delay_seconds;
            Some(err * err)
        })
        .sum()
}

/// One range-difference equation
struct HyperbolaRow {
    a: Vector2<f64>,
    b: Vector2<f64>,
    /// Measured |p - A| - |p - B| (m)
    range_diff: f64,
}

/// Least-squares problem for TDOA position solving
struct TdoaProblem {
    rows: Vec<HyperbolaRow>,
}

impl TdoaProblem {
    fn new(stations: &BTreeMap<String, PlanarPoint>, measurements: &[PairwiseTdoa]) -> Self {
        let rows = measurements
            .iter()
            .filter_map(|m| match (stations.get(&m.station_a), stations.get(&m.station_b)) {
                (Some(a), Some(b)) => Some(HyperbolaRow {
                    a: Vector2::new(a.x, a.y),
                    b: Vector2::new(b.x, b.y),
                    range_diff: m.delay_seconds * SPEED_OF_LIGHT,
                }),
                _ => {
                    debug!(
                        station_a = %m.station_a,
                        station_b = %m.station_b,
                        "Ignoring measurement with unknown station position"
                    );
                    None
                }
            })
            .collect();
        TdoaProblem { rows }
    }

    /// Range residuals (m) for a candidate position
    fn compute_residuals(&self, x: &Vector2<f64>) -> DVector<f64> {
        DVector::from_iterator(
            self.rows.len(),
            self.rows
                .iter()
                .map(|row| (x - row.a).norm() - (x - row.b).norm() - row.range_diff),
        )
    }

    fn cost(&self, x: &Vector2<f64>) -> f64 {
        self.compute_residuals(x).norm_squared()
    }

    /// Analytic Jacobian: difference of unit vectors from each station toward x
    fn compute_jacobian(&self, x: &Vector2<f64>) -> DMatrix<f64> {
        let mut jacobian = DMatrix::zeros(self.rows.len(), 2);
        for (i, row) in self.rows.iter().enumerate() {
            let grad = unit(x - row.a) - unit(x - row.b);
            jacobian[(i, 0)] = grad.x;
            jacobian[(i, 1)] = grad.y;
        }
        jacobian
    }
}

#[inline]
fn unit(v: Vector2<f64>) -> Vector2<f64> {
    let n = v.norm();
    if n > 0.0 {
        v / n
    } else {
        Vector2::zeros()
    }
}

/// Estimate the transmitter position from pairwise TDOA measurements
///
/// # Arguments
/// * `stations` - Station id -> planar position (the centroid of these is the seed)
/// * `measurements` - Pairwise TDOA; pairs naming stations not in `stations` are ignored
/// * `config` - Iteration cap and stopping tolerances
///
/// # Returns
/// The final position, its residual (s^2) and whether a stopping criterion was met.
/// With no usable measurements the seed is returned unconverged.
pub fn solve(
    stations: &BTreeMap<String, PlanarPoint>,
    measurements: &[PairwiseTdoa],
    config: &SolverConfig,
) -> PositionEstimate {
    let seed = PlanarPoint::centroid(stations.values()).unwrap_or(PlanarPoint::new(0.0, 0.0));
    let problem = TdoaProblem::new(stations, measurements);

    if problem.rows.is_empty() {
        debug!("No usable TDOA measurements; returning centroid");
        return PositionEstimate {
            position: seed,
            residual: 0.0,
            converged: false,
            iterations: 0,
        };
    }

    let (x, cost, converged, iterations) =
        solve_iterative(&problem, Vector2::new(seed.x, seed.y), config);

    debug!(
        x = x.x,
        y = x.y,
        cost_m2 = cost,
        converged,
        iterations,
        "Solver finished"
    );

    PositionEstimate {
        position: PlanarPoint::new(x.x, x.y),
        residual: cost / (SPEED_OF_LIGHT * SPEED_OF_LIGHT),
        converged,
        iterations,
    }
}

/// Levenberg-Marquardt iteration
///
/// Returns (position, cost in m^2, converged, iterations).
fn solve_iterative(
    problem: &TdoaProblem,
    initial_guess: Vector2<f64>,
    config: &SolverConfig,
) -> (Vector2<f64>, f64, bool, usize) {
    let mut x = initial_guess;
    let mut cost = problem.cost(&x);
    let mut lambda = config.initial_damping;
    let mut converged = false;
    let mut iterations = 0;

    while iterations < config.max_iterations {
        if cost <= COST_FLOOR {
            converged = true;
            break;
        }

        let residuals = problem.compute_residuals(&x);
        let jacobian = problem.compute_jacobian(&x);
        let jt = jacobian.transpose();
        let gradient = &jt * &residuals;
        if gradient.amax() <= config.gtol {
            converged = true;
            break;
        }
        let jtj = &jt * &jacobian;

        iterations += 1;

        // (J^T J + λI) Δx = -J^T r
        let mut accepted = None;
        let mut first_step: Option<f64> = None;
        for _ in 0..MAX_DAMPING_STEPS {
            let mut jtj_damped = jtj.clone();
            for i in 0..2 {
                jtj_damped[(i, i)] += lambda;
            }

            if let Some(inverse) = jtj_damped.try_inverse() {
                let step = -(inverse * &gradient);
                let step = Vector2::new(step[0], step[1]);
                first_step.get_or_insert(step.norm());
                let candidate = x + step;
                let candidate_cost = problem.cost(&candidate);

                if candidate_cost < cost {
                    lambda = (lambda * 0.1).max(MIN_DAMPING);
                    accepted = Some((candidate, candidate_cost, step));
                    break;
                }
            }

            lambda *= 10.0;
            if lambda > MAX_DAMPING {
                break;
            }
        }

        match accepted {
            Some((candidate, candidate_cost, step)) => {
                let reduction = (cost - candidate_cost) / cost;
                let step_small = step.norm() <= config.xtol * (x.norm() + config.xtol);
                x = candidate;
                cost = candidate_cost;
                if reduction <= config.ftol || step_small {
                    converged = true;
                    break;
                }
            }
            None => {
                // Cost is flat to rounding when even the least-damped step is negligible
                let flat = STALL_STEP_TOLERANCE * (x.norm() + 1.0);
                converged = first_step.is_some_and(|n| n <= flat);
                debug!(lambda, cost, converged, "Solver stalled");
                break;
            }
        }
    }

    if !converged && cost <= COST_FLOOR {
        converged = true;
    }

    (x, cost, converged, iterations)
}
