// Shared constants for TDOA processing

/// Propagation speed (m/s). Vacuum speed of light; tropospheric delay is not modeled.
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Meters per degree of latitude used by the local equirectangular projection.
pub const METERS_PER_DEGREE: f64 = 111_320.0;

/// Default synchronization window between capture start timestamps (s).
pub const SYNC_TOLERANCE: f64 = 1.0;

/// Minimum stations in a synchronized set before TDOA can be computed.
pub const MIN_TDOA_STATIONS: usize = 2;

/// Minimum stations with known positions before the solver is invoked.
pub const MIN_MULTILATERATION_STATIONS: usize = 3;

/// Default correlation window (s). Bounds FFT size per pair.
pub const CORRELATION_WINDOW: f64 = 0.1;

/// Added to the standard deviation during normalization so silent captures stay finite.
pub const NORMALIZATION_EPSILON: f64 = 1e-10;

/// Solver iteration cap.
pub const SOLVER_MAX_ITERATIONS: usize = 200;
