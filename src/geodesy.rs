// Geodesy module - local planar projection
//
// Converts between geodetic latitude/longitude (degrees) and a local
// east/north frame in meters, centered on a caller-supplied reference point.
//
// This is a small-area equirectangular approximation. Distance error grows
// with distance from the reference and with latitude (the longitude scale
// factor collapses near the poles). It is meant for station networks
// spanning tens of kilometers. No ellipsoidal correction is applied.

use serde::{Deserialize, Serialize};

use crate::constants::METERS_PER_DEGREE;

/// A point in the local planar frame (x east, y north), meters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlanarPoint {
    pub x: f64,
    pub y: f64,
}

impl PlanarPoint {
    pub fn new(x: f64, y: f64) -> Self {
        PlanarPoint { x, y }
    }

    /// Euclidean distance to another point in the same frame
    #[inline]
    pub fn distance_to(&self, other: &PlanarPoint) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Arithmetic mean of a set of points, `None` when empty
    pub fn centroid<'a, I>(points: I) -> Option<PlanarPoint>
    where
        I: IntoIterator<Item = &'a PlanarPoint>,
    {
        let mut n = 0usize;
        let (mut sx, mut sy) = (0.0, 0.0);
        for p in points {
            sx += p.x;
            sy += p.y;
            n += 1;
        }
        if n == 0 {
            return None;
        }
        Some(PlanarPoint::new(sx / n as f64, sy / n as f64))
    }
}

/// Bidirectional lat/lon <-> local meters mapping around a fixed reference
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocalProjector {
    pub ref_lat: f64,
    pub ref_lon: f64,
}

impl LocalProjector {
    pub fn new(ref_lat: f64, ref_lon: f64) -> Self {
        LocalProjector { ref_lat, ref_lon }
    }

    /// Reference at the mean latitude/longitude of the given points
    ///
    /// # Returns
    /// `None` if `points` is empty
    pub fn centered_on<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let mut n = 0usize;
        let (mut slat, mut slon) = (0.0, 0.0);
        for (lat, lon) in points {
            slat += lat;
            slon += lon;
            n += 1;
        }
        if n == 0 {
            return None;
        }
        Some(LocalProjector::new(slat / n as f64, slon / n as f64))
    }

    #[inline]
    fn meters_per_degree_lon(&self) -> f64 {
        METERS_PER_DEGREE * self.ref_lat.to_radians().cos()
    }

    /// Geodetic (degrees) to local planar (meters)
    ///
    /// # Example
    /// ```
    /// use tdoa_locate::geodesy::LocalProjector;
    /// let proj = LocalProjector::new(41.25, -96.05);
    /// let p = proj.forward(41.26, -96.05);
    /// assert!((p.y - 1113.2).abs() < 1e-6);
    /// ```
    pub fn forward(&self, lat: f64, lon: f64) -> PlanarPoint {
        PlanarPoint {
            x: (lon - self.ref_lon) * self.meters_per_degree_lon(),
            y: (lat - self.ref_lat) * METERS_PER_DEGREE,
        }
    }

    /// Local planar (meters) back to geodetic (degrees), returned as (lat, lon)
    pub fn inverse(&self, point: &PlanarPoint) -> (f64, f64) {
        let lat = self.ref_lat + point.y / METERS_PER_DEGREE;
        let lon = self.ref_lon + point.x / self.meters_per_degree_lon();
        (lat, lon)
    }

    /// Planar distance in meters between two geodetic points
    ///
    /// Uses the same local-frame approximation as `forward`, not a geodesic.
    pub fn planar_distance(&self, a: (f64, f64), b: (f64, f64)) -> f64 {
        self.forward(a.0, a.1).distance_to(&self.forward(b.0, b.1))
    }
}
