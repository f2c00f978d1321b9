// Receiver station positions and the known-transmitter reference

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::geodesy::{LocalProjector, PlanarPoint};

/// Surveyed position of a receiver station
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationPosition {
    #[serde(rename = "id")]
    pub station_id: String,
    #[serde(rename = "lat")]
    pub latitude: f64,
    #[serde(rename = "lon")]
    pub longitude: f64,
    /// Human-readable site name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl StationPosition {
    pub fn new(station_id: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        StationPosition {
            station_id: station_id.into(),
            latitude,
            longitude,
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Known transmitter position, used only for error reporting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferencePosition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "lat")]
    pub latitude: f64,
    #[serde(rename = "lon")]
    pub longitude: f64,
}

impl ReferencePosition {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        ReferencePosition { name: None, latitude, longitude }
    }
}

/// Static station lookup, station id -> position
///
/// Supplied to the pipeline by reference and never mutated by it.
#[derive(Debug, Clone, Default)]
pub struct StationTable {
    stations: BTreeMap<String, StationPosition>,
}

impl StationTable {
    pub fn new() -> Self {
        StationTable::default()
    }

    /// Insert a station, replacing any earlier entry with the same id
    pub fn insert(&mut self, station: StationPosition) {
        self.stations.insert(station.station_id.clone(), station);
    }

    pub fn get(&self, station_id: &str) -> Option<&StationPosition> {
        self.stations.get(station_id)
    }

    pub fn contains(&self, station_id: &str) -> bool {
        self.stations.contains_key(station_id)
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StationPosition> {
        self.stations.values()
    }

    /// Positions of the listed stations that the table knows about, in id order
    pub fn subset<'a, I>(&self, ids: I) -> Vec<&StationPosition>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut out: Vec<&StationPosition> =
            ids.into_iter().filter_map(|id| self.get(id)).collect();
        out.sort_by(|a, b| a.station_id.cmp(&b.station_id));
        out.dedup_by(|a, b| a.station_id == b.station_id);
        out
    }

    /// Project the listed stations into a local frame
    pub fn project(
        &self,
        stations: &[&StationPosition],
        projector: &LocalProjector,
    ) -> BTreeMap<String, PlanarPoint> {
        stations
            .iter()
            .map(|s| (s.station_id.clone(), projector.forward(s.latitude, s.longitude)))
            .collect()
    }
}

impl FromIterator<StationPosition> for StationTable {
    fn from_iter<T: IntoIterator<Item = StationPosition>>(iter: T) -> Self {
        let mut table = StationTable::new();
        for station in iter {
            table.insert(station);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn omaha() -> StationTable {
        vec![
            StationPosition::new("station1", 41.2565, -96.1969).with_name("West Omaha"),
            StationPosition::new("station2", 41.1543, -95.9145).with_name("Bellevue"),
            StationPosition::new("station3", 41.3148, -95.9378).with_name("North Omaha"),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_table_lookup() {
        let table = omaha();
        assert_eq!(table.len(), 3);
        assert!(table.contains("station2"));
        assert_eq!(table.get("station1").unwrap().name.as_deref(), Some("West Omaha"));
        assert!(table.get("station9").is_none());
    }

    #[test]
    fn test_subset_skips_unknown_and_sorts() {
        let table = omaha();
        let subset = table.subset(vec!["station3", "station9", "station1"]);
        let ids: Vec<&str> = subset.iter().map(|s| s.station_id.as_str()).collect();
        assert_eq!(ids, vec!["station1", "station3"]);
    }

    #[test]
    fn test_project_uses_projector() {
        let table = omaha();
        let stations = table.subset(vec!["station1", "station2"]);
        let proj = LocalProjector::new(41.2565, -96.1969);
        let xy = table.project(&stations, &proj);
        assert!(xy["station1"].x.abs() < 1e-9);
        assert!(xy["station2"].x > 0.0);
        assert!(xy["station2"].y < 0.0);
    }

    #[test]
    fn test_station_json_field_names() {
        let json = r#"{"id": "station1", "lat": 41.2, "lon": -96.1}"#;
        let s: StationPosition = serde_json::from_str(json).unwrap();
        assert_eq!(s.station_id, "station1");
        assert!(s.name.is_none());
    }
}
