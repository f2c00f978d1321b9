// Capture synchronization
//
// Groups raw captures into clusters of (probably) simultaneous recordings and
// picks the best one as the CaptureSet for this run.
//
// Clustering is greedy and order-dependent: each capture joins the open
// cluster with the nearest representative timestamp within tolerance, or
// opens a new one. The representative is fixed when a cluster opens, so a
// cluster's end-to-end span can reach twice the tolerance, and a chain of
// captures near the tolerance edge can split or merge differently depending on
// input order. This is accepted, not corrected.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::capture::StationCapture;
use crate::constants::{MIN_TDOA_STATIONS, SYNC_TOLERANCE};
use crate::error::TdoaError;

/// How to choose between clusters with the same station count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Earliest representative timestamp wins
    #[default]
    EarliestRepresentative,
    /// Most recent collection run wins
    LatestRepresentative,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Max |start_timestamp - representative| to join a cluster (s), inclusive
    pub tolerance: f64,
    pub tie_break: TieBreak,
    /// Fewer stations in the winning cluster is `InsufficientStations`
    pub min_stations: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            tolerance: SYNC_TOLERANCE,
            tie_break: TieBreak::default(),
            min_stations: MIN_TDOA_STATIONS,
        }
    }
}

/// One capture per station, all started within tolerance of `epoch`
#[derive(Debug, Clone)]
pub struct CaptureSet {
    epoch: f64,
    captures: BTreeMap<String, StationCapture>,
}

impl CaptureSet {
    /// Representative timestamp of the cluster this set came from
    pub fn epoch(&self) -> f64 {
        self.epoch
    }

    pub fn len(&self) -> usize {
        self.captures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.captures.is_empty()
    }

    pub fn get(&self, station_id: &str) -> Option<&StationCapture> {
        self.captures.get(station_id)
    }

    /// Station ids in sorted order
    pub fn station_ids(&self) -> impl Iterator<Item = &str> {
        self.captures.keys().map(|s| s.as_str())
    }

    /// Captures in station id order
    pub fn iter(&self) -> impl Iterator<Item = &StationCapture> {
        self.captures.values()
    }

    /// Every unordered station pair, (a, b) with a < b
    pub fn pairs(&self) -> Vec<(&StationCapture, &StationCapture)> {
        let captures: Vec<&StationCapture> = self.captures.values().collect();
        let mut pairs = Vec::with_capacity(captures.len() * captures.len().saturating_sub(1) / 2);
        for i in 0..captures.len() {
            for j in (i + 1)..captures.len() {
                pairs.push((captures[i], captures[j]));
            }
        }
        pairs
    }
}

/// Open cluster during grouping
#[derive(Debug)]
struct Cluster {
    representative: f64,
    members: BTreeMap<String, StationCapture>,
}

impl Cluster {
    fn new(capture: StationCapture) -> Self {
        let representative = capture.start_timestamp;
        let mut members = BTreeMap::new();
        members.insert(capture.station_id.clone(), capture);
        Cluster { representative, members }
    }

    /// Add a capture, keeping only the one closest to the representative per station
    fn add(&mut self, capture: StationCapture) {
        let offset = (capture.start_timestamp - self.representative).abs();
        match self.members.get(&capture.station_id) {
            Some(existing) if (existing.start_timestamp - self.representative).abs() <= offset => {
                debug!(
                    station = %capture.station_id,
                    timestamp = capture.start_timestamp,
                    "Duplicate station capture dropped (farther from representative)"
                );
            }
            _ => {
                self.members.insert(capture.station_id.clone(), capture);
            }
        }
    }
}

/// Group captures by start time and return the cluster with the most stations
///
/// # Arguments
/// * `captures` - Unordered captures, possibly from several runs and several per station
/// * `config` - Tolerance, tie-break and minimum station count
///
/// # Errors
/// * `DataNotFound` if `captures` is empty or every capture is malformed
/// * `InsufficientStations` if the winning cluster has fewer than `config.min_stations`
pub fn synchronize<I>(captures: I, config: &SyncConfig) -> Result<CaptureSet, TdoaError>
where
    I: IntoIterator<Item = StationCapture>,
{
    let mut clusters: Vec<Cluster> = Vec::new();
    let mut total = 0usize;
    let mut malformed = 0usize;

    for capture in captures {
        total += 1;
        if let Err(e) = capture.validate() {
            warn!("Skipping capture: {}", e);
            malformed += 1;
            continue;
        }

        let t = capture.start_timestamp;
        // Nearest representative within tolerance; strict < keeps the earlier cluster on ties
        let mut best: Option<(usize, f64)> = None;
        for (idx, cluster) in clusters.iter().enumerate() {
            let offset = (t - cluster.representative).abs();
            if offset <= config.tolerance && best.map_or(true, |(_, d)| offset < d) {
                best = Some((idx, offset));
            }
        }

        match best {
            Some((idx, _)) => clusters[idx].add(capture),
            None => clusters.push(Cluster::new(capture)),
        }
    }

    debug!("{} captures grouped into {} clusters", total - malformed, clusters.len());

    let winner = match select_cluster(clusters, config.tie_break) {
        Some(winner) => winner,
        None => {
            warn!("No usable captures ({} records, {} malformed)", total, malformed);
            return Err(TdoaError::DataNotFound);
        }
    };

    info!(
        "Using capture set at {:.3} with {} stations: {}",
        winner.representative,
        winner.members.len(),
        winner.members.keys().cloned().collect::<Vec<_>>().join(", ")
    );

    if winner.members.len() < config.min_stations {
        return Err(TdoaError::InsufficientStations {
            found: winner.members.len(),
            required: config.min_stations,
        });
    }

    Ok(CaptureSet {
        epoch: winner.representative,
        captures: winner.members,
    })
}

fn select_cluster(clusters: Vec<Cluster>, tie_break: TieBreak) -> Option<Cluster> {
    clusters.into_iter().reduce(|best, cluster| {
        let more = cluster.members.len() > best.members.len();
        let tied = cluster.members.len() == best.members.len();
        let preferred = match tie_break {
            TieBreak::EarliestRepresentative => cluster.representative < best.representative,
            TieBreak::LatestRepresentative => cluster.representative > best.representative,
        };
        if more || (tied && preferred) {
            cluster
        } else {
            best
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::IqSample;

    fn capture(station: &str, t: f64) -> StationCapture {
        StationCapture::new(station, t, 1e6, 162.4e6, vec![IqSample::new(1.0, 0.5); 8])
    }

    fn ids(set: &CaptureSet) -> Vec<&str> {
        set.station_ids().collect()
    }

    #[test]
    fn test_cluster_excludes_late_capture() {
        let t = 1751236060.0;
        let captures = vec![
            capture("station1", t),
            capture("station2", t + 0.3),
            capture("station3", t + 0.9),
            capture("station4", t + 5.0),
        ];
        let set = synchronize(captures, &SyncConfig::default()).unwrap();
        assert_eq!(ids(&set), vec!["station1", "station2", "station3"]);
        assert_eq!(set.epoch(), t);
    }

    #[test]
    fn test_empty_input() {
        let result = synchronize(Vec::new(), &SyncConfig::default());
        assert!(matches!(result, Err(TdoaError::DataNotFound)));
    }

    #[test]
    fn test_all_malformed_is_data_not_found() {
        let mut bad = capture("station1", 100.0);
        bad.sample_rate = 0.0;
        let mut empty = capture("station2", 100.0);
        empty.samples.clear();
        let result = synchronize(vec![bad, empty], &SyncConfig::default());
        assert!(matches!(result, Err(TdoaError::DataNotFound)));
    }

    #[test]
    fn test_malformed_capture_is_skipped() {
        let mut bad = capture("station3", 100.2);
        bad.sample_rate = -2.0;
        let set = synchronize(
            vec![capture("station1", 100.0), bad, capture("station2", 100.1)],
            &SyncConfig::default(),
        )
        .unwrap();
        assert_eq!(ids(&set), vec!["station1", "station2"]);
    }

    #[test]
    fn test_single_station_is_insufficient() {
        let captures = vec![capture("station1", 100.0), capture("station1", 100.5)];
        let result = synchronize(captures, &SyncConfig::default());
        match result {
            Err(TdoaError::InsufficientStations { found, required }) => {
                assert_eq!(found, 1);
                assert_eq!(required, 2);
            }
            other => panic!("expected InsufficientStations, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_station_keeps_closest() {
        let set = synchronize(
            vec![
                capture("station1", 100.0),
                capture("station2", 100.8),
                capture("station2", 100.1),
                capture("station2", 100.5),
            ],
            &SyncConfig::default(),
        )
        .unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.get("station2").unwrap().start_timestamp, 100.1);
    }

    #[test]
    fn test_joins_nearest_representative() {
        // Two open clusters at 100.0 and 101.5; 100.9 is within tolerance of both
        let set = synchronize(
            vec![
                capture("a", 100.0),
                capture("b", 101.5),
                capture("c", 100.9),
                capture("d", 101.6),
            ],
            &SyncConfig::default(),
        )
        .unwrap();
        assert_eq!(ids(&set), vec!["b", "c", "d"]);
        assert_eq!(set.epoch(), 101.5);
    }

    #[test]
    fn test_tie_break_rules() {
        let captures = || {
            vec![
                capture("station2", 200.0),
                capture("station1", 100.0),
                capture("station2", 100.2),
                capture("station1", 200.1),
            ]
        };

        let earliest = synchronize(captures(), &SyncConfig::default()).unwrap();
        assert_eq!(earliest.epoch(), 100.0);

        let config = SyncConfig {
            tie_break: TieBreak::LatestRepresentative,
            ..SyncConfig::default()
        };
        let latest = synchronize(captures(), &config).unwrap();
        assert_eq!(latest.epoch(), 200.0);
    }

    #[test]
    fn test_chained_captures_span_exceeds_tolerance() {
        // Representative stays at 100.0, so 99.1 and 100.9 share a cluster 1.8 s wide
        let set = synchronize(
            vec![capture("a", 100.0), capture("b", 99.1), capture("c", 100.9)],
            &SyncConfig::default(),
        )
        .unwrap();
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_pairs_are_ordered() {
        let set = synchronize(
            vec![capture("c", 1.0), capture("a", 1.0), capture("b", 1.0)],
            &SyncConfig::default(),
        )
        .unwrap();
        let pairs: Vec<(&str, &str)> = set
            .pairs()
            .iter()
            .map(|(a, b)| (a.station_id.as_str(), b.station_id.as_str()))
            .collect();
        assert_eq!(pairs, vec![("a", "b"), ("a", "c"), ("b", "c")]);
    }
}
