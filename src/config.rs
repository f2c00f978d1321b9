// Command-line configuration

use std::path::PathBuf;

use clap::{ArgGroup, Parser, ValueEnum};

use crate::pipeline::PipelineConfig;
use crate::synchronizer::TieBreak;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TieBreakArg {
    Earliest,
    Latest,
}

impl From<TieBreakArg> for TieBreak {
    fn from(arg: TieBreakArg) -> Self {
        match arg {
            TieBreakArg::Earliest => TieBreak::EarliestRepresentative,
            TieBreakArg::Latest => TieBreak::LatestRepresentative,
        }
    }
}

/// TDOA transmitter locator
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(group(ArgGroup::new("input").required(true).args(["scenario", "simulate"])))]
pub struct Config {
    /// Scenario JSON naming stations, reference and capture files
    #[arg(long, value_name = "FILE")]
    pub scenario: Option<PathBuf>,

    /// Generate captures of the built-in station layout instead of loading a scenario
    #[arg(long)]
    pub simulate: bool,

    /// Directory for tdoa_results.json (and the simulated scenario)
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub work_dir: PathBuf,

    /// Capture synchronization tolerance in seconds
    #[arg(long, value_name = "SECONDS")]
    pub tolerance: Option<f64>,

    /// Correlation analysis window in milliseconds
    #[arg(long, value_name = "MS")]
    pub window_ms: Option<f64>,

    /// Drop station pairs whose correlation quality is below this
    #[arg(long, value_name = "QUALITY")]
    pub min_quality: Option<f64>,

    /// Which capture run wins when several have the same station count
    #[arg(long, value_enum)]
    pub tie_break: Option<TieBreakArg>,

    /// Append the per-pair table in CSV format to a local file
    #[arg(long, value_name = "FILE")]
    pub write_csv: Option<PathBuf>,

    /// Serve the work directory over HTTP on this port until Ctrl+C
    #[arg(long, value_name = "PORT")]
    pub http_port: Option<u16>,

    /// Verbose logging (DEBUG level)
    #[arg(long, short, default_value_t = false)]
    pub verbose: bool,
}

impl Config {
    /// Overlay command-line overrides on a scenario's pipeline settings
    pub fn apply_to(&self, pipeline: &mut PipelineConfig) {
        if let Some(tolerance) = self.tolerance {
            pipeline.sync.tolerance = tolerance;
        }
        if let Some(ms) = self.window_ms {
            pipeline.correlator.window_seconds = ms / 1000.0;
        }
        if let Some(min) = self.min_quality {
            pipeline.min_quality = Some(min);
        }
        if let Some(tie_break) = self.tie_break {
            pipeline.sync.tie_break = tie_break.into();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scenario_args() {
        let config = Config::try_parse_from([
            "tdoa-locate",
            "--scenario",
            "run/scenario.json",
            "--tolerance",
            "0.5",
            "--window-ms",
            "50",
            "--tie-break",
            "latest",
            "-v",
        ])
        .unwrap();

        assert_eq!(config.scenario, Some(PathBuf::from("run/scenario.json")));
        assert_eq!(config.work_dir, PathBuf::from("."));
        assert!(config.verbose);

        let mut pipeline = PipelineConfig::default();
        config.apply_to(&mut pipeline);
        assert_eq!(pipeline.sync.tolerance, 0.5);
        assert!((pipeline.correlator.window_seconds - 0.05).abs() < 1e-12);
        assert_eq!(pipeline.sync.tie_break, TieBreak::LatestRepresentative);
        assert!(pipeline.min_quality.is_none());
    }

    #[test]
    fn test_overrides_leave_unset_fields() {
        let config =
            Config::try_parse_from(["tdoa-locate", "--simulate", "--min-quality", "4"]).unwrap();
        let mut pipeline = PipelineConfig::default();
        pipeline.sync.tolerance = 2.0;
        config.apply_to(&mut pipeline);
        assert_eq!(pipeline.sync.tolerance, 2.0);
        assert_eq!(pipeline.min_quality, Some(4.0));
    }

    #[test]
    fn test_input_required() {
        assert!(Config::try_parse_from(["tdoa-locate"]).is_err());
        let both = Config::try_parse_from(["tdoa-locate", "--simulate", "--scenario", "a.json"]);
        assert!(both.is_err());
    }
}
