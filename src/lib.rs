
pub mod constants;
pub mod error;
pub mod geodesy;
pub mod capture;
pub mod station;
pub mod synchronizer;
pub mod correlator;
pub mod solver;
pub mod evaluator;
pub mod pipeline;
pub mod scenario;
pub mod simulate;
pub mod output;
pub mod config;

pub use capture::{IqSample, StationCapture};
pub use error::TdoaError;
pub use evaluator::ResultRecord;
pub use pipeline::{Outcome, Pipeline, PipelineConfig};
pub use station::{ReferencePosition, StationPosition, StationTable};
