//! One rank of a distributed training run: rank topology, static
//! configuration, the simulation-engine boundary and the training-loop
//! driver that ties them to the collective channel and the optimizer
//! pipeline.

pub mod config;
pub mod driver;
pub mod error;
pub mod metrics;
pub mod rate;
pub mod report;
pub mod sim;
pub mod topology;

pub use config::TrainConfig;
pub use driver::{RunSummary, TrainingLoop};
pub use error::{TopologyErr, TrainErr};
pub use topology::RankTopology;
