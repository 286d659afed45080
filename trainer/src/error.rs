use std::{error::Error, fmt, io};

use collective::{BootstrapErr, CollectiveErr};
use learning::{CheckpointErr, ShapeMismatchErr};

/// The trainer's result type.
pub type Result<T> = std::result::Result<T, TrainErr>;

/// Rank/group resolution failures, raised before any collective is
/// attempted.
#[derive(Debug)]
pub enum TopologyErr {
    MissingEnv {
        var: &'static str,
    },
    InvalidEnv {
        var: &'static str,
        value: String,
    },
    InvalidRank {
        rank: usize,
        num_ranks: usize,
    },
    /// Fewer examples than ranks; at least one slice would be empty.
    InsufficientData {
        total: usize,
        num_ranks: usize,
    },
}

impl fmt::Display for TopologyErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopologyErr::MissingEnv { var } => {
                write!(f, "environment variable {var} is not set")
            }
            TopologyErr::InvalidEnv { var, value } => {
                write!(f, "environment variable {var} has invalid value `{value}`")
            }
            TopologyErr::InvalidRank { rank, num_ranks } => {
                write!(f, "rank {rank} outside group of {num_ranks}")
            }
            TopologyErr::InsufficientData { total, num_ranks } => write!(
                f,
                "{total} training examples cannot be split across {num_ranks} ranks"
            ),
        }
    }
}

impl Error for TopologyErr {}

/// Run-fatal training failures.
///
/// Everything here terminates the whole distributed run: correctness
/// depends on each rank executing the identical collective sequence, so
/// masking a failure on one rank while the others proceed is unsafe. The
/// diagnostic carries enough context (rank, epoch, batch, operation) to
/// locate the failing site.
#[derive(Debug)]
pub enum TrainErr {
    Topology(TopologyErr),
    Bootstrap(BootstrapErr),
    Collective {
        rank: usize,
        epoch: usize,
        batch: usize,
        op: String,
        source: CollectiveErr,
    },
    Shape(ShapeMismatchErr),
    Checkpoint(CheckpointErr),
    Config {
        reason: String,
    },
    Io(io::Error),
}

impl fmt::Display for TrainErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainErr::Topology(e) => write!(f, "topology error: {e}"),
            TrainErr::Bootstrap(e) => write!(f, "bootstrap error: {e}"),
            TrainErr::Collective {
                rank,
                epoch,
                batch,
                op,
                source,
            } => write!(
                f,
                "collective failure on rank {rank} (epoch {epoch}, batch {batch}, {op}): {source}"
            ),
            TrainErr::Shape(e) => write!(f, "{e}"),
            TrainErr::Checkpoint(e) => write!(f, "{e}"),
            TrainErr::Config { reason } => write!(f, "invalid configuration: {reason}"),
            TrainErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for TrainErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TrainErr::Topology(e) => Some(e),
            TrainErr::Bootstrap(e) => Some(e),
            TrainErr::Collective { source, .. } => Some(source),
            TrainErr::Shape(e) => Some(e),
            TrainErr::Checkpoint(e) => Some(e),
            TrainErr::Config { .. } => None,
            TrainErr::Io(e) => Some(e),
        }
    }
}

impl From<TopologyErr> for TrainErr {
    fn from(value: TopologyErr) -> Self {
        Self::Topology(value)
    }
}

impl From<BootstrapErr> for TrainErr {
    fn from(value: BootstrapErr) -> Self {
        Self::Bootstrap(value)
    }
}

impl From<ShapeMismatchErr> for TrainErr {
    fn from(value: ShapeMismatchErr) -> Self {
        Self::Shape(value)
    }
}

impl From<CheckpointErr> for TrainErr {
    fn from(value: CheckpointErr) -> Self {
        Self::Checkpoint(value)
    }
}

impl From<io::Error> for TrainErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Boundary conversion for the binary's `io::Result` main.
impl From<TrainErr> for io::Error {
    fn from(value: TrainErr) -> Self {
        match value {
            TrainErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
