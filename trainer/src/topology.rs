use std::{env, net::SocketAddr, ops::Range, str::FromStr};

use crate::error::TopologyErr;

pub const RANK_ENV: &str = "RANK";
pub const NUM_RANKS_ENV: &str = "NUM_RANKS";
pub const COORDINATOR_ENV: &str = "COORDINATOR";

/// Identity of this process within the training group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankTopology {
    rank: usize,
    num_ranks: usize,
}

impl RankTopology {
    pub fn new(rank: usize, num_ranks: usize) -> Result<Self, TopologyErr> {
        if num_ranks == 0 || rank >= num_ranks {
            return Err(TopologyErr::InvalidRank { rank, num_ranks });
        }
        Ok(Self { rank, num_ranks })
    }

    /// Resolves rank identity from the process-launch environment.
    pub fn resolve() -> Result<Self, TopologyErr> {
        Self::new(read_env(RANK_ENV)?, read_env(NUM_RANKS_ENV)?)
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.rank
    }

    #[inline]
    pub fn num_ranks(&self) -> usize {
        self.num_ranks
    }

    /// The coordinator is the rank that owns single-writer duties:
    /// checkpoints, the progress report, and the bootstrap listener.
    #[inline]
    pub fn is_coordinator(&self) -> bool {
        self.rank == 0
    }

    /// This rank's exclusive contiguous slice of the training-example
    /// index space.
    pub fn slice(&self, total: usize) -> Result<Range<usize>, TopologyErr> {
        if total < self.num_ranks {
            return Err(TopologyErr::InsufficientData {
                total,
                num_ranks: self.num_ranks,
            });
        }
        Ok(slice_range(total, self.rank, self.num_ranks))
    }
}

/// Splits `total` examples among `num_ranks`: every rank receives
/// `total / num_ranks` contiguous examples except the last, which absorbs
/// the remainder. Deterministic; the slices are pairwise disjoint and
/// cover `[0, total)` exactly once.
pub fn slice_range(total: usize, rank: usize, num_ranks: usize) -> Range<usize> {
    let base = total / num_ranks;
    let start = rank * base;
    let end = if rank == num_ranks - 1 { total } else { start + base };
    start..end
}

/// Reads the coordinator's socket address from the launch environment.
pub fn coordinator_addr() -> Result<SocketAddr, TopologyErr> {
    read_env(COORDINATOR_ENV)
}

fn read_env<T: FromStr>(var: &'static str) -> Result<T, TopologyErr> {
    let value = env::var(var).map_err(|_| TopologyErr::MissingEnv { var })?;
    value
        .parse()
        .map_err(|_| TopologyErr::InvalidEnv { var, value })
}
