use std::{error::Error, fmt, io, net::SocketAddr};

/// Failures while establishing the reduction group.
///
/// All of these are fatal: the run has no notion of a partial group, so a
/// rank that cannot join aborts the whole session.
#[derive(Debug)]
pub enum BootstrapErr {
    Io(io::Error),
    InvalidRank {
        rank: usize,
        num_ranks: usize,
    },
    /// A peer announced a rank id outside `1..num_ranks`.
    InvalidJoin {
        rank: usize,
        num_ranks: usize,
    },
    /// Two peers announced the same rank id.
    DuplicateJoin {
        rank: usize,
    },
    /// The coordinator never became reachable within the retry window.
    Unreachable {
        addr: SocketAddr,
        source: io::Error,
    },
}

impl fmt::Display for BootstrapErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootstrapErr::Io(e) => write!(f, "bootstrap io error: {e}"),
            BootstrapErr::InvalidRank { rank, num_ranks } => {
                write!(f, "invalid rank {rank} for a group of {num_ranks}")
            }
            BootstrapErr::InvalidJoin { rank, num_ranks } => {
                write!(f, "peer joined with rank {rank}, outside 1..{num_ranks}")
            }
            BootstrapErr::DuplicateJoin { rank } => {
                write!(f, "rank {rank} joined twice")
            }
            BootstrapErr::Unreachable { addr, source } => {
                write!(f, "coordinator at {addr} unreachable: {source}")
            }
        }
    }
}

impl Error for BootstrapErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BootstrapErr::Io(e) | BootstrapErr::Unreachable { source: e, .. } => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for BootstrapErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// A reduction failed at the transport level.
///
/// Fatal by policy: a partially applied reduction leaves ranks holding
/// divergent state, so the caller terminates the run instead of retrying.
#[derive(Debug)]
pub enum CollectiveErr {
    Transport(io::Error),
}

impl fmt::Display for CollectiveErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectiveErr::Transport(e) => write!(f, "reduction transport error: {e}"),
        }
    }
}

impl Error for CollectiveErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CollectiveErr::Transport(e) => Some(e),
        }
    }
}

impl From<io::Error> for CollectiveErr {
    fn from(value: io::Error) -> Self {
        Self::Transport(value)
    }
}
