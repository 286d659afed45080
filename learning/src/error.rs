use std::{error::Error, fmt, io, path::PathBuf};

/// A programming-contract violation between gradient, moment and parameter
/// buffers. Fatal: these lengths are fixed at startup, so a mismatch means
/// the caller wired the wrong buffers together.
#[derive(Debug)]
pub struct ShapeMismatchErr {
    pub tensor: String,
    pub got: usize,
    pub expected: usize,
}

impl fmt::Display for ShapeMismatchErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "buffer length mismatch for `{}`: got {} elements, expected {}",
            self.tensor, self.got, self.expected
        )
    }
}

impl Error for ShapeMismatchErr {}

/// Checkpoint save/load failures.
#[derive(Debug)]
pub enum CheckpointErr {
    Io {
        path: PathBuf,
        source: io::Error,
    },
    /// The stored element count differs from the live tensor's.
    ShapeMismatch {
        path: PathBuf,
        got: usize,
        expected: usize,
    },
}

impl fmt::Display for CheckpointErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointErr::Io { path, source } => {
                write!(f, "checkpoint io error at {}: {source}", path.display())
            }
            CheckpointErr::ShapeMismatch { path, got, expected } => write!(
                f,
                "checkpoint shape mismatch at {}: stored {got} elements, expected {expected}",
                path.display()
            ),
        }
    }
}

impl Error for CheckpointErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CheckpointErr::Io { source, .. } => Some(source),
            CheckpointErr::ShapeMismatch { .. } => None,
        }
    }
}
