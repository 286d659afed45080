//! The named-connection registry driving the per-batch update schedule.

/// Description of one named parameter tensor.
///
/// The registry order is the update order: every rank iterates the same
/// specs in the same sequence for both the reduction phase and the
/// optimizer phase, which is what keeps the collective calls lock-step
/// across ranks. Connections that exist in two orientations name their
/// transposed twin in `mirror`; the twin is rewritten after every update
/// and is not itself a registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorSpec {
    pub name: String,
    pub rows: usize,
    pub cols: usize,
    pub mirror: Option<String>,
}

impl TensorSpec {
    pub fn new(name: impl Into<String>, rows: usize, cols: usize) -> Self {
        Self {
            name: name.into(),
            rows,
            cols,
            mirror: None,
        }
    }

    pub fn with_mirror(
        name: impl Into<String>,
        rows: usize,
        cols: usize,
        mirror: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            rows,
            cols,
            mirror: Some(mirror.into()),
        }
    }

    pub fn element_count(&self) -> usize {
        self.rows * self.cols
    }
}
