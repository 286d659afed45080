//! Batch-learning building blocks: the Adam optimizer pipeline over flat
//! parameter buffers, the named-tensor registry that fixes the per-batch
//! update order, and the flat-binary checkpoint store.

pub mod adam;
pub mod checkpoint;
pub mod error;
pub mod registry;

pub use adam::{Adam, MomentPair};
pub use checkpoint::CheckpointStore;
pub use error::{CheckpointErr, ShapeMismatchErr};
pub use registry::TensorSpec;
