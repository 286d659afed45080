//! Rank-group bootstrap and sum-reduction for distributed training.
//!
//! Every rank of a training run joins one session: the coordinator (rank 0)
//! hands out an opaque session token, after which the group exchanges
//! in-place sum-reductions. Both operations are full barriers — a rank that
//! calls them blocks until every other rank has participated.

mod channel;
pub mod error;
mod frame;

pub use channel::{Collective, SessionToken};
pub use error::{BootstrapErr, CollectiveErr};

type LenType = u64;
const LEN_TYPE_SIZE: usize = size_of::<LenType>();
