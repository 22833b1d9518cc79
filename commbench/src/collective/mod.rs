//! Collective operation descriptors and in-flight request tracking.

mod args;
mod call;
mod handle;
mod op;

pub use args::CommsArgs;
pub use call::CollectiveCall;
pub use handle::{PendingOps, WorkHandle};
pub use op::CollectiveOp;
