pub mod backend;
pub mod bandwidth;
pub mod bench;
pub mod cli;
pub mod collective;
pub mod compute;
pub mod config;
pub mod error;
pub mod sizes;
pub mod staging;
pub mod tensor;
pub mod timer;
pub mod types;
pub mod validate;

pub use backend::{Backend, LocalBackend, LocalWorld, ProcessGroup, StreamGuard};
pub use bench::{BenchReport, CommsBench, LatencyStats, SizeReport};
pub use cli::Args;
pub use collective::{CollectiveCall, CollectiveOp, CommsArgs, PendingOps, WorkHandle};
pub use compute::ComputeKernel;
pub use config::{CommsParams, WorldInfo};
pub use error::{BenchError, Result};
pub use staging::{StagedBuffers, stage_collective};
pub use tensor::{Staged, Tensor};
pub use types::{DataType, GroupId, Rank, ReduceOp, StreamId};
pub use validate::DataChecker;
