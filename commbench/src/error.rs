use crate::types::{GroupId, Rank};

pub type Result<T> = std::result::Result<T, BenchError>;

#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    #[error("{name} is not a supported communication! Supported comms: {supported:?}")]
    UnsupportedCollective {
        name: String,
        supported: Vec<&'static str>,
    },

    #[error("unknown data type: {0}")]
    UnknownDType(String),

    #[error("unsupported data type: {dtype} for operation {op}")]
    UnsupportedDType {
        dtype: crate::types::DataType,
        op: &'static str,
    },

    #[error("could not parse input size {0}")]
    InvalidSize(String),

    #[error("could not parse {name}: {input}")]
    InvalidRankList { name: &'static str, input: String },

    #[error(
        "count {count} is not evenly divisible by world size {world_size} (required by {operation})"
    )]
    IndivisibleCount {
        count: usize,
        world_size: usize,
        operation: &'static str,
    },

    #[error("{operation}: split sizes {splits:?} do not describe {count} elements over {world_size} ranks")]
    SplitMismatch {
        operation: &'static str,
        splits: Vec<usize>,
        count: usize,
        world_size: usize,
    },

    #[error("invalid world size {world_size}")]
    InvalidWorldSize { world_size: u32 },

    #[error("unsupported quantization: {0}")]
    UnsupportedQuantization(String),

    #[error("[{size_bytes}-bytes {operation}] Wrong value at {location} = {actual}, expected {expected}")]
    ValidationFailed {
        size_bytes: usize,
        operation: &'static str,
        location: String,
        actual: f64,
        expected: f64,
    },

    #[error("[{size_bytes}-bytes {operation}] validation failed on another rank")]
    PeerValidationFailed {
        size_bytes: usize,
        operation: &'static str,
    },

    #[error("buffer size mismatch: expected {expected} elements, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("process group {pg_id} is not known to this backend")]
    UnknownGroup { pg_id: GroupId },

    #[error("invalid rank {rank}: world size is {world_size}")]
    InvalidRank { rank: Rank, world_size: u32 },

    #[error("{operation} failed at rank {rank}: {reason}")]
    CollectiveFailed {
        operation: &'static str,
        rank: Rank,
        reason: String,
    },

    #[error("{operation} timed out after {timeout_ms}ms (round {round})")]
    CollectiveTimeout {
        operation: &'static str,
        round: u64,
        timeout_ms: u64,
    },

    #[error("no outstanding request with id {req_id}")]
    UnknownRequest { req_id: u64 },

    #[error("collective task failed: {0}")]
    TaskFailed(String),

    #[error("internal lock poisoned: {0}")]
    LockPoisoned(&'static str),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BenchError {
    /// Create a `Config` error from any message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a `CollectiveFailed` error for `operation` observed at `rank`.
    pub fn collective(operation: &'static str, rank: Rank, reason: impl Into<String>) -> Self {
        Self::CollectiveFailed {
            operation,
            rank,
            reason: reason.into(),
        }
    }

    /// Whether this error represents a misconfiguration rather than a runtime
    /// failure. The binary exits without retrying on these.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedCollective { .. }
                | Self::UnknownDType(_)
                | Self::UnsupportedDType { .. }
                | Self::InvalidSize(_)
                | Self::InvalidRankList { .. }
                | Self::IndivisibleCount { .. }
                | Self::SplitMismatch { .. }
                | Self::InvalidWorldSize { .. }
                | Self::UnsupportedQuantization(_)
                | Self::UnknownGroup { .. }
                | Self::Config(_)
        )
    }
}
