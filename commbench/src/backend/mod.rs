//! The capability interface the harness drives collectives through.
//!
//! A [`Backend`] wraps one communication library. The harness never touches
//! a library directly: staging allocates through the backend, the runner
//! issues every collective through [`Backend::collective`], and stream
//! changes go through [`StreamGuard`].

mod local;
mod stream;

pub use local::{LocalBackend, LocalWorld};
pub use stream::StreamGuard;

use crate::collective::{CollectiveCall, CollectiveOp};
use crate::compute;
use crate::error::{BenchError, Result};
use crate::staging::StagedBuffers;
use crate::tensor::Tensor;
use crate::types::{DataType, GroupId, Rank, StreamId};
use async_trait::async_trait;

/// A set of ranks that run collectives together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessGroup {
    pub id: GroupId,
    /// Global ranks, in group-rank order.
    pub ranks: Vec<Rank>,
}

impl ProcessGroup {
    pub fn size(&self) -> u32 {
        self.ranks.len() as u32
    }

    /// Position of `global_rank` within this group.
    pub fn rank_of(&self, global_rank: Rank) -> Option<Rank> {
        self.ranks
            .iter()
            .position(|&r| r == global_rank)
            .map(|p| p as Rank)
    }
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// Short library name, e.g. `"local"`.
    fn name(&self) -> &'static str;

    fn local_rank(&self) -> Rank;

    fn global_rank(&self) -> Rank;

    fn world_size(&self) -> u32;

    /// Device the backend stages buffers on, e.g. `"cpu"`.
    fn device(&self) -> &str;

    fn default_group(&self) -> GroupId {
        0
    }

    fn groups(&self) -> &[ProcessGroup];

    fn group(&self, pg_id: GroupId) -> Result<&ProcessGroup> {
        self.groups()
            .iter()
            .find(|g| g.id == pg_id)
            .ok_or(BenchError::UnknownGroup { pg_id })
    }

    fn group_size(&self, pg_id: GroupId) -> Result<u32> {
        self.group(pg_id).map(ProcessGroup::size)
    }

    /// Operations this backend can execute.
    fn supported_collectives(&self) -> &[CollectiveOp];

    /// Random tensor; see [`Tensor::random`] for the value ranges.
    fn alloc_random(&self, numel: usize, dtype: DataType, scale: f64) -> Tensor;

    /// Tensor of ones multiplied by `scale`.
    fn alloc_ones(&self, numel: usize, dtype: DataType, scale: f64) -> Tensor {
        Tensor::full(numel, dtype, scale)
    }

    fn alloc_empty(&self, numel: usize, dtype: DataType) -> Tensor {
        Tensor::zeros(numel, dtype)
    }

    /// A `rows x dim` table for embedding lookups.
    fn alloc_embedding_table(&self, rows: usize, dim: usize, dtype: DataType) -> Tensor {
        self.alloc_random(rows * dim, dtype, 1.0)
    }

    /// Release cached allocations.
    fn clear_memory(&self) {}

    fn create_stream(&self) -> StreamId;

    /// Make `stream` current (`None` = default stream); returns the stream
    /// that was current before.
    fn switch_stream(&self, stream: Option<StreamId>) -> Option<StreamId>;

    fn current_stream(&self) -> Option<StreamId>;

    fn supports_quantization(&self) -> bool {
        false
    }

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    fn say_hello(&self) {
        tracing::info!(
            backend = self.name(),
            global_rank = self.global_rank(),
            local_rank = self.local_rank(),
            world_size = self.world_size(),
            device = self.device(),
            "backend ready"
        );
    }

    /// Execute one collective and hand the call back with its destination
    /// buffer filled in.
    async fn collective(&self, call: CollectiveCall) -> Result<CollectiveCall>;

    async fn barrier(&self) -> Result<()> {
        let call = CollectiveCall::new(StagedBuffers::empty(CollectiveOp::Barrier))
            .with_group(self.default_group());
        self.collective(call).await.map(|_| ())
    }

    /// Wait for all outstanding device work on every stream.
    async fn complete_accel_ops(&self) -> Result<()> {
        Ok(())
    }

    /// `a x b` for square `dim x dim` matrices.
    fn gemm(&self, a: &Tensor, b: &Tensor, dim: usize) -> Result<Tensor> {
        compute::matmul(a, b, dim)
    }

    /// Sum-pooled bag lookup; `offsets[i]` starts bag `i` within `indices`.
    fn emb_lookup(
        &self,
        table: &Tensor,
        dim: usize,
        indices: &[usize],
        offsets: &[usize],
    ) -> Result<Tensor> {
        compute::embedding_bag_sum(table, dim, indices, offsets)
    }
}
