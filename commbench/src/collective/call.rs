use super::CollectiveOp;
use crate::staging::StagedBuffers;
use crate::types::{GroupId, Rank, ReduceOp};

/// Everything a backend needs to execute one collective.
///
/// Owns its buffers so it can move into a spawned task for non-blocking
/// execution; the backend hands the call back with the destination buffer
/// filled in.
#[derive(Debug, Clone)]
pub struct CollectiveCall {
    pub buffers: StagedBuffers,
    /// Root for rooted collectives; source rank for multicast.
    pub root: Rank,
    /// Sending ranks for incast and pt2pt.
    pub src_ranks: Vec<Rank>,
    /// Receiving ranks for multicast and pt2pt.
    pub dst_ranks: Vec<Rank>,
    pub pg_id: GroupId,
    pub reduce_op: ReduceOp,
}

impl CollectiveCall {
    pub fn new(buffers: StagedBuffers) -> Self {
        Self {
            buffers,
            root: 0,
            src_ranks: Vec::new(),
            dst_ranks: Vec::new(),
            pg_id: 0,
            reduce_op: ReduceOp::Sum,
        }
    }

    pub fn with_root(mut self, root: Rank) -> Self {
        self.root = root;
        self
    }

    pub fn with_peers(mut self, src_ranks: Vec<Rank>, dst_ranks: Vec<Rank>) -> Self {
        self.src_ranks = src_ranks;
        self.dst_ranks = dst_ranks;
        self
    }

    pub fn with_group(mut self, pg_id: GroupId) -> Self {
        self.pg_id = pg_id;
        self
    }

    pub fn with_reduce_op(mut self, op: ReduceOp) -> Self {
        self.reduce_op = op;
        self
    }

    pub fn op(&self) -> CollectiveOp {
        self.buffers.op
    }

    /// Whether `rank` receives data in a multicast or point-to-point call.
    /// An empty destination list means every rank receives.
    pub fn is_destination(&self, rank: Rank) -> bool {
        self.dst_ranks.is_empty() || self.dst_ranks.contains(&rank)
    }
}
