//! Post-collective correctness checks.
//!
//! Validation runs with predictable inputs: every rank contributes
//! `init_val`, so a sum-reduction must produce `world_size * init_val` and
//! every data-movement collective must deliver `init_val` unchanged.

use crate::collective::{CollectiveCall, CollectiveOp};
use crate::error::{BenchError, Result};
use crate::staging::StagedBuffers;
use crate::tensor::{self, Staged};
use crate::types::{DataType, Rank};

#[derive(Debug, Clone, Copy)]
pub struct DataChecker {
    pub init_val: f64,
}

impl Default for DataChecker {
    fn default() -> Self {
        Self { init_val: 1.0 }
    }
}

impl DataChecker {
    pub fn new(init_val: f64) -> Self {
        Self { init_val }
    }

    /// Reset buffers before a validated run.
    ///
    /// Inputs get `init_val`, except broadcast and multicast where only the
    /// root does and the others get `rand_val`. Separate outputs get
    /// `rand_val` so stale contents cannot pass the check.
    pub fn set_tensor_val(&self, buffers: &mut StagedBuffers, rank: Rank, root: Rank, rand_val: f64) {
        let root_only = matches!(buffers.op, CollectiveOp::Broadcast | CollectiveOp::Multicast);
        let input_val = if root_only && rank != root {
            rand_val
        } else {
            self.init_val
        };
        fill(&mut buffers.input, input_val);
        if let Some(out) = buffers.output.as_mut() {
            fill(out, rand_val);
        }
    }

    /// Value every destination element must hold after `op` at `rank`.
    pub fn expected(&self, op: CollectiveOp, dtype: DataType, rank: Rank, root: Rank, world_size: u32) -> f64 {
        let reduced = matches!(
            op,
            CollectiveOp::AllReduce | CollectiveOp::ReduceScatter | CollectiveOp::ReduceScatterBase
        ) || (op == CollectiveOp::Reduce && rank == root);
        if reduced && dtype != DataType::Bool {
            f64::from(world_size) * self.init_val
        } else {
            self.init_val
        }
    }

    /// Whether `rank` holds a meaningful result for this call.
    pub fn should_check(call: &CollectiveCall, rank: Rank) -> bool {
        match call.op() {
            CollectiveOp::Incast | CollectiveOp::Reduce | CollectiveOp::Gather => rank == call.root,
            CollectiveOp::Multicast | CollectiveOp::Pt2Pt => call.dst_ranks.contains(&rank),
            op => !op.is_sync_only() && op != CollectiveOp::Noop,
        }
    }

    /// Compare the destination buffer of a completed call against the
    /// expected value, failing on the first mismatch.
    pub fn check(&self, call: &CollectiveCall, rank: Rank, world_size: u32, size_bytes: usize) -> Result<()> {
        if !Self::should_check(call, rank) {
            return Ok(());
        }
        let op = call.op();
        let dest = call.buffers.destination();
        let Some(dtype) = dest.tensors().first().map(|t| t.dtype()) else {
            return Ok(());
        };
        let expected = tensor::cast(self.expected(op, dtype, rank, call.root, world_size), dtype);
        let is_list = dest.is_list();

        for (r, t) in dest.tensors().iter().enumerate() {
            if let Some((i, actual)) = t
                .to_values()
                .into_iter()
                .enumerate()
                .find(|&(_, v)| v != expected)
            {
                let location = if is_list {
                    format!("[{r}][{i}]")
                } else {
                    format!("[{i}]")
                };
                return Err(BenchError::ValidationFailed {
                    size_bytes,
                    operation: op.name(),
                    location,
                    actual,
                    expected,
                });
            }
        }
        Ok(())
    }
}

fn fill(staged: &mut Staged, value: f64) {
    for t in staged.tensors_mut() {
        t.fill(value);
    }
}
