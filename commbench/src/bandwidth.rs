//! Algorithmic and bus bandwidth, nccl-tests style.

use crate::collective::CollectiveOp;

/// Average time per iteration (ns) and algorithmic bandwidth (GB/s) for
/// `size_bytes` moved `iterations` times in `elapsed_ns`. Zero iterations
/// or zero time give zero for both.
pub fn alg_bw(elapsed_ns: f64, size_bytes: usize, iterations: usize) -> (f64, f64) {
    let avg_ns = if iterations != 0 {
        elapsed_ns / iterations as f64
    } else {
        0.0
    };
    let bw = if avg_ns != 0.0 {
        // bytes per ns == GB/s
        size_bytes as f64 / avg_ns
    } else {
        0.0
    };
    (avg_ns, bw)
}

/// Multiplier from algorithmic to bus bandwidth for `op` over `world_size`
/// ranks, or `None` for operations with no defined factor. A zero world
/// size yields 1.
pub fn bus_factor(op: CollectiveOp, world_size: u32) -> Option<f64> {
    let n = f64::from(world_size);
    match op {
        CollectiveOp::AllReduce if world_size != 0 => Some(2.0 * (n - 1.0) / n),
        CollectiveOp::AllToAll
        | CollectiveOp::AllToAllv
        | CollectiveOp::Gather
        | CollectiveOp::AllGather
        | CollectiveOp::AllGatherBase
        | CollectiveOp::ReduceScatter
        | CollectiveOp::ReduceScatterBase
        | CollectiveOp::Scatter
            if world_size != 0 =>
        {
            Some((n - 1.0) / n)
        }
        CollectiveOp::AllReduce
        | CollectiveOp::AllToAll
        | CollectiveOp::AllToAllv
        | CollectiveOp::Gather
        | CollectiveOp::AllGather
        | CollectiveOp::AllGatherBase
        | CollectiveOp::ReduceScatter
        | CollectiveOp::ReduceScatterBase
        | CollectiveOp::Scatter
        | CollectiveOp::Reduce
        | CollectiveOp::Broadcast
        | CollectiveOp::Incast
        | CollectiveOp::Multicast
        | CollectiveOp::Pt2Pt
        | CollectiveOp::Recv => Some(1.0),
        _ => None,
    }
}

/// Bus bandwidth. Operations without a factor log an error and report the
/// algorithmic bandwidth unchanged.
pub fn bus_bw(op: CollectiveOp, alg_bw: f64, world_size: u32) -> f64 {
    match bus_factor(op, world_size) {
        Some(f) => alg_bw * f,
        None => {
            tracing::error!(op = %op, "no bus bandwidth factor for this collective");
            alg_bw
        }
    }
}
