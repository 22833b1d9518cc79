//! Tensor staging: turns an operation descriptor into correctly shaped
//! input/output buffers for that exact collective.
//!
//! Each operation kind maps to a staging strategy through [`STAGING_TABLE`].
//! Operations without an entry run in place: the input buffer doubles as the
//! output.

use crate::backend::Backend;
use crate::collective::{CollectiveOp, CommsArgs};
use crate::config::CommsParams;
use crate::error::{BenchError, Result};
use crate::tensor::{Staged, Tensor};
use crate::types::{DataType, Rank};

/// Buffers staged for one collective, tagged with the operation they were
/// shaped for.
#[derive(Debug, Clone)]
pub struct StagedBuffers {
    pub op: CollectiveOp,
    pub input: Staged,
    /// `None` means the collective works in place on `input`.
    pub output: Option<Staged>,
    pub in_split: Option<Vec<usize>>,
    pub out_split: Option<Vec<usize>>,
}

impl Default for StagedBuffers {
    fn default() -> Self {
        Self::empty(CollectiveOp::Noop)
    }
}

impl StagedBuffers {
    /// No buffers at all (barrier, wait, or not yet allocated).
    pub fn empty(op: CollectiveOp) -> Self {
        Self {
            op,
            input: Staged::default(),
            output: None,
            in_split: None,
            out_split: None,
        }
    }

    pub fn in_place(op: CollectiveOp, input: Staged) -> Self {
        Self {
            input,
            ..Self::empty(op)
        }
    }

    pub fn out_of_place(op: CollectiveOp, input: Staged, output: Staged) -> Self {
        Self {
            input,
            output: Some(output),
            ..Self::empty(op)
        }
    }

    pub fn is_in_place(&self) -> bool {
        self.output.is_none()
    }

    /// The buffer a collective writes its result into.
    pub fn destination(&self) -> &Staged {
        self.output.as_ref().unwrap_or(&self.input)
    }

    pub fn destination_mut(&mut self) -> &mut Staged {
        match self.output {
            Some(ref mut out) => out,
            None => &mut self.input,
        }
    }

    /// Adopt the tensors of `previous`, keeping this staging's split
    /// metadata. Used when buffers are reused across iterations.
    pub fn reuse_from(&mut self, previous: StagedBuffers) {
        self.input = previous.input;
        self.output = previous.output;
    }
}

/// Inputs shared by every staging strategy.
pub struct StagingContext<'a> {
    backend: &'a dyn Backend,
    pub world_size: usize,
    pub dtype: DataType,
    pub in_elems: usize,
    pub out_elems: usize,
    pub dcheck: bool,
    pub init_val: f64,
    /// Divisor applied to random values; `(output elements)^2`.
    pub scale: f64,
    pub src_ranks: &'a [Rank],
    pub in_split: Option<&'a [usize]>,
    pub out_split: Option<&'a [usize]>,
    pub allocate: bool,
}

impl StagingContext<'_> {
    /// Input values: predictable ones when validating, random otherwise.
    fn input_values(&self, numel: usize) -> Tensor {
        if self.dcheck {
            self.backend.alloc_ones(numel, self.dtype, self.init_val)
        } else {
            self.backend.alloc_random(numel, self.dtype, self.scale)
        }
    }

    fn scratch(&self, numel: usize) -> Tensor {
        self.backend.alloc_random(numel, self.dtype, self.scale)
    }

    fn input_list(&self, numel: usize) -> Staged {
        Staged::List((0..self.world_size).map(|_| self.input_values(numel)).collect())
    }

    fn scratch_list(&self, count: usize, numel: usize) -> Staged {
        Staged::List((0..count).map(|_| self.scratch(numel)).collect())
    }
}

type StageFn = fn(&StagingContext<'_>, CollectiveOp) -> StagedBuffers;

/// Operation -> staging strategy. Anything not listed stages in place.
pub const STAGING_TABLE: [(CollectiveOp, StageFn); 10] = [
    (CollectiveOp::AllToAllv, stage_all_to_allv),
    (CollectiveOp::AllToAll, stage_all_to_all),
    (CollectiveOp::AllGather, stage_all_gather),
    (CollectiveOp::Gather, stage_all_gather),
    (CollectiveOp::AllGatherBase, stage_all_gather_base),
    (CollectiveOp::Incast, stage_incast),
    (CollectiveOp::ReduceScatter, stage_reduce_scatter),
    (CollectiveOp::Scatter, stage_reduce_scatter),
    (CollectiveOp::ReduceScatterBase, stage_reduce_scatter_base),
    (CollectiveOp::Pt2Pt, stage_pt2pt),
];

fn strategy_for(op: CollectiveOp) -> StageFn {
    STAGING_TABLE
        .iter()
        .find(|(key, _)| *key == op)
        .map(|(_, f)| *f)
        .unwrap_or(stage_in_place)
}

/// Stage buffers for the collective `desc` describes.
///
/// The name is normalized and checked against what `backend` supports, and
/// shape constraints are validated, before anything is allocated. With
/// `allocate == false` only split metadata is produced; callers then adopt
/// previously staged tensors via [`StagedBuffers::reuse_from`].
pub fn stage_collective(
    backend: &dyn Backend,
    desc: &CommsArgs,
    params: &CommsParams,
    allocate: bool,
) -> Result<StagedBuffers> {
    let name = desc
        .comms
        .as_deref()
        .or_else(|| params.collectives.first().map(String::as_str))
        .unwrap_or_default();
    let op = CollectiveOp::resolve(name, backend.supported_collectives())?;

    if op.is_sync_only() {
        return Ok(StagedBuffers::empty(op));
    }

    let pg_id = desc.pg_id.unwrap_or_else(|| backend.default_group());
    let world_size = backend.group_size(pg_id)? as usize;
    if world_size == 0 {
        return Err(BenchError::InvalidWorldSize { world_size: 0 });
    }

    let in_elems = desc.in_elems();
    let out_elems = desc.out_elems();
    let in_split = desc.in_split.as_deref().or(params.in_split.as_deref());
    let out_split = desc.out_split.as_deref().or(params.out_split.as_deref());
    check_shape(op, in_elems, out_elems, world_size, in_split, out_split)?;

    let ctx = StagingContext {
        backend,
        world_size,
        dtype: desc.dtype.unwrap_or(params.dtype),
        in_elems,
        out_elems,
        dcheck: params.dcheck,
        init_val: params.init_val,
        scale: (out_elems as f64) * (out_elems as f64),
        src_ranks: &params.src_ranks,
        in_split,
        out_split,
        allocate,
    };

    let staged = strategy_for(op)(&ctx, op);
    tracing::debug!(
        op = %op,
        world_size,
        in_elems,
        out_elems,
        in_place = staged.is_in_place(),
        allocate,
        "staged collective buffers"
    );
    Ok(staged)
}

/// Total elements a staged output holds for `op`, given the per-rank
/// descriptor counts. In-place ops report their input size.
pub fn expected_output_elements(
    op: CollectiveOp,
    in_elems: usize,
    out_elems: usize,
    world_size: usize,
    num_src_ranks: usize,
) -> usize {
    if world_size == 0 || op.is_sync_only() {
        return 0;
    }
    match op {
        CollectiveOp::AllToAllv | CollectiveOp::Pt2Pt => out_elems,
        CollectiveOp::AllToAll => (out_elems / world_size) * world_size,
        CollectiveOp::AllGather | CollectiveOp::Gather | CollectiveOp::AllGatherBase => {
            (in_elems / world_size) * world_size
        }
        CollectiveOp::Incast => out_elems * num_src_ranks,
        CollectiveOp::ReduceScatter | CollectiveOp::Scatter | CollectiveOp::ReduceScatterBase => {
            out_elems / world_size
        }
        _ => in_elems,
    }
}

fn check_divisible(count: usize, world_size: usize, operation: &'static str) -> Result<()> {
    if count % world_size != 0 {
        return Err(BenchError::IndivisibleCount {
            count,
            world_size,
            operation,
        });
    }
    Ok(())
}

fn check_split(
    splits: &[usize],
    count: usize,
    world_size: usize,
    operation: &'static str,
) -> Result<()> {
    if splits.len() != world_size || splits.iter().sum::<usize>() != count {
        return Err(BenchError::SplitMismatch {
            operation,
            splits: splits.to_vec(),
            count,
            world_size,
        });
    }
    Ok(())
}

fn check_shape(
    op: CollectiveOp,
    in_elems: usize,
    out_elems: usize,
    world_size: usize,
    in_split: Option<&[usize]>,
    out_split: Option<&[usize]>,
) -> Result<()> {
    let name = op.name();
    match op {
        CollectiveOp::AllToAllv => {
            match in_split {
                Some(s) => check_split(s, in_elems, world_size, name)?,
                None => check_divisible(in_elems, world_size, name)?,
            }
            match out_split {
                Some(s) => check_split(s, out_elems, world_size, name)?,
                None => check_divisible(out_elems, world_size, name)?,
            }
        }
        CollectiveOp::AllToAll => {
            check_divisible(in_elems, world_size, name)?;
            check_divisible(out_elems, world_size, name)?;
        }
        CollectiveOp::AllGather | CollectiveOp::Gather | CollectiveOp::AllGatherBase => {
            check_divisible(in_elems, world_size, name)?;
        }
        CollectiveOp::ReduceScatter | CollectiveOp::Scatter | CollectiveOp::ReduceScatterBase => {
            check_divisible(out_elems, world_size, name)?;
        }
        _ => {}
    }
    Ok(())
}

fn even_split(count: usize, world_size: usize) -> Vec<usize> {
    vec![count / world_size; world_size]
}

fn unallocated(op: CollectiveOp, in_place: bool) -> StagedBuffers {
    if in_place {
        StagedBuffers::empty(op)
    } else {
        StagedBuffers {
            output: Some(Staged::default()),
            ..StagedBuffers::empty(op)
        }
    }
}

fn stage_all_to_allv(ctx: &StagingContext<'_>, op: CollectiveOp) -> StagedBuffers {
    let mut staged = if ctx.allocate {
        StagedBuffers::out_of_place(
            op,
            Staged::Single(ctx.input_values(ctx.in_elems)),
            Staged::Single(ctx.scratch(ctx.out_elems)),
        )
    } else {
        unallocated(op, false)
    };
    staged.in_split = Some(
        ctx.in_split
            .map(<[usize]>::to_vec)
            .unwrap_or_else(|| even_split(ctx.in_elems, ctx.world_size)),
    );
    staged.out_split = Some(
        ctx.out_split
            .map(<[usize]>::to_vec)
            .unwrap_or_else(|| even_split(ctx.out_elems, ctx.world_size)),
    );
    staged
}

fn stage_all_to_all(ctx: &StagingContext<'_>, op: CollectiveOp) -> StagedBuffers {
    if !ctx.allocate {
        return unallocated(op, false);
    }
    StagedBuffers::out_of_place(
        op,
        ctx.input_list(ctx.in_elems / ctx.world_size),
        ctx.scratch_list(ctx.world_size, ctx.out_elems / ctx.world_size),
    )
}

fn stage_all_gather(ctx: &StagingContext<'_>, op: CollectiveOp) -> StagedBuffers {
    if !ctx.allocate {
        return unallocated(op, false);
    }
    let chunk = ctx.in_elems / ctx.world_size;
    StagedBuffers::out_of_place(
        op,
        Staged::Single(ctx.input_values(chunk)),
        ctx.scratch_list(ctx.world_size, chunk),
    )
}

fn stage_all_gather_base(ctx: &StagingContext<'_>, op: CollectiveOp) -> StagedBuffers {
    if !ctx.allocate {
        return unallocated(op, false);
    }
    let chunk = ctx.in_elems / ctx.world_size;
    StagedBuffers::out_of_place(
        op,
        Staged::Single(ctx.input_values(chunk)),
        Staged::Single(ctx.scratch(chunk * ctx.world_size)),
    )
}

fn stage_incast(ctx: &StagingContext<'_>, op: CollectiveOp) -> StagedBuffers {
    if !ctx.allocate {
        return unallocated(op, false);
    }
    StagedBuffers::out_of_place(
        op,
        Staged::Single(ctx.input_values(ctx.in_elems)),
        ctx.scratch_list(ctx.src_ranks.len(), ctx.out_elems),
    )
}

fn stage_reduce_scatter(ctx: &StagingContext<'_>, op: CollectiveOp) -> StagedBuffers {
    if !ctx.allocate {
        return unallocated(op, false);
    }
    let chunk = ctx.out_elems / ctx.world_size;
    StagedBuffers::out_of_place(
        op,
        ctx.input_list(chunk),
        Staged::Single(ctx.scratch(chunk)),
    )
}

fn stage_reduce_scatter_base(ctx: &StagingContext<'_>, op: CollectiveOp) -> StagedBuffers {
    if !ctx.allocate {
        return unallocated(op, false);
    }
    StagedBuffers::out_of_place(
        op,
        Staged::Single(ctx.input_values(ctx.out_elems)),
        Staged::Single(ctx.scratch(ctx.out_elems / ctx.world_size)),
    )
}

fn stage_pt2pt(ctx: &StagingContext<'_>, op: CollectiveOp) -> StagedBuffers {
    if !ctx.allocate {
        return unallocated(op, false);
    }
    StagedBuffers::out_of_place(
        op,
        Staged::Single(ctx.input_values(ctx.in_elems)),
        Staged::Single(ctx.scratch(ctx.out_elems)),
    )
}

fn stage_in_place(ctx: &StagingContext<'_>, op: CollectiveOp) -> StagedBuffers {
    if !ctx.allocate {
        return unallocated(op, true);
    }
    StagedBuffers::in_place(op, Staged::Single(ctx.input_values(ctx.in_elems)))
}
