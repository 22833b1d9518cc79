//! The benchmark runner.
//!
//! One [`CommsBench`] drives one rank. For every requested collective and
//! message size it stages buffers, warms up, times the measured iterations,
//! optionally validates a separate run with predictable inputs, and gathers
//! per-rank latency so every rank reports the same summary.

use crate::backend::{Backend, StreamGuard};
use crate::bandwidth;
use crate::collective::{CollectiveCall, CollectiveOp, CommsArgs, PendingOps, WorkHandle};
use crate::compute::ComputeWorkload;
use crate::config::CommsParams;
use crate::error::{BenchError, Result};
use crate::sizes;
use crate::staging::{StagedBuffers, stage_collective};
use crate::tensor::{Staged, Tensor};
use crate::timer::{ParamTimer, Profile};
use crate::types::{DataType, Rank, StreamId};
use crate::validate::DataChecker;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

/// Latency across ranks, in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatencyStats {
    pub avg_us: f64,
    pub min_us: f64,
    pub max_us: f64,
}

impl LatencyStats {
    fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self {
                avg_us: 0.0,
                min_us: 0.0,
                max_us: 0.0,
            };
        }
        let sum: f64 = samples.iter().sum();
        Self {
            avg_us: sum / samples.len() as f64,
            min_us: samples.iter().copied().fold(f64::INFINITY, f64::min),
            max_us: samples.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

/// Results for one collective at one message size.
#[derive(Debug, Clone, Serialize)]
pub struct SizeReport {
    pub collective: CollectiveOp,
    pub size_bytes: usize,
    pub elements: usize,
    pub dtype: DataType,
    pub iterations: usize,
    pub latency: LatencyStats,
    pub alg_bw_gbps: f64,
    pub bus_bw_gbps: f64,
    /// `None` when validation was not requested.
    pub validated: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchReport {
    pub backend: String,
    pub world_size: u32,
    pub blocking: bool,
    pub bitwidth: u32,
    pub sizes: Vec<SizeReport>,
}

impl BenchReport {
    pub fn render_table(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "backend={} world_size={} mode={} bitwidth={}",
            self.backend,
            self.world_size,
            if self.blocking { "blocking" } else { "non-blocking" },
            self.bitwidth
        );
        let _ = writeln!(
            out,
            "{:<20} {:>12} {:>12} {:>9} {:>12} {:>12} {:>12} {:>12} {:>12} {:>6}",
            "collective",
            "size(B)",
            "elements",
            "dtype",
            "avg(us)",
            "min(us)",
            "max(us)",
            "algBW(GB/s)",
            "busBW(GB/s)",
            "check"
        );
        for r in &self.sizes {
            let check = match r.validated {
                Some(true) => "ok",
                Some(false) => "FAIL",
                None => "-",
            };
            let _ = writeln!(
                out,
                "{:<20} {:>12} {:>12} {:>9} {:>12.3} {:>12.3} {:>12.3} {:>12.3} {:>12.3} {:>6}",
                r.collective.name(),
                r.size_bytes,
                r.elements,
                r.dtype.name(),
                r.latency.avg_us,
                r.latency.min_us,
                r.latency.max_us,
                r.alg_bw_gbps,
                r.bus_bw_gbps,
                check
            );
        }
        out
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

pub struct CommsBench {
    backend: Arc<dyn Backend>,
    params: Arc<CommsParams>,
    ops: Vec<CollectiveOp>,
    bitwidth: u32,
    checker: DataChecker,
    rng: StdRng,
    comm_stream: StreamId,
}

impl CommsBench {
    /// Validate `params` against `backend`. Fails before anything is
    /// allocated when a requested collective is unknown or unsupported.
    pub fn new(backend: Arc<dyn Backend>, params: Arc<CommsParams>) -> Result<Self> {
        params.validate()?;
        let ops = params
            .collectives
            .iter()
            .map(|name| CollectiveOp::resolve(name, backend.supported_collectives()))
            .collect::<Result<Vec<_>>>()?;
        // Latency is gathered with all_gather_base; validation outcomes are
        // agreed on with an all_reduce.
        CollectiveOp::resolve(CollectiveOp::AllGatherBase.name(), backend.supported_collectives())?;
        if params.dcheck {
            CollectiveOp::resolve(CollectiveOp::AllReduce.name(), backend.supported_collectives())?;
        }

        let mut bitwidth = params.bitwidth;
        if params.is_quantized() && !backend.supports_quantization() {
            tracing::warn!(
                backend = backend.name(),
                requested = params.bitwidth,
                "backend has no quantized communication, falling back to 32-bit"
            );
            bitwidth = 32;
        }

        let rng = StdRng::seed_from_u64(params.seed ^ u64::from(backend.global_rank()) << 17);
        let comm_stream = backend.create_stream();
        Ok(Self {
            checker: DataChecker::new(params.init_val),
            backend,
            params,
            ops,
            bitwidth,
            rng,
            comm_stream,
        })
    }

    pub fn ops(&self) -> &[CollectiveOp] {
        &self.ops
    }

    /// Run every collective over its size sweep.
    pub async fn run(&mut self) -> Result<BenchReport> {
        self.backend.initialize().await?;
        self.backend.say_hello();
        let compute = ComputeWorkload::prepare(&*self.backend, &self.params)?;

        let mut reports = Vec::new();
        for op in self.ops.clone() {
            for size in self.sizes_for(op) {
                let report = self.run_size(op, size, compute.as_ref()).await?;
                if self.backend.global_rank() == 0 {
                    tracing::info!(
                        op = %op,
                        size_bytes = report.size_bytes,
                        avg_us = report.latency.avg_us,
                        alg_bw = report.alg_bw_gbps,
                        bus_bw = report.bus_bw_gbps,
                        "size complete"
                    );
                }
                reports.push(report);
            }
        }
        self.backend.clear_memory();

        Ok(BenchReport {
            backend: self.backend.name().to_string(),
            world_size: self.backend.world_size(),
            blocking: self.params.blocking,
            bitwidth: self.bitwidth,
            sizes: reports,
        })
    }

    /// Message sizes in bytes for `op`, with the begin size fixed up so
    /// split collectives give every rank at least one element.
    pub fn sizes_for(&self, op: CollectiveOp) -> Vec<usize> {
        let p = &self.params;
        let begin = sizes::fix_begin_size(
            p.begin_size,
            op,
            p.dtype.size_in_bytes(),
            self.backend.world_size() as usize,
            self.bitwidth,
            p.quant_a2a_embedding_dim,
        );
        sizes::get_sizes(begin, p.end_size, p.step_factor, p.step_bytes)
    }

    fn descriptor(&self, op: CollectiveOp, size_bytes: usize) -> CommsArgs {
        let p = &self.params;
        let world = self.backend.world_size() as usize;
        let mut elements = size_bytes / p.dtype.size_in_bytes();
        if op.splits_across_ranks() && world > 0 {
            elements = elements / world * world;
        }
        let mut desc = CommsArgs::new(op.name(), elements, elements, p.dtype)
            .with_root(p.root)
            .with_group(self.backend.default_group());
        if op == CollectiveOp::AllToAllv {
            let (in_split, out_split) = self.all_to_allv_splits();
            if let Some(s) = &in_split {
                desc.in_msg_size = Some(s.iter().sum());
            }
            if let Some(s) = &out_split {
                desc.out_msg_size = Some(s.iter().sum());
            }
            desc = desc.with_splits(in_split, out_split);
        }
        desc.world_size = Some(self.backend.world_size());
        desc
    }

    /// all_to_allv splits for this rank. Every rank shares the configured
    /// split, so a one-sided split determines the other side: rank `r`
    /// exchanges `split[r]` elements with each peer. A split of the wrong
    /// length is passed through for staging to reject.
    fn all_to_allv_splits(&self) -> (Option<Vec<usize>>, Option<Vec<usize>>) {
        let p = &self.params;
        let world = self.backend.world_size() as usize;
        let rank = self.backend.global_rank() as usize;
        let mirror = |split: &[usize]| {
            if split.len() == world {
                split.get(rank).map(|&n| vec![n; world])
            } else {
                None
            }
        };
        match (&p.in_split, &p.out_split) {
            (Some(i), None) => (Some(i.clone()), mirror(i.as_slice())),
            (None, Some(o)) => (mirror(o.as_slice()), Some(o.clone())),
            (i, o) => (i.clone(), o.clone()),
        }
    }

    /// Source and destination ranks for `op`, defaulting when unset.
    fn peers(&self, op: CollectiveOp) -> (Vec<Rank>, Vec<Rank>) {
        let p = &self.params;
        let world = self.backend.world_size();
        let last = world.saturating_sub(1);
        match op {
            CollectiveOp::Incast if p.src_ranks.is_empty() => {
                ((0..world).filter(|&r| r != p.root).collect(), Vec::new())
            }
            CollectiveOp::Multicast if p.dst_ranks.is_empty() => {
                (Vec::new(), (0..world).filter(|&r| r != p.root).collect())
            }
            CollectiveOp::Pt2Pt | CollectiveOp::Recv
                if p.src_ranks.is_empty() && p.dst_ranks.is_empty() =>
            {
                (vec![0], vec![last])
            }
            _ => (p.src_ranks.clone(), p.dst_ranks.clone()),
        }
    }

    fn stage(&self, desc: &CommsArgs, src_ranks: &[Rank], allocate: bool) -> Result<StagedBuffers> {
        if src_ranks == self.params.src_ranks.as_slice() {
            return stage_collective(&*self.backend, desc, &self.params, allocate);
        }
        let params = CommsParams {
            src_ranks: src_ranks.to_vec(),
            ..(*self.params).clone()
        };
        stage_collective(&*self.backend, desc, &params, allocate)
    }

    /// Fresh buffers, or previous tensors under refreshed metadata when
    /// buffers are reused.
    fn restage(&self, desc: &CommsArgs, src: &[Rank], previous: StagedBuffers) -> Result<StagedBuffers> {
        if self.params.reuse_tensors {
            let mut staged = self.stage(desc, src, false)?;
            staged.reuse_from(previous);
            Ok(staged)
        } else {
            self.stage(desc, src, true)
        }
    }

    async fn run_size(
        &mut self,
        op: CollectiveOp,
        size_bytes: usize,
        compute: Option<&ComputeWorkload>,
    ) -> Result<SizeReport> {
        let backend = Arc::clone(&self.backend);
        let params = Arc::clone(&self.params);
        let world = backend.world_size();
        let desc = self.descriptor(op, size_bytes);
        let (src, dst) = self.peers(op);

        let template = CollectiveCall::new(self.stage(&desc, &src, true)?)
            .with_root(params.root)
            .with_peers(src.clone(), dst.clone())
            .with_group(backend.default_group())
            .with_reduce_op(params.reduce_op);
        let elements = desc.in_elems();

        let mut call = template;
        for _ in 0..params.warmup_iterations {
            call = backend.collective(call).await?;
        }
        backend.complete_accel_ops().await?;
        backend.barrier().await?;

        let per_iter = params.num_coll.max(1);
        let mut timer = ParamTimer::new();
        let mut pending = PendingOps::new();
        {
            let _comm = StreamGuard::enter(&*backend, Some(self.comm_stream));
            for _ in 0..params.iterations {
                call.buffers = self.restage(&desc, &src, std::mem::take(&mut call.buffers))?;
                let issued: Vec<CollectiveCall> = if params.blocking {
                    Vec::new()
                } else {
                    (0..per_iter).map(|_| call.clone()).collect()
                };

                let _interval = Profile::start(&mut timer, op.name());
                if params.blocking {
                    for _ in 0..per_iter {
                        call = backend.collective(call).await?;
                    }
                } else {
                    for c in issued {
                        let b = Arc::clone(&backend);
                        pending.track(WorkHandle::spawn(async move { b.collective(c).await }));
                    }
                }
                if let Some(work) = compute {
                    work.run(&*backend)?;
                }
                if !params.blocking
                    && let Some(done) = pending.wait_all().await?
                {
                    call = done;
                }
                backend.complete_accel_ops().await?;
            }
        }
        let last = call.buffers.destination().flush();
        tracing::trace!(op = %op, size_bytes, ?last, "timed iterations flushed");

        let (avg_ns, alg_bw) =
            bandwidth::alg_bw(timer.elapsed_ns(), size_bytes_of(&desc, &params), params.iterations * per_iter);
        let bus_bw = bandwidth::bus_bw(op, alg_bw, world);
        let latency = self.gather_latency(avg_ns / 1e3).await?;

        let validated = if params.dcheck {
            self.validate(op, &desc, &src, &dst, size_bytes).await?;
            Some(true)
        } else {
            None
        };

        Ok(SizeReport {
            collective: op,
            size_bytes: size_bytes_of(&desc, &params),
            elements,
            dtype: params.dtype,
            iterations: params.iterations,
            latency,
            alg_bw_gbps: alg_bw,
            bus_bw_gbps: bus_bw,
            validated,
        })
    }

    /// Every rank's average latency, exchanged with an all_gather_base.
    async fn gather_latency(&self, avg_us: f64) -> Result<LatencyStats> {
        let world = self.backend.world_size() as usize;
        let buffers = StagedBuffers::out_of_place(
            CollectiveOp::AllGatherBase,
            Staged::Single(Tensor::from_values(&[avg_us], DataType::F64)),
            Staged::Single(Tensor::zeros(world, DataType::F64)),
        );
        let call = self
            .backend
            .collective(CollectiveCall::new(buffers).with_group(self.backend.default_group()))
            .await?;
        let samples = call.buffers.destination().single("latency gather")?.to_values();
        Ok(LatencyStats::from_samples(&samples))
    }

    /// One run on freshly staged, predictable buffers, checked against the
    /// expected result. Mismatches surface as `ValidationFailed` on the
    /// failing rank and `PeerValidationFailed` everywhere else.
    async fn validate(
        &mut self,
        op: CollectiveOp,
        desc: &CommsArgs,
        src: &[Rank],
        dst: &[Rank],
        size_bytes: usize,
    ) -> Result<()> {
        let mut buffers = self.stage(desc, src, true)?;
        let rank = self.backend.global_rank();
        let rand_val: f64 = self.rng.random();
        self.checker
            .set_tensor_val(&mut buffers, rank, self.params.root, rand_val);

        let call = CollectiveCall::new(buffers)
            .with_root(self.params.root)
            .with_peers(src.to_vec(), dst.to_vec())
            .with_group(self.backend.default_group())
            .with_reduce_op(self.params.reduce_op);
        let done = if self.params.blocking {
            self.backend.collective(call).await?
        } else {
            let mut pending = PendingOps::new();
            let b = Arc::clone(&self.backend);
            let req = pending.track(WorkHandle::spawn(async move { b.collective(call).await }));
            pending.wait(req).await?
        };
        self.backend.complete_accel_ops().await?;
        let outcome = self
            .checker
            .check(&done, rank, self.backend.world_size(), size_bytes);

        let failed_ranks = self.count_failures(outcome.is_err()).await?;
        match outcome {
            Err(e) => Err(e),
            Ok(()) if failed_ranks > 0 => Err(BenchError::PeerValidationFailed {
                size_bytes,
                operation: op.name(),
            }),
            Ok(()) => Ok(()),
        }
    }

    /// Number of ranks reporting `failed`, so every rank stops at the same
    /// size when any one of them fails validation.
    async fn count_failures(&self, failed: bool) -> Result<usize> {
        let flag = StagedBuffers::in_place(
            CollectiveOp::AllReduce,
            Staged::Single(Tensor::from_values(&[f64::from(u8::from(failed))], DataType::F64)),
        );
        let call = self
            .backend
            .collective(CollectiveCall::new(flag).with_group(self.backend.default_group()))
            .await?;
        let total = call.buffers.destination().single("validation status")?.get(0);
        Ok(total.round().max(0.0) as usize)
    }
}

fn size_bytes_of(desc: &CommsArgs, params: &CommsParams) -> usize {
    desc.in_elems() * params.dtype.size_in_bytes()
}
