//! Run configuration.
//!
//! [`CommsParams`] is built once per run (normally from the command line),
//! validated, then shared read-only behind an `Arc`. [`WorldInfo`] records
//! where this process sits in the launcher's world.

use crate::collective::CollectiveOp;
use crate::compute::ComputeKernel;
use crate::error::{BenchError, Result};
use crate::types::{DataType, Rank, ReduceOp};
use std::time::Duration;

const WORLD_SIZE_VARS: &[&str] = &[
    "MV2_COMM_WORLD_SIZE",
    "OMPI_COMM_WORLD_SIZE",
    "PMI_SIZE",
    "WORLD_SIZE",
];
const LOCAL_SIZE_VARS: &[&str] = &[
    "LOCAL_SIZE",
    "MPI_LOCALNRANKS",
    "MV2_COMM_WORLD_LOCAL_SIZE",
    "OMPI_COMM_WORLD_LOCAL_SIZE",
];
const GLOBAL_RANK_VARS: &[&str] = &[
    "MV2_COMM_WORLD_RANK",
    "OMPI_COMM_WORLD_RANK",
    "PMI_RANK",
    "RANK",
];
const LOCAL_RANK_VARS: &[&str] = &[
    "LOCAL_RANK",
    "MPI_LOCALRANKID",
    "MV2_COMM_WORLD_LOCAL_RANK",
    "OMPI_COMM_WORLD_LOCAL_RANK",
];

/// Operations quantized communication is available for.
const QUANTIZABLE: &[CollectiveOp] = &[
    CollectiveOp::AllToAll,
    CollectiveOp::AllToAllv,
    CollectiveOp::Reduce,
    CollectiveOp::AllReduce,
];

/// Position of this process in the launcher's world. Fields are `None` when
/// no launcher variable provided them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldInfo {
    pub world_size: Option<u32>,
    pub local_size: Option<u32>,
    pub global_rank: Option<Rank>,
    pub local_rank: Option<Rank>,
    pub master_addr: String,
    pub master_port: u16,
}

impl Default for WorldInfo {
    fn default() -> Self {
        Self {
            world_size: None,
            local_size: None,
            global_rank: None,
            local_rank: None,
            master_addr: "127.0.0.1".to_string(),
            master_port: 29500,
        }
    }
}

impl WorldInfo {
    /// Read MPI / torchrun launcher variables from the environment.
    ///
    /// Each field takes the first non-negative integer among its variable
    /// list (`MV2_*`, `OMPI_*`, `PMI_*`, then the torchrun name).
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let first = |keys: &[&str]| {
            keys.iter()
                .filter_map(|k| lookup(k))
                .filter_map(|v| v.trim().parse::<i64>().ok())
                .find(|&v| v >= 0)
                .and_then(|v| u32::try_from(v).ok())
        };
        let mut info = Self {
            world_size: first(WORLD_SIZE_VARS),
            local_size: first(LOCAL_SIZE_VARS),
            global_rank: first(GLOBAL_RANK_VARS),
            local_rank: first(LOCAL_RANK_VARS),
            ..Self::default()
        };
        if let Some(addr) = lookup("MASTER_ADDR") {
            info.master_addr = addr;
        }
        if let Some(port) = lookup("MASTER_PORT").and_then(|p| p.parse().ok()) {
            info.master_port = port;
        }
        info
    }
}

/// Parameters for one benchmark run.
#[derive(Debug, Clone)]
pub struct CommsParams {
    pub backend: String,
    pub device: String,
    /// First message size in bytes.
    pub begin_size: usize,
    /// Last message size in bytes (inclusive).
    pub end_size: usize,
    pub step_factor: usize,
    /// Additive step in bytes; `0` means multiply by `step_factor`.
    pub step_bytes: usize,
    pub iterations: usize,
    pub warmup_iterations: usize,
    pub dtype: DataType,
    /// Raw collective names in the order they run.
    pub collectives: Vec<String>,
    pub root: Rank,
    pub src_ranks: Vec<Rank>,
    pub dst_ranks: Vec<Rank>,
    pub in_split: Option<Vec<usize>>,
    pub out_split: Option<Vec<usize>>,
    pub blocking: bool,
    pub dcheck: bool,
    pub init_val: f64,
    pub reduce_op: ReduceOp,
    pub bitwidth: u32,
    pub quant_a2a_embedding_dim: usize,
    pub quant_threshold: usize,
    /// Keep staged buffers across iterations instead of restaging.
    pub reuse_tensors: bool,
    pub seed: u64,
    pub collective_timeout: Duration,
    pub kernel: Option<ComputeKernel>,
    pub num_compute: usize,
    pub num_coll: usize,
    pub mm_dim: usize,
    pub emb_dim: usize,
    pub num_embs: usize,
    pub batch_size: usize,
    pub bag_size: usize,
    pub num_emb_tables_per_device: usize,
    /// Tables per lookup batch; `None` batches every table together.
    pub num_emb_tables_batched: Option<usize>,
    pub world: WorldInfo,
}

impl Default for CommsParams {
    fn default() -> Self {
        Self {
            backend: "local".to_string(),
            device: "cpu".to_string(),
            begin_size: 8,
            end_size: 256,
            step_factor: 2,
            step_bytes: 0,
            iterations: 5,
            warmup_iterations: 5,
            dtype: DataType::F32,
            collectives: vec!["all_reduce".to_string()],
            root: 0,
            src_ranks: Vec::new(),
            dst_ranks: Vec::new(),
            in_split: None,
            out_split: None,
            blocking: true,
            dcheck: false,
            init_val: 1.0,
            reduce_op: ReduceOp::Sum,
            bitwidth: 32,
            quant_a2a_embedding_dim: 32,
            quant_threshold: 33_554_432,
            reuse_tensors: true,
            seed: 0,
            collective_timeout: Duration::from_secs(30),
            kernel: None,
            num_compute: 100,
            num_coll: 1,
            mm_dim: 100,
            emb_dim: 128,
            num_embs: 1000,
            batch_size: 64,
            bag_size: 20,
            num_emb_tables_per_device: 8,
            num_emb_tables_batched: None,
            world: WorldInfo::default(),
        }
    }
}

impl CommsParams {
    /// Apply `COMMBENCH_*` environment overrides.
    ///
    /// Recognized variables:
    /// - `COMMBENCH_COLLECTIVE_TIMEOUT_SECS`
    /// - `COMMBENCH_SEED`
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("COMMBENCH_COLLECTIVE_TIMEOUT_SECS")
            && let Ok(s) = v.parse::<u64>()
        {
            self.collective_timeout = Duration::from_secs(s);
        }
        if let Ok(v) = std::env::var("COMMBENCH_SEED")
            && let Ok(s) = v.parse::<u64>()
        {
            self.seed = s;
        }
        self
    }

    /// Collective names resolved against the full operation set.
    pub fn resolved_collectives(&self) -> Result<Vec<CollectiveOp>> {
        self.collectives
            .iter()
            .map(|name| CollectiveOp::resolve(name, CollectiveOp::ALL))
            .collect()
    }

    /// Message-size sweep in bytes.
    pub fn sizes(&self) -> Vec<usize> {
        crate::sizes::get_sizes(self.begin_size, self.end_size, self.step_factor, self.step_bytes)
    }

    pub fn is_quantized(&self) -> bool {
        self.bitwidth < 32
    }

    /// Embedding-lookup batches per compute step.
    pub fn num_emb_ops(&self) -> usize {
        let batched = self
            .num_emb_tables_batched
            .unwrap_or(self.num_emb_tables_per_device)
            .max(1);
        self.num_emb_tables_per_device / batched
    }

    /// Reject inconsistent settings before anything is staged.
    pub fn validate(&self) -> Result<()> {
        if self.collectives.is_empty() {
            return Err(BenchError::config("no collective requested"));
        }
        self.resolved_collectives()?;
        if self.begin_size > self.end_size {
            return Err(BenchError::config(format!(
                "begin size {} exceeds end size {}",
                self.begin_size, self.end_size
            )));
        }
        if self.step_bytes == 0 && self.step_factor < 2 && self.begin_size != self.end_size {
            return Err(BenchError::config(format!(
                "step factor must be at least 2 without a byte step, got {}",
                self.step_factor
            )));
        }
        if self.dcheck && self.reduce_op != ReduceOp::Sum {
            return Err(BenchError::config(format!(
                "data validation expects a sum reduction, got {}",
                self.reduce_op
            )));
        }
        if let Some(world) = self.world.world_size {
            for split in [&self.in_split, &self.out_split].into_iter().flatten() {
                if split.len() != world as usize {
                    return Err(BenchError::SplitMismatch {
                        operation: CollectiveOp::AllToAllv.name(),
                        splits: split.clone(),
                        count: split.iter().sum(),
                        world_size: world as usize,
                    });
                }
            }
        }
        if self.kernel.is_some() && self.num_coll == 0 {
            return Err(BenchError::config("--num-coll must be positive when a kernel is set"));
        }
        if let Some(batched) = self.num_emb_tables_batched
            && (batched == 0 || self.num_emb_tables_per_device % batched != 0)
        {
            return Err(BenchError::config(format!(
                "{} tables per device cannot be batched in groups of {batched}",
                self.num_emb_tables_per_device
            )));
        }
        self.check_quant_args()
    }

    /// Reject quantization requests the harness cannot honor.
    ///
    /// Quantization applies to all_to_all(v), reduce and all_reduce only,
    /// requires float32 and, for all-to-all, blocking mode. A begin size that
    /// is not a multiple of the all-to-all embedding dimension only warns.
    pub fn check_quant_args(&self) -> Result<()> {
        if !self.is_quantized() {
            return Ok(());
        }
        for op in self.resolved_collectives()? {
            if !QUANTIZABLE.contains(&op) {
                return Err(BenchError::UnsupportedQuantization(format!(
                    "quantized communication for {op} is currently unsupported"
                )));
            }
            if matches!(op, CollectiveOp::AllToAll | CollectiveOp::AllToAllv) {
                if self.quant_a2a_embedding_dim == 0
                    || (self.begin_size / 4) % self.quant_a2a_embedding_dim != 0
                {
                    tracing::warn!(
                        begin_size = self.begin_size,
                        quant_a2a_embedding_dim = self.quant_a2a_embedding_dim,
                        "begin size should be a multiple of the quant all-to-all embedding dim"
                    );
                }
                if !self.blocking {
                    return Err(BenchError::UnsupportedQuantization(
                        "quantized all_to_all must be synchronous".to_string(),
                    ));
                }
            }
        }
        if self.dtype != DataType::F32 {
            return Err(BenchError::UnsupportedQuantization(format!(
                "quantization for {} is not supported, use float32 instead",
                self.dtype.name()
            )));
        }
        Ok(())
    }
}
