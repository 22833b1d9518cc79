//! Command-line arguments. Flag names follow nccl-tests (`--b`, `--e`,
//! `--f`, `--n`, `--w`, `--z`, `--c`) so existing sweep scripts carry over.

use crate::compute::ComputeKernel;
use crate::config::{CommsParams, WorldInfo};
use crate::error::{BenchError, Result};
use crate::sizes::{parse_rank_list, parse_size};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Collective communication micro-benchmark
#[derive(Parser, Debug, Clone)]
#[command(name = "commbench", version)]
#[command(about = "Measure latency and bandwidth of collective operations")]
pub struct Args {
    /// First message size in bytes (K/M/G suffixes accepted)
    #[arg(long = "b", default_value = "8")]
    pub begin_size: String,

    /// Last message size in bytes (K/M/G suffixes accepted)
    #[arg(long = "e", default_value = "256")]
    pub end_size: String,

    /// Multiplicative step between sizes
    #[arg(long = "f", default_value_t = 2)]
    pub step_factor: usize,

    /// Additive step in bytes; overrides --f when non-zero
    #[arg(long = "sb", default_value_t = 0)]
    pub step_bytes: usize,

    /// Warm-up iterations per size
    #[arg(long = "w", default_value_t = 5)]
    pub warmup: usize,

    /// Timed iterations per size
    #[arg(long = "n", default_value_t = 5)]
    pub iterations: usize,

    /// 1 for blocking collectives, 0 for non-blocking
    #[arg(long = "z", default_value_t = 1)]
    pub blocking: u8,

    /// 1 to validate results
    #[arg(long = "c", default_value_t = 0)]
    pub dcheck: u8,

    /// Comma-separated input split sizes for all_to_allv
    #[arg(long = "i")]
    pub in_split: Option<String>,

    /// Comma-separated output split sizes for all_to_allv
    #[arg(long = "o")]
    pub out_split: Option<String>,

    /// Collective(s) to run, comma separated
    #[arg(long, default_value = "all_reduce")]
    pub collective: String,

    /// Element type
    #[arg(long, default_value = "float32")]
    pub dtype: String,

    /// Reduction operator
    #[arg(long, default_value = "sum")]
    pub op: String,

    /// Root (source or destination) rank for rooted collectives
    #[arg(long, default_value_t = 0)]
    pub root: u32,

    /// Source ranks: "3", "1,2,3" or "0:3"
    #[arg(long)]
    pub src_ranks: Option<String>,

    /// Destination ranks: "3", "1,2,3" or "0:3"
    #[arg(long)]
    pub dst_ranks: Option<String>,

    /// Quantization bit-width; 32 disables quantization
    #[arg(long, default_value_t = 32)]
    pub bitwidth: u32,

    #[arg(long, default_value_t = 32)]
    pub quant_a2a_embedding_dim: usize,

    #[arg(long, default_value_t = 33_554_432)]
    pub quant_threshold: usize,

    /// Synthetic compute kernel to interleave with collectives
    #[arg(long, value_enum)]
    pub kernel: Option<ComputeKernel>,

    /// Kernel invocations per iteration
    #[arg(long, default_value_t = 100)]
    pub num_compute: usize,

    /// Collectives issued per iteration
    #[arg(long, default_value_t = 1)]
    pub num_coll: usize,

    #[arg(long, default_value_t = 100)]
    pub mm_dim: usize,

    #[arg(long, default_value_t = 128)]
    pub emb_dim: usize,

    #[arg(long, default_value_t = 1000)]
    pub num_embs: usize,

    #[arg(long, default_value_t = 64)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 20)]
    pub bag_size: usize,

    #[arg(long, default_value_t = 8)]
    pub num_emb_tables_per_device: usize,

    /// Tables per lookup batch; -1 batches all tables together
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    pub num_emb_tables_batched: i64,

    /// Communication backend
    #[arg(long, default_value = "local")]
    pub backend: String,

    #[arg(long, default_value = "cpu")]
    pub device: String,

    /// Ranks in the local world; falls back to launcher variables, then 2
    #[arg(long)]
    pub world_size: Option<u32>,

    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Restage buffers every iteration instead of reusing them
    #[arg(long)]
    pub no_reuse: bool,

    /// Per-collective timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,

    /// Default log filter (RUST_LOG takes precedence)
    #[arg(long, default_value = "info")]
    pub log: String,

    /// Write the report as JSON to this path
    #[arg(long)]
    pub output_json: Option<PathBuf>,
}

impl Args {
    /// Build validated run parameters.
    pub fn into_params(self, mut world: WorldInfo) -> Result<CommsParams> {
        if self.backend != "local" {
            return Err(BenchError::config(format!(
                "unknown backend {:?}, available: [\"local\"]",
                self.backend
            )));
        }
        let world_size = self.world_size.or(world.world_size).unwrap_or(2);
        if world_size == 0 {
            return Err(BenchError::InvalidWorldSize { world_size });
        }
        world.world_size = Some(world_size);

        let ranks = |s: &Option<String>, name| match s {
            Some(s) => parse_rank_list(s, name, world_size),
            None => Ok(Vec::new()),
        };

        let params = CommsParams {
            backend: self.backend.clone(),
            device: self.device.clone(),
            begin_size: parse_size(&self.begin_size)?,
            end_size: parse_size(&self.end_size)?,
            step_factor: self.step_factor,
            step_bytes: self.step_bytes,
            iterations: self.iterations,
            warmup_iterations: self.warmup,
            dtype: self.dtype.parse()?,
            collectives: self
                .collective
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            root: self.root,
            src_ranks: ranks(&self.src_ranks, "src_ranks")?,
            dst_ranks: ranks(&self.dst_ranks, "dst_ranks")?,
            in_split: parse_split(self.in_split.as_deref())?,
            out_split: parse_split(self.out_split.as_deref())?,
            blocking: self.blocking != 0,
            dcheck: self.dcheck != 0,
            reduce_op: self.op.parse()?,
            bitwidth: self.bitwidth,
            quant_a2a_embedding_dim: self.quant_a2a_embedding_dim,
            quant_threshold: self.quant_threshold,
            reuse_tensors: !self.no_reuse,
            seed: self.seed,
            collective_timeout: Duration::from_secs(self.timeout_secs),
            kernel: self.kernel,
            num_compute: self.num_compute,
            num_coll: self.num_coll,
            mm_dim: self.mm_dim,
            emb_dim: self.emb_dim,
            num_embs: self.num_embs,
            batch_size: self.batch_size,
            bag_size: self.bag_size,
            num_emb_tables_per_device: self.num_emb_tables_per_device,
            num_emb_tables_batched: usize::try_from(self.num_emb_tables_batched).ok(),
            world,
            ..CommsParams::default()
        };
        Ok(params)
    }
}

fn parse_split(input: Option<&str>) -> Result<Option<Vec<usize>>> {
    let Some(s) = input.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    s.split(',')
        .map(|p| {
            p.trim()
                .parse::<usize>()
                .map_err(|_| BenchError::InvalidSize(p.to_string()))
        })
        .collect::<Result<Vec<_>>>()
        .map(Some)
}
