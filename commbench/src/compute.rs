//! Synthetic compute interleaved with collectives.

use crate::backend::{Backend, StreamGuard};
use crate::config::CommsParams;
use crate::error::{BenchError, Result};
use crate::tensor::Tensor;
use crate::types::{DataType, StreamId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ComputeKernel {
    Gemm,
    #[value(name = "emb_lookup")]
    EmbLookup,
}

/// `a x b` for row-major `dim x dim` matrices.
pub fn matmul(a: &Tensor, b: &Tensor, dim: usize) -> Result<Tensor> {
    let n = dim * dim;
    for t in [a, b] {
        if t.numel() != n {
            return Err(BenchError::BufferSizeMismatch {
                expected: n,
                actual: t.numel(),
            });
        }
    }
    let (av, bv) = (a.to_values(), b.to_values());
    let mut out = vec![0.0f64; n];
    for i in 0..dim {
        for k in 0..dim {
            let aik = av[i * dim + k];
            for j in 0..dim {
                out[i * dim + j] += aik * bv[k * dim + j];
            }
        }
    }
    Ok(Tensor::from_values(&out, a.dtype()))
}

/// Sum-pooled embedding bags. Bag `i` covers `indices[offsets[i]..offsets[i + 1]]`
/// (the last bag runs to the end); the result is `offsets.len() x dim`.
pub fn embedding_bag_sum(
    table: &Tensor,
    dim: usize,
    indices: &[usize],
    offsets: &[usize],
) -> Result<Tensor> {
    if dim == 0 || table.numel() % dim != 0 {
        return Err(BenchError::config(format!(
            "embedding table of {} elements is not a multiple of dim {dim}",
            table.numel()
        )));
    }
    let rows = table.numel() / dim;
    let values = table.to_values();
    let mut out = vec![0.0f64; offsets.len() * dim];
    for (bag, &start) in offsets.iter().enumerate() {
        let end = offsets.get(bag + 1).copied().unwrap_or(indices.len());
        let Some(members) = indices.get(start..end) else {
            return Err(BenchError::config(format!(
                "bag {bag} spans {start}..{end} beyond {} indices",
                indices.len()
            )));
        };
        for &row in members {
            if row >= rows {
                return Err(BenchError::config(format!(
                    "embedding index {row} out of range for {rows} rows"
                )));
            }
            let src = &values[row * dim..(row + 1) * dim];
            for (o, v) in out[bag * dim..(bag + 1) * dim].iter_mut().zip(src) {
                *o += v;
            }
        }
    }
    Ok(Tensor::from_values(&out, table.dtype()))
}

enum Workload {
    Gemm {
        a: Tensor,
        b: Tensor,
        dim: usize,
    },
    EmbLookup {
        dim: usize,
        /// One table, index list and offset list per lookup op.
        ops: Vec<(Tensor, Vec<usize>, Vec<usize>)>,
    },
}

/// Prepared inputs for the selected kernel, run on a dedicated stream.
pub struct ComputeWorkload {
    kernel: ComputeKernel,
    workload: Workload,
    num_compute: usize,
    stream: StreamId,
}

impl ComputeWorkload {
    /// Allocate kernel inputs, or `None` when no kernel is configured.
    pub fn prepare(backend: &dyn Backend, params: &CommsParams) -> Result<Option<Self>> {
        let Some(kernel) = params.kernel else {
            return Ok(None);
        };
        let workload = match kernel {
            ComputeKernel::Gemm => {
                let n = params.mm_dim * params.mm_dim;
                Workload::Gemm {
                    a: backend.alloc_random(n, DataType::F32, 0.0),
                    b: backend.alloc_random(n, DataType::F32, 0.0),
                    dim: params.mm_dim,
                }
            }
            ComputeKernel::EmbLookup => {
                let batched = params
                    .num_emb_tables_batched
                    .unwrap_or(params.num_emb_tables_per_device)
                    .max(1);
                let rows = params.num_embs * batched;
                let bags = params.batch_size * batched;
                let mut rng = StdRng::seed_from_u64(
                    params.seed ^ u64::from(backend.global_rank()).rotate_left(32),
                );
                let ops = (0..params.num_emb_ops())
                    .map(|_| {
                        let table = backend.alloc_embedding_table(rows, params.emb_dim, DataType::F32);
                        let indices: Vec<usize> = (0..bags * params.bag_size)
                            .map(|_| rng.random_range(0..rows.max(1)))
                            .collect();
                        let offsets: Vec<usize> = (0..bags).map(|b| b * params.bag_size).collect();
                        (table, indices, offsets)
                    })
                    .collect();
                Workload::EmbLookup {
                    dim: params.emb_dim,
                    ops,
                }
            }
        };
        tracing::info!(?kernel, num_compute = params.num_compute, "compute workload prepared");
        Ok(Some(Self {
            kernel,
            workload,
            num_compute: params.num_compute,
            stream: backend.create_stream(),
        }))
    }

    pub fn kernel(&self) -> ComputeKernel {
        self.kernel
    }

    /// Run the kernel `num_compute` times on the compute stream.
    pub fn run(&self, backend: &dyn Backend) -> Result<()> {
        let _stream = StreamGuard::enter(backend, Some(self.stream));
        for _ in 0..self.num_compute {
            match &self.workload {
                Workload::Gemm { a, b, dim } => {
                    backend.gemm(a, b, *dim)?;
                }
                Workload::EmbLookup { dim, ops } => {
                    for (table, indices, offsets) in ops {
                        backend.emb_lookup(table, *dim, indices, offsets)?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{LocalBackend, LocalWorld};

    #[test]
    fn test_matmul_identity() {
        let a = Tensor::from_values(&[1.0, 2.0, 3.0, 4.0], DataType::F32);
        let id = Tensor::from_values(&[1.0, 0.0, 0.0, 1.0], DataType::F32);
        assert_eq!(matmul(&a, &id, 2).unwrap(), a);
        let prod = matmul(&a, &a, 2).unwrap();
        assert_eq!(prod.to_values(), vec![7.0, 10.0, 15.0, 22.0]);
        assert!(matmul(&a, &id, 3).is_err());
    }

    #[test]
    fn test_embedding_bag_sum() {
        // three rows of dim 2
        let table = Tensor::from_values(&[1.0, 1.0, 2.0, 2.0, 3.0, 3.0], DataType::F32);
        let out = embedding_bag_sum(&table, 2, &[0, 2, 1, 1], &[0, 2]).unwrap();
        assert_eq!(out.to_values(), vec![4.0, 4.0, 4.0, 4.0]);
        assert!(embedding_bag_sum(&table, 2, &[3], &[0]).is_err());
        assert!(embedding_bag_sum(&table, 4, &[0], &[0]).is_err());
    }

    #[test]
    fn test_workload_restores_stream() {
        let backend = LocalBackend::new(0, LocalWorld::new(1), 0);
        let params = CommsParams {
            kernel: Some(ComputeKernel::EmbLookup),
            num_compute: 2,
            num_embs: 16,
            emb_dim: 4,
            batch_size: 2,
            bag_size: 3,
            num_emb_tables_per_device: 4,
            num_emb_tables_batched: Some(2),
            ..Default::default()
        };
        let work = ComputeWorkload::prepare(&backend, &params).unwrap().unwrap();
        assert_eq!(work.kernel(), ComputeKernel::EmbLookup);
        work.run(&backend).unwrap();
        assert_eq!(backend.current_stream(), None);
    }

    #[test]
    fn test_no_kernel_no_workload() {
        let backend = LocalBackend::new(0, LocalWorld::new(1), 0);
        assert!(ComputeWorkload::prepare(&backend, &CommsParams::default())
            .unwrap()
            .is_none());
    }
}
