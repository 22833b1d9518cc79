use super::helpers::{quick_params, run_bench};
use commbench::{CollectiveOp, CommsParams, ComputeKernel, DataType};

const VALIDATED_OPS: &[&str] = &[
    "all_reduce",
    "all_to_all",
    "all_to_allv",
    "broadcast",
    "reduce",
    "gather",
    "all_gather",
    "all_gather_base",
    "reduce_scatter",
    "reduce_scatter_base",
    "scatter",
    "incast",
    "multicast",
    "pt2pt",
    "barrier",
];

/// Every collective validates at every world size from 2 to 4.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_collective_validates() {
    for &name in VALIDATED_OPS {
        for world in 2..=4u32 {
            let params = CommsParams {
                dcheck: true,
                ..quick_params(name)
            };
            for (rank, result) in run_bench(world, params).await.into_iter().enumerate() {
                let report = result.unwrap_or_else(|e| panic!("{name} world={world} rank={rank}: {e}"));
                assert_eq!(report.sizes.len(), 3, "{name} world={world}");
                assert!(report.sizes.iter().all(|s| s.validated == Some(true)));
            }
        }
    }
}

/// Aliased names resolve to the same collective.
#[tokio::test]
async fn test_alias_names() {
    let params = CommsParams {
        dcheck: true,
        ..quick_params("AllToAllBase")
    };
    for result in run_bench(2, params).await {
        let report = result.unwrap();
        assert!(report.sizes.iter().all(|s| s.collective == CollectiveOp::AllToAllv));
    }
}

#[tokio::test]
async fn test_bool_all_reduce_expects_init() {
    let params = CommsParams {
        dcheck: true,
        dtype: DataType::Bool,
        ..quick_params("all_reduce")
    };
    for result in run_bench(3, params).await {
        let report = result.unwrap();
        assert!(report.sizes.iter().all(|s| s.dtype == DataType::Bool));
    }
}

#[tokio::test]
async fn test_zero_iterations_report_zero() {
    let params = CommsParams {
        iterations: 0,
        ..quick_params("all_reduce")
    };
    for result in run_bench(2, params).await {
        for size in result.unwrap().sizes {
            assert_eq!(size.latency.avg_us, 0.0);
            assert_eq!(size.alg_bw_gbps, 0.0);
            assert_eq!(size.bus_bw_gbps, 0.0);
        }
    }
}

/// Latency is gathered across ranks, so every rank reports the same stats.
#[tokio::test]
async fn test_latency_agrees_across_ranks() {
    let reports: Vec<_> = run_bench(3, quick_params("broadcast"))
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();
    for r in &reports[1..] {
        for (a, b) in r.sizes.iter().zip(&reports[0].sizes) {
            assert_eq!(a.latency, b.latency);
        }
    }
    for s in &reports[0].sizes {
        assert!(s.latency.min_us <= s.latency.avg_us && s.latency.avg_us <= s.latency.max_us);
    }
}

/// Split collectives round sizes down to a multiple of the world size.
#[tokio::test]
async fn test_split_sizes_round_to_world() {
    for result in run_bench(3, quick_params("all_gather")).await {
        for size in result.unwrap().sizes {
            assert_eq!(size.elements % 3, 0);
            assert_eq!(size.size_bytes, size.elements * 4);
        }
    }
}

#[tokio::test]
async fn test_restaging_every_iteration() {
    let params = CommsParams {
        reuse_tensors: false,
        dcheck: true,
        ..quick_params("reduce_scatter")
    };
    for result in run_bench(2, params).await {
        result.unwrap();
    }
}

#[tokio::test]
async fn test_multiple_collectives_in_order() {
    let params = CommsParams {
        collectives: vec!["all_reduce".into(), "all_gather".into()],
        ..quick_params("all_reduce")
    };
    let report = run_bench(2, params).await.remove(0).unwrap();
    let ops: Vec<_> = report.sizes.iter().map(|s| s.collective).collect();
    assert_eq!(ops[..3], [CollectiveOp::AllReduce; 3]);
    assert_eq!(ops[3..], [CollectiveOp::AllGather; 3]);
}

#[tokio::test]
async fn test_interleaved_compute() {
    for kernel in [ComputeKernel::Gemm, ComputeKernel::EmbLookup] {
        let params = CommsParams {
            kernel: Some(kernel),
            num_compute: 2,
            num_coll: 2,
            mm_dim: 8,
            num_embs: 32,
            emb_dim: 4,
            batch_size: 2,
            bag_size: 2,
            dcheck: true,
            ..quick_params("all_reduce")
        };
        for result in run_bench(2, params).await {
            result.unwrap();
        }
    }
}

#[tokio::test]
async fn test_quantization_falls_back_to_32_bit() {
    let params = CommsParams {
        bitwidth: 16,
        ..quick_params("all_reduce")
    };
    for result in run_bench(2, params).await {
        assert_eq!(result.unwrap().bitwidth, 32);
    }
}

/// A one-sided all_to_allv split sizes the other side from what each rank
/// actually exchanges.
#[tokio::test]
async fn test_all_to_allv_input_split_only() {
    for split in [vec![4, 4], vec![1, 3]] {
        let params = CommsParams {
            in_split: Some(split.clone()),
            dcheck: true,
            ..quick_params("all_to_allv")
        };
        for (rank, result) in run_bench(2, params).await.into_iter().enumerate() {
            let report = result.unwrap_or_else(|e| panic!("split {split:?} rank {rank}: {e}"));
            assert!(report.sizes.iter().all(|s| s.elements == split.iter().sum::<usize>()));
            assert!(report.sizes.iter().all(|s| s.validated == Some(true)));
        }
    }
}

#[tokio::test]
async fn test_all_to_allv_output_split_only() {
    let params = CommsParams {
        out_split: Some(vec![2, 6]),
        dcheck: true,
        ..quick_params("all_to_allv")
    };
    let reports: Vec<_> = run_bench(2, params)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();
    // Rank r sends out_split[r] to every peer.
    assert_eq!(reports[0].sizes[0].elements, 4);
    assert_eq!(reports[1].sizes[0].elements, 12);
}

#[tokio::test]
async fn test_all_to_allv_split_for_other_world_is_config_error() {
    let params = CommsParams {
        in_split: Some(vec![4, 4, 4]),
        ..quick_params("all_to_allv")
    };
    for result in run_bench(2, params).await {
        let err = result.unwrap_err();
        assert!(err.is_config(), "{err}");
    }
}
