use super::helpers::{quick_params, run_bench, run_ranks};
use commbench::{
    Backend, CollectiveCall, CollectiveOp, CommsParams, PendingOps, Staged, StagedBuffers, Tensor,
    DataType, WorkHandle,
};
use std::sync::Arc;

/// Non-blocking runs validate exactly like blocking runs.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_nonblocking_validates() {
    for name in ["all_reduce", "all_to_all", "all_gather", "reduce_scatter_base", "broadcast"] {
        let params = CommsParams {
            blocking: false,
            dcheck: true,
            num_coll: 3,
            ..quick_params(name)
        };
        for result in run_bench(3, params).await {
            let report = result.unwrap_or_else(|e| panic!("{name}: {e}"));
            assert!(!report.blocking);
            assert!(report.sizes.iter().all(|s| s.validated == Some(true)));
        }
    }
}

/// Two outstanding all-reduces on different buffers both complete.
#[tokio::test]
async fn test_two_outstanding_requests() {
    let results = run_ranks(4, |b| async move {
        let rank = f64::from(b.global_rank());
        let call = |v: f64| {
            CollectiveCall::new(StagedBuffers::in_place(
                CollectiveOp::AllReduce,
                Staged::Single(Tensor::full(4, DataType::F32, v)),
            ))
        };
        let mut pending = PendingOps::new();
        let b1 = Arc::clone(&b);
        let c1 = call(rank + 1.0);
        let a = pending.track(WorkHandle::spawn(async move { b1.collective(c1).await }));
        let b2 = Arc::clone(&b);
        let c2 = call(10.0 * (rank + 1.0));
        let bb = pending.track(WorkHandle::spawn(async move { b2.collective(c2).await }));

        let first = pending.wait(a).await.unwrap();
        let second = pending.wait(bb).await.unwrap();
        assert!(pending.is_empty());
        (
            first.buffers.input.tensors()[0].to_values(),
            second.buffers.input.tensors()[0].to_values(),
        )
    })
    .await;
    for (a, b) in results {
        assert_eq!(a, vec![10.0; 4]);
        assert_eq!(b, vec![100.0; 4]);
    }
}
