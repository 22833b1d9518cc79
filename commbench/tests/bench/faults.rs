use super::helpers::quick_params;
use async_trait::async_trait;
use commbench::{
    Backend, BenchError, CollectiveCall, CollectiveOp, CommsBench, CommsParams, DataType,
    LocalBackend, LocalWorld, ProcessGroup, Rank, Result, StreamId, Tensor,
};
use std::sync::Arc;
use std::time::Duration;

/// Delegates to a [`LocalBackend`], optionally advertising fewer collectives
/// and corrupting the first element of every all_reduce result.
struct FaultyBackend {
    inner: LocalBackend,
    supported: Vec<CollectiveOp>,
    corrupt: bool,
}

impl FaultyBackend {
    fn new(inner: LocalBackend) -> Self {
        Self {
            inner,
            supported: CollectiveOp::ALL.to_vec(),
            corrupt: false,
        }
    }
}

#[async_trait]
impl Backend for FaultyBackend {
    fn name(&self) -> &'static str {
        "faulty"
    }
    fn local_rank(&self) -> Rank {
        self.inner.local_rank()
    }
    fn global_rank(&self) -> Rank {
        self.inner.global_rank()
    }
    fn world_size(&self) -> u32 {
        self.inner.world_size()
    }
    fn device(&self) -> &str {
        self.inner.device()
    }
    fn groups(&self) -> &[ProcessGroup] {
        self.inner.groups()
    }
    fn supported_collectives(&self) -> &[CollectiveOp] {
        &self.supported
    }
    fn alloc_random(&self, numel: usize, dtype: DataType, scale: f64) -> Tensor {
        self.inner.alloc_random(numel, dtype, scale)
    }
    fn alloc_ones(&self, numel: usize, dtype: DataType, scale: f64) -> Tensor {
        self.inner.alloc_ones(numel, dtype, scale)
    }
    fn create_stream(&self) -> StreamId {
        self.inner.create_stream()
    }
    fn switch_stream(&self, stream: Option<StreamId>) -> Option<StreamId> {
        self.inner.switch_stream(stream)
    }
    fn current_stream(&self) -> Option<StreamId> {
        self.inner.current_stream()
    }
    async fn collective(&self, call: CollectiveCall) -> Result<CollectiveCall> {
        let mut done = self.inner.collective(call).await?;
        if self.corrupt
            && done.op() == CollectiveOp::AllReduce
            && let Some(t) = done.buffers.destination_mut().tensors_mut().first_mut()
        {
            t.set(0, 42.0);
        }
        Ok(done)
    }
}

#[tokio::test]
async fn test_unsupported_collective_fails_before_allocating() {
    let world = LocalWorld::new(1);
    let mut backend = FaultyBackend::new(LocalBackend::new(0, world, 0));
    backend.supported = vec![CollectiveOp::AllReduce, CollectiveOp::AllGatherBase];
    let backend = Arc::new(backend);

    let params = Arc::new(quick_params("all_to_all"));
    let err = CommsBench::new(backend.clone(), params).err().unwrap();
    match err {
        BenchError::UnsupportedCollective { name, supported } => {
            assert_eq!(name, "all_to_all");
            assert_eq!(supported, vec!["all_reduce", "all_gather_base"]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(backend.inner.allocations(), 0);
}

#[tokio::test]
async fn test_corrupted_result_fails_validation() {
    let world = LocalWorld::new(2);
    let params = Arc::new(CommsParams {
        dcheck: true,
        ..quick_params("all_reduce")
    });

    let mut handles = Vec::new();
    for inner in world.ranks(0) {
        let params = Arc::clone(&params);
        handles.push(tokio::spawn(async move {
            let mut backend = FaultyBackend::new(inner);
            backend.corrupt = true;
            let mut bench = CommsBench::new(Arc::new(backend), params)?;
            bench.run().await
        }));
    }
    for h in handles {
        match h.await.unwrap() {
            Err(BenchError::ValidationFailed {
                operation,
                location,
                actual,
                size_bytes,
                ..
            }) => {
                assert_eq!(operation, "all_reduce");
                assert_eq!(location, "[0]");
                assert_eq!(actual, 42.0);
                assert_eq!(size_bytes, 64);
            }
            other => panic!("expected validation failure, got {other:?}"),
        }
    }
}

/// Without validation the same corruption goes unnoticed.
#[tokio::test]
async fn test_corruption_unchecked_without_dcheck() {
    let world = LocalWorld::new(2);
    let params = Arc::new(quick_params("all_reduce"));
    let mut handles = Vec::new();
    for inner in world.ranks(0) {
        let params = Arc::clone(&params);
        handles.push(tokio::spawn(async move {
            let mut backend = FaultyBackend::new(inner);
            backend.corrupt = true;
            CommsBench::new(Arc::new(backend), params)?.run().await
        }));
    }
    for h in handles {
        let report = h.await.unwrap().unwrap();
        assert_eq!(report.backend, "faulty");
        assert!(report.sizes.iter().all(|s| s.validated.is_none()));
    }
}

/// Latency aggregation needs all_gather_base, so a backend without it is
/// rejected up front.
#[tokio::test]
async fn test_missing_latency_gather_fails_fast() {
    let mut backend = FaultyBackend::new(LocalBackend::new(0, LocalWorld::new(1), 0));
    backend.supported = vec![CollectiveOp::AllReduce];
    let backend = Arc::new(backend);

    let err = CommsBench::new(backend.clone(), Arc::new(quick_params("all_reduce")))
        .err()
        .unwrap();
    assert!(matches!(
        err,
        BenchError::UnsupportedCollective { ref name, .. } if name == "all_gather_base"
    ));
    assert_eq!(backend.inner.allocations(), 0);
}

/// A validation failure on one rank stops every rank at the same size
/// instead of leaving the others waiting on the next collective.
#[tokio::test]
async fn test_single_rank_failure_stops_all_ranks() {
    let world = LocalWorld::with_options(2, Vec::new(), Duration::from_secs(5));
    let params = Arc::new(CommsParams {
        dcheck: true,
        ..quick_params("all_reduce")
    });

    let mut handles = Vec::new();
    for inner in world.ranks(0) {
        let params = Arc::clone(&params);
        handles.push(tokio::spawn(async move {
            let mut backend = FaultyBackend::new(inner);
            backend.corrupt = backend.global_rank() == 1;
            CommsBench::new(Arc::new(backend), params)?.run().await
        }));
    }

    let mut results = Vec::new();
    for h in handles {
        results.push(h.await.unwrap());
    }
    assert!(matches!(
        results[0],
        Err(BenchError::PeerValidationFailed {
            size_bytes: 64,
            operation: "all_reduce"
        })
    ));
    assert!(matches!(
        results[1],
        Err(BenchError::ValidationFailed { size_bytes: 64, .. })
    ));
}
