use commbench::{BenchReport, CommsBench, CommsParams, LocalBackend, LocalWorld, Result};
use std::sync::Arc;
use std::time::Duration;

/// Helper: run `f` on every rank of a fresh local world concurrently and
/// collect the per-rank results in rank order.
pub async fn run_ranks<F, Fut, T>(world_size: u32, f: F) -> Vec<T>
where
    F: Fn(Arc<LocalBackend>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let world = LocalWorld::with_options(world_size, Vec::new(), Duration::from_secs(10));
    let backends: Vec<Arc<LocalBackend>> = world.ranks(0).into_iter().map(Arc::new).collect();

    let f = Arc::new(f);
    let mut handles = Vec::new();
    for b in &backends {
        let b = Arc::clone(b);
        let f = Arc::clone(&f);
        handles.push(tokio::spawn(async move { f(b).await }));
    }
    let mut out = Vec::new();
    for h in handles {
        out.push(h.await.unwrap());
    }
    out
}

/// Run a full benchmark on every rank.
pub async fn run_bench(world_size: u32, params: CommsParams) -> Vec<Result<BenchReport>> {
    let params = Arc::new(params);
    run_ranks(world_size, move |b| {
        let params = Arc::clone(&params);
        async move {
            let mut bench = CommsBench::new(b, params)?;
            bench.run().await
        }
    })
    .await
}

/// Small, fast sweep over `collective`: 64..=256 bytes, two timed
/// iterations.
pub fn quick_params(collective: &str) -> CommsParams {
    CommsParams {
        collectives: vec![collective.to_string()],
        begin_size: 64,
        end_size: 256,
        iterations: 2,
        warmup_iterations: 1,
        collective_timeout: Duration::from_secs(10),
        ..Default::default()
    }
}
