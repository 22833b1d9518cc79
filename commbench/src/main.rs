//! `commbench`: run a collective benchmark over an in-process world.
//!
//! ```bash
//! commbench --collective all_reduce,all_to_all --b 1K --e 1M --world-size 4 --c 1
//! ```

use clap::Parser;
use commbench::{Args, BenchError, CommsBench, LocalWorld, Result, WorldInfo};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(&args.log);

    if let Err(e) = run(args).await {
        tracing::error!(error = %e, config = e.is_config(), "benchmark failed");
        std::process::exit(1);
    }
}

fn init_tracing(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn run(args: Args) -> Result<()> {
    let output = args.output_json.clone();
    let params = Arc::new(args.into_params(WorldInfo::from_env())?.with_env_overrides());
    params.validate()?;

    let world_size = params.world.world_size.unwrap_or(1);
    let world = LocalWorld::with_options(world_size, Vec::new(), params.collective_timeout);
    tracing::info!(
        world_size,
        collectives = ?params.collectives,
        begin = params.begin_size,
        end = params.end_size,
        "starting benchmark"
    );

    let mut tasks = Vec::new();
    for backend in world.ranks(params.seed) {
        let params = Arc::clone(&params);
        tasks.push(tokio::spawn(async move {
            let mut bench = CommsBench::new(Arc::new(backend), params)?;
            bench.run().await
        }));
    }

    let mut report = None;
    let mut first_err = None;
    for (rank, joined) in futures::future::join_all(tasks).await.into_iter().enumerate() {
        let result = joined
            .map_err(|e| BenchError::TaskFailed(format!("rank {rank}: {e}")))
            .and_then(|r| r);
        match result {
            Ok(r) if rank == 0 => report = Some(r),
            Ok(_) => {}
            Err(e) => {
                tracing::error!(rank, error = %e, "rank failed");
                first_err.get_or_insert(e);
            }
        }
    }
    if let Some(e) = first_err {
        return Err(e);
    }

    if let Some(report) = report {
        println!("{}", report.render_table());
        if let Some(path) = output {
            report.write_json(&path)?;
            tracing::info!(path = %path.display(), "report written");
        }
    }
    Ok(())
}
