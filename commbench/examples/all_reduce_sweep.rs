//! Sweep all_reduce from 1 KiB to 64 KiB across 4 in-process ranks with
//! validation enabled, then print rank 0's report.
//!
//! ```bash
//! cargo run --example all_reduce_sweep
//! ```

use commbench::{CommsBench, CommsParams, LocalWorld};
use std::sync::Arc;

#[tokio::main]
async fn main() -> commbench::Result<()> {
    let world_size = 4u32;
    let params = Arc::new(CommsParams {
        collectives: vec!["all_reduce".into()],
        begin_size: 1 << 10,
        end_size: 64 << 10,
        iterations: 20,
        dcheck: true,
        ..Default::default()
    });

    let world = LocalWorld::new(world_size);
    let mut handles = Vec::new();
    for backend in world.ranks(params.seed) {
        let params = Arc::clone(&params);
        handles.push(tokio::spawn(async move {
            CommsBench::new(Arc::new(backend), params)?.run().await
        }));
    }

    let mut reports = Vec::new();
    for h in handles {
        reports.push(h.await.unwrap()?);
    }
    print!("{}", reports[0].render_table());
    // collective               size(B)     elements     dtype      avg(us) ...  check
    // all_reduce                  1024          256   float32        ...            ok
    // ...
    Ok(())
}
