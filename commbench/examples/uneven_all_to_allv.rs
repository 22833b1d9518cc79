//! Drive a backend directly: stage an all_to_allv with uneven splits on 3
//! ranks and print what each rank receives.
//!
//! ```bash
//! cargo run --example uneven_all_to_allv
//! ```

use commbench::{
    Backend, CollectiveCall, CommsArgs, CommsParams, DataType, LocalWorld, stage_collective,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> commbench::Result<()> {
    let world = LocalWorld::new(3);
    let params = Arc::new(CommsParams {
        dcheck: true,
        ..Default::default()
    });

    let mut handles = Vec::new();
    for backend in world.ranks(0) {
        let params = Arc::clone(&params);
        handles.push(tokio::spawn(async move {
            let rank = backend.global_rank();
            // Rank r sends r+1 elements to every peer.
            let n = rank as usize + 1;
            let desc = CommsArgs::new("all_to_allv", 3 * n, 6, DataType::F32)
                .with_splits(Some(vec![n; 3]), Some(vec![1, 2, 3]));
            let mut staged = stage_collective(&backend, &desc, &params, true)?;
            staged.input.tensors_mut()[0].fill(rank as f64);

            let done = backend.collective(CollectiveCall::new(staged)).await?;
            commbench::Result::Ok((rank, done.buffers.destination().tensors()[0].to_values()))
        }));
    }

    for h in handles {
        let (rank, received) = h.await.unwrap()?;
        println!("rank {rank}: {received:?}");
    }
    // rank 0: [0.0, 1.0, 1.0, 2.0, 2.0, 2.0]
    // ...
    Ok(())
}
