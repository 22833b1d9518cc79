use commbench::staging::expected_output_elements;
use commbench::{
    Backend, BenchError, CollectiveOp, CommsArgs, CommsParams, DataType, LocalBackend, LocalWorld,
    stage_collective,
};
use proptest::prelude::*;

fn staged_ops() -> Vec<CollectiveOp> {
    CollectiveOp::ALL
        .iter()
        .copied()
        .filter(|&op| op != CollectiveOp::Incast)
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Staged outputs hold exactly the declared number of elements.
    #[test]
    fn staged_output_matches_declared(world in 1u32..=6, per_rank in 1usize..32, op_idx in 0usize..17) {
        let op = staged_ops()[op_idx];
        let backend = LocalBackend::new(0, LocalWorld::new(world), 1);
        let n = per_rank * world as usize;
        let desc = CommsArgs::new(op.name(), n, n, DataType::F32);
        let staged = stage_collective(&backend, &desc, &CommsParams::default(), true).unwrap();
        prop_assert_eq!(
            staged.destination().numel(),
            expected_output_elements(op, n, n, world as usize, 0)
        );
    }

    /// Incast output scales with the number of sources.
    #[test]
    fn incast_output_scales_with_sources(world in 1u32..=6, n in 1usize..32) {
        let backend = LocalBackend::new(0, LocalWorld::new(world), 1);
        let params = CommsParams { src_ranks: (0..world).collect(), ..Default::default() };
        let desc = CommsArgs::new("incast", n, n, DataType::F32);
        let staged = stage_collective(&backend, &desc, &params, true).unwrap();
        prop_assert_eq!(staged.destination().numel(), n * world as usize);
    }
}

#[test]
fn test_indivisible_size_is_config_error() {
    let backend = LocalBackend::new(0, LocalWorld::new(3), 0);
    for op in ["all_to_all", "all_gather", "gather", "reduce_scatter", "scatter", "reduce_scatter_base"] {
        let desc = CommsArgs::new(op, 10, 10, DataType::F32);
        let err = stage_collective(&backend, &desc, &CommsParams::default(), true).unwrap_err();
        assert!(err.is_config(), "{op}");
        assert!(matches!(err, BenchError::IndivisibleCount { .. }));
    }
    assert_eq!(backend.allocations(), 0);
}

#[test]
fn test_unknown_group_rejected() {
    let backend = LocalBackend::new(0, LocalWorld::new(2), 0);
    let desc = CommsArgs::new("all_reduce", 8, 8, DataType::F32).with_group(4);
    assert!(matches!(
        stage_collective(&backend, &desc, &CommsParams::default(), true),
        Err(BenchError::UnknownGroup { pg_id: 4 })
    ));
    assert_eq!(backend.default_group(), 0);
}

#[test]
fn test_descriptor_dtype_overrides_params() {
    let backend = LocalBackend::new(0, LocalWorld::new(2), 0);
    let desc = CommsArgs::new("all_reduce", 8, 8, DataType::I64);
    let staged = stage_collective(&backend, &desc, &CommsParams::default(), true).unwrap();
    assert_eq!(staged.input.tensors()[0].dtype(), DataType::I64);
}
