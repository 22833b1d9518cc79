use crate::error::{BenchError, Result};
use serde::{Deserialize, Serialize};

/// Canonical identifier of every operation the harness knows how to stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectiveOp {
    AllToAll,
    AllToAllv,
    AllReduce,
    Broadcast,
    Gather,
    AllGather,
    AllGatherBase,
    Reduce,
    ReduceScatter,
    ReduceScatterBase,
    Scatter,
    Barrier,
    Incast,
    Multicast,
    #[serde(rename = "pt2pt")]
    Pt2Pt,
    Recv,
    Wait,
    Noop,
}

/// Squashed spelling -> canonical op. Names are lowercased and stripped of
/// everything but ASCII letters before lookup.
const NAME_ALIASES: &[(&str, CollectiveOp)] = &[
    ("alltoall", CollectiveOp::AllToAll),
    ("alltoallv", CollectiveOp::AllToAllv),
    ("alltoallbase", CollectiveOp::AllToAllv),
    ("allreduce", CollectiveOp::AllReduce),
    ("allgather", CollectiveOp::AllGather),
    ("allgatherbase", CollectiveOp::AllGatherBase),
    ("reducescatter", CollectiveOp::ReduceScatter),
    ("reducescatterbase", CollectiveOp::ReduceScatterBase),
    ("recvanysource", CollectiveOp::Recv),
    ("broadcast", CollectiveOp::Broadcast),
    ("gather", CollectiveOp::Gather),
    ("reduce", CollectiveOp::Reduce),
    ("scatter", CollectiveOp::Scatter),
    ("barrier", CollectiveOp::Barrier),
    ("incast", CollectiveOp::Incast),
    ("multicast", CollectiveOp::Multicast),
    ("ptpt", CollectiveOp::Pt2Pt),
    ("recv", CollectiveOp::Recv),
    ("wait", CollectiveOp::Wait),
    ("noop", CollectiveOp::Noop),
];

impl CollectiveOp {
    pub const ALL: &'static [CollectiveOp] = &[
        CollectiveOp::AllToAll,
        CollectiveOp::AllToAllv,
        CollectiveOp::AllReduce,
        CollectiveOp::Broadcast,
        CollectiveOp::Gather,
        CollectiveOp::AllGather,
        CollectiveOp::AllGatherBase,
        CollectiveOp::Reduce,
        CollectiveOp::ReduceScatter,
        CollectiveOp::ReduceScatterBase,
        CollectiveOp::Scatter,
        CollectiveOp::Barrier,
        CollectiveOp::Incast,
        CollectiveOp::Multicast,
        CollectiveOp::Pt2Pt,
        CollectiveOp::Recv,
        CollectiveOp::Wait,
        CollectiveOp::Noop,
    ];

    /// The canonical snake_case name.
    pub const fn name(self) -> &'static str {
        match self {
            CollectiveOp::AllToAll => "all_to_all",
            CollectiveOp::AllToAllv => "all_to_allv",
            CollectiveOp::AllReduce => "all_reduce",
            CollectiveOp::Broadcast => "broadcast",
            CollectiveOp::Gather => "gather",
            CollectiveOp::AllGather => "all_gather",
            CollectiveOp::AllGatherBase => "all_gather_base",
            CollectiveOp::Reduce => "reduce",
            CollectiveOp::ReduceScatter => "reduce_scatter",
            CollectiveOp::ReduceScatterBase => "reduce_scatter_base",
            CollectiveOp::Scatter => "scatter",
            CollectiveOp::Barrier => "barrier",
            CollectiveOp::Incast => "incast",
            CollectiveOp::Multicast => "multicast",
            CollectiveOp::Pt2Pt => "pt2pt",
            CollectiveOp::Recv => "recv",
            CollectiveOp::Wait => "wait",
            CollectiveOp::Noop => "noop",
        }
    }

    /// Resolve any spelling of an operation name to its canonical op.
    ///
    /// Matching ignores case and every non-alphabetic character, so
    /// `"All-Reduce"`, `"allreduce"` and `"all_reduce"` are the same op.
    /// Returns `None` for names with no alias entry.
    pub fn normalize(name: &str) -> Option<Self> {
        let squashed: String = name
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        NAME_ALIASES
            .iter()
            .find(|(alias, _)| *alias == squashed)
            .map(|(_, op)| *op)
    }

    /// Normalize `name` and check it against the operations a backend
    /// declares. Unknown and unsupported names both fail with
    /// `UnsupportedCollective`, listing what the backend does support.
    pub fn resolve(name: &str, supported: &[CollectiveOp]) -> Result<Self> {
        match Self::normalize(name) {
            Some(op) if supported.contains(&op) => Ok(op),
            _ => Err(BenchError::UnsupportedCollective {
                name: name.to_string(),
                supported: supported.iter().map(|op| op.name()).collect(),
            }),
        }
    }

    /// Operations that only synchronize and stage no buffers.
    pub const fn is_sync_only(self) -> bool {
        matches!(self, CollectiveOp::Barrier | CollectiveOp::Wait)
    }

    /// Operations with a designated root (or source) rank.
    pub const fn is_rooted(self) -> bool {
        matches!(
            self,
            CollectiveOp::Broadcast
                | CollectiveOp::Reduce
                | CollectiveOp::Gather
                | CollectiveOp::Scatter
                | CollectiveOp::Incast
                | CollectiveOp::Multicast
        )
    }

    /// Operations that combine values from several ranks with a `ReduceOp`.
    pub const fn is_reduction(self) -> bool {
        matches!(
            self,
            CollectiveOp::AllReduce
                | CollectiveOp::Reduce
                | CollectiveOp::ReduceScatter
                | CollectiveOp::ReduceScatterBase
        )
    }

    /// Collectives whose message must split evenly into one chunk per rank.
    pub const fn splits_across_ranks(self) -> bool {
        matches!(
            self,
            CollectiveOp::AllToAll
                | CollectiveOp::AllToAllv
                | CollectiveOp::AllGather
                | CollectiveOp::AllGatherBase
                | CollectiveOp::Gather
                | CollectiveOp::ReduceScatter
                | CollectiveOp::ReduceScatterBase
                | CollectiveOp::Scatter
        )
    }
}

impl std::fmt::Display for CollectiveOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_alias_table() {
        assert_eq!(CollectiveOp::normalize("alltoall"), Some(CollectiveOp::AllToAll));
        assert_eq!(CollectiveOp::normalize("AllToAllBase"), Some(CollectiveOp::AllToAllv));
        assert_eq!(CollectiveOp::normalize("All-Reduce"), Some(CollectiveOp::AllReduce));
        assert_eq!(
            CollectiveOp::normalize("all_gather_base"),
            Some(CollectiveOp::AllGatherBase)
        );
        assert_eq!(
            CollectiveOp::normalize("reduce_scatter_base"),
            Some(CollectiveOp::ReduceScatterBase)
        );
        assert_eq!(CollectiveOp::normalize("recv_anysource"), Some(CollectiveOp::Recv));
        assert_eq!(CollectiveOp::normalize("pt2pt"), Some(CollectiveOp::Pt2Pt));
        assert_eq!(CollectiveOp::normalize("allfoo"), None);
        assert_eq!(CollectiveOp::normalize(""), None);
    }

    #[test]
    fn test_every_canonical_name_normalizes_to_itself() {
        for &op in CollectiveOp::ALL {
            assert_eq!(CollectiveOp::normalize(op.name()), Some(op), "{op}");
        }
    }

    #[test]
    fn test_resolve_rejects_unsupported() {
        let supported = [CollectiveOp::AllReduce, CollectiveOp::Broadcast];
        assert_eq!(
            CollectiveOp::resolve("ALLREDUCE", &supported).unwrap(),
            CollectiveOp::AllReduce
        );
        let err = CollectiveOp::resolve("all_gather", &supported).unwrap_err();
        assert!(matches!(err, BenchError::UnsupportedCollective { .. }));
        let err = CollectiveOp::resolve("bogus", &supported).unwrap_err();
        assert!(err.to_string().contains("broadcast"));
    }

    #[test]
    fn test_classification() {
        assert!(CollectiveOp::Barrier.is_sync_only());
        assert!(CollectiveOp::Incast.is_rooted());
        assert!(!CollectiveOp::AllReduce.is_rooted());
        assert!(CollectiveOp::ReduceScatterBase.is_reduction());
        assert!(CollectiveOp::Gather.splits_across_ranks());
        assert!(!CollectiveOp::Pt2Pt.splits_across_ranks());
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(name in "[A-Za-z_ -]{0,24}") {
            if let Some(op) = CollectiveOp::normalize(&name) {
                prop_assert_eq!(CollectiveOp::normalize(op.name()), Some(op));
            }
        }

        #[test]
        fn normalize_ignores_case_and_punctuation(
            idx in 0usize..18,
            upper in any::<bool>(),
            sep in "[-_ .]{0,3}",
        ) {
            let op = CollectiveOp::ALL[idx];
            let mut name = op.name().replace('_', &sep);
            if upper {
                name = name.to_uppercase();
            }
            prop_assert_eq!(CollectiveOp::normalize(&name), Some(op));
        }
    }
}
