use crate::types::{DataType, GroupId, Rank};
use serde::{Deserialize, Serialize};

/// Description of a single collective to stage and run.
///
/// Element counts are per rank. `comms` is the raw, possibly aliased name as
/// supplied by the caller; staging normalizes it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CommsArgs {
    pub comms: Option<String>,
    pub seqnum: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub req: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_msg_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub out_msg_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dtype: Option<DataType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_split: Option<Vec<usize>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub out_split: Option<Vec<usize>>,
    #[serde(rename = "startTime_ns", skip_serializing_if = "Option::is_none")]
    pub start_time_ns: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pg_id: Option<GroupId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub world_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<Rank>,
}

impl CommsArgs {
    /// Descriptor for `comms` moving `in_elems` / `out_elems` elements.
    pub fn new(comms: impl Into<String>, in_elems: usize, out_elems: usize, dtype: DataType) -> Self {
        Self {
            comms: Some(comms.into()),
            in_msg_size: Some(in_elems),
            out_msg_size: Some(out_elems),
            dtype: Some(dtype),
            ..Default::default()
        }
    }

    pub fn with_root(mut self, root: Rank) -> Self {
        self.root = Some(root);
        self
    }

    pub fn with_splits(mut self, in_split: Option<Vec<usize>>, out_split: Option<Vec<usize>>) -> Self {
        self.in_split = in_split;
        self.out_split = out_split;
        self
    }

    pub fn with_group(mut self, pg_id: GroupId) -> Self {
        self.pg_id = Some(pg_id);
        self
    }

    pub fn in_elems(&self) -> usize {
        self.in_msg_size.unwrap_or(0)
    }

    pub fn out_elems(&self) -> usize {
        self.out_msg_size.unwrap_or(0)
    }
}
