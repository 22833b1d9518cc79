//! Message-size and rank-list parsing in nccl-tests notation.

use crate::collective::CollectiveOp;
use crate::error::{BenchError, Result};
use crate::types::Rank;

/// Upper bound on the number of sizes in one sweep.
pub const MAX_SIZES: usize = 100;

/// Parse `"1024"`, `"8K"`, `"4M"` or `"1G"` into bytes. Suffixes are
/// powers of 1024.
pub fn parse_size(input: &str) -> Result<usize> {
    let s = input.trim();
    let (digits, unit) = match s.find(['G', 'M', 'K']) {
        Some(idx) => {
            let unit = match &s[idx..idx + 1] {
                "G" => 1 << 30,
                "M" => 1 << 20,
                _ => 1 << 10,
            };
            (&s[..idx], unit)
        }
        None => (s, 1),
    };
    digits
        .parse::<usize>()
        .ok()
        .and_then(|v| v.checked_mul(unit))
        .ok_or_else(|| BenchError::InvalidSize(input.to_string()))
}

/// Sizes from `begin` up to `end` inclusive, multiplying by `step_factor`
/// or, when `step_bytes` is non-zero, adding `step_bytes`. Stops after
/// [`MAX_SIZES`] entries.
pub fn get_sizes(begin: usize, end: usize, step_factor: usize, step_bytes: usize) -> Vec<usize> {
    let mut sizes = Vec::new();
    let mut cur = begin;
    while cur <= end {
        if sizes.len() == MAX_SIZES {
            tracing::error!(
                begin,
                end,
                step_factor,
                step_bytes,
                max = MAX_SIZES,
                "size sweep truncated"
            );
            break;
        }
        sizes.push(cur);
        let next = if step_bytes == 0 {
            cur.saturating_mul(step_factor)
        } else {
            cur.saturating_add(step_bytes)
        };
        if next == cur {
            break;
        }
        cur = next;
    }
    sizes
}

/// Raise `begin` (bytes) so the first size gives every rank at least one
/// element, or `quant_dim` elements when quantized.
pub fn fix_begin_size(
    begin: usize,
    op: CollectiveOp,
    element_size: usize,
    world_size: usize,
    bitwidth: u32,
    quant_dim: usize,
) -> usize {
    let mut begin = begin;
    if op.splits_across_ranks() {
        if begin / element_size < world_size {
            begin = world_size * element_size;
        }
        if bitwidth < 32 && begin / element_size / world_size.max(1) < quant_dim {
            begin = quant_dim * world_size * element_size;
        }
    } else if matches!(op, CollectiveOp::AllReduce | CollectiveOp::Reduce) && begin < element_size
    {
        begin = element_size;
    }
    begin
}

/// Parse `"3"`, `"1,2,3"` or `"0:3"` into ranks, each below `world_size`.
/// An empty string is an empty list; comma lists drop duplicates keeping
/// first occurrences; ranges are inclusive.
pub fn parse_rank_list(input: &str, name: &'static str, world_size: u32) -> Result<Vec<Rank>> {
    let s = input.trim();
    if s.is_empty() {
        return Ok(Vec::new());
    }
    let invalid = || BenchError::InvalidRankList {
        name,
        input: input.to_string(),
    };
    let parse = |p: &str| p.trim().parse::<Rank>().map_err(|_| invalid());

    let ranks: Vec<Rank> = if let Some((start, end)) = s.split_once(':') {
        let (start, end) = (parse(start)?, parse(end)?);
        (start..=end).collect()
    } else {
        let mut out = Vec::new();
        for part in s.split(',') {
            let r = parse(part)?;
            if !out.contains(&r) {
                out.push(r);
            }
        }
        out
    };

    if ranks.is_empty() || ranks.iter().any(|&r| r >= world_size) {
        return Err(invalid());
    }
    Ok(ranks)
}
