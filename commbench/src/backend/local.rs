//! In-process backend: every rank is a task in one process and collectives
//! exchange contributions through shared memory.

use super::{Backend, ProcessGroup};
use crate::collective::{CollectiveCall, CollectiveOp};
use crate::error::{BenchError, Result};
use crate::tensor::{Staged, Tensor};
use crate::types::{DataType, GroupId, Rank, ReduceOp, StreamId};
use async_trait::async_trait;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// What one rank brings to a round.
#[derive(Debug, Clone)]
struct Contribution {
    op: CollectiveOp,
    input: Staged,
    in_split: Option<Vec<usize>>,
}

type Delivery = Arc<Vec<Contribution>>;

/// A collective in flight, keyed by `(group, sequence)`.
struct Round {
    slots: Vec<Option<Contribution>>,
    arrived: usize,
    waiters: Vec<oneshot::Sender<Delivery>>,
}

/// Shared state of an in-process world.
pub struct LocalWorld {
    size: u32,
    groups: Vec<ProcessGroup>,
    timeout: Duration,
    rounds: Mutex<HashMap<(GroupId, u64), Round>>,
}

impl LocalWorld {
    /// A world of `size` ranks with only the default group.
    pub fn new(size: u32) -> Arc<Self> {
        Self::with_options(size, Vec::new(), DEFAULT_TIMEOUT)
    }

    /// Group 0 always spans the world; `subgroups` become groups `1..`.
    pub fn with_options(size: u32, subgroups: Vec<Vec<Rank>>, timeout: Duration) -> Arc<Self> {
        let mut groups = vec![ProcessGroup {
            id: 0,
            ranks: (0..size).collect(),
        }];
        groups.extend(
            subgroups
                .into_iter()
                .enumerate()
                .map(|(i, ranks)| ProcessGroup {
                    id: i as GroupId + 1,
                    ranks,
                }),
        );
        Arc::new(Self {
            size,
            groups,
            timeout,
            rounds: Mutex::new(HashMap::new()),
        })
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// One backend per rank; rank `r` draws random values from `seed + r`.
    pub fn ranks(self: &Arc<Self>, seed: u64) -> Vec<LocalBackend> {
        (0..self.size)
            .map(|r| LocalBackend::new(r, Arc::clone(self), seed))
            .collect()
    }

    /// Deposit `contribution` at slot `me` and wait for the rest of the
    /// group.
    async fn exchange(
        &self,
        key: (GroupId, u64),
        me: usize,
        group_size: usize,
        contribution: Contribution,
        global_rank: Rank,
    ) -> Result<Delivery> {
        let operation = contribution.op.name();
        let rx = {
            let mut rounds = self
                .rounds
                .lock()
                .map_err(|_| BenchError::LockPoisoned("local world rounds"))?;
            let round = rounds.entry(key).or_insert_with(|| Round {
                slots: vec![None; group_size],
                arrived: 0,
                waiters: Vec::with_capacity(group_size),
            });
            if round.slots[me].is_some() {
                return Err(BenchError::collective(
                    operation,
                    global_rank,
                    format!("rank contributed twice to round {}", key.1),
                ));
            }
            let (tx, rx) = oneshot::channel();
            round.slots[me] = Some(contribution);
            round.arrived += 1;
            round.waiters.push(tx);

            if round.arrived == group_size
                && let Some(done) = rounds.remove(&key)
            {
                let all: Delivery = Arc::new(done.slots.into_iter().flatten().collect());
                for waiter in done.waiters {
                    let _ = waiter.send(Arc::clone(&all));
                }
            }
            rx
        };

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(all)) => Ok(all),
            Ok(Err(_)) => Err(BenchError::collective(
                operation,
                global_rank,
                "round abandoned",
            )),
            Err(_) => {
                if let Ok(mut rounds) = self.rounds.lock() {
                    rounds.remove(&key);
                }
                Err(BenchError::CollectiveTimeout {
                    operation,
                    round: key.1,
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }
}

/// One rank of a [`LocalWorld`].
pub struct LocalBackend {
    rank: Rank,
    world: Arc<LocalWorld>,
    rng: Mutex<StdRng>,
    seqs: Mutex<HashMap<GroupId, u64>>,
    stream: Mutex<Option<StreamId>>,
    next_stream: AtomicU64,
    allocations: AtomicUsize,
}

impl LocalBackend {
    pub fn new(rank: Rank, world: Arc<LocalWorld>, seed: u64) -> Self {
        Self {
            rank,
            world,
            rng: Mutex::new(StdRng::seed_from_u64(seed.wrapping_add(u64::from(rank)))),
            seqs: Mutex::new(HashMap::new()),
            stream: Mutex::new(None),
            next_stream: AtomicU64::new(1),
            allocations: AtomicUsize::new(0),
        }
    }

    /// Number of tensors allocated through this backend so far.
    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::Relaxed)
    }

    fn count_allocation(&self) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
    }

    fn next_seq(&self, pg_id: GroupId) -> Result<u64> {
        let mut seqs = self
            .seqs
            .lock()
            .map_err(|_| BenchError::LockPoisoned("local backend sequence"))?;
        let seq = seqs.entry(pg_id).or_insert(0);
        let current = *seq;
        *seq += 1;
        Ok(current)
    }

    fn check_peers(&self, call: &CollectiveCall, group_size: u32) -> Result<()> {
        let op = call.op();
        if op.is_rooted() && call.root >= group_size {
            return Err(BenchError::InvalidRank {
                rank: call.root,
                world_size: group_size,
            });
        }
        if let Some(&bad) = call
            .src_ranks
            .iter()
            .chain(&call.dst_ranks)
            .find(|&&r| r >= group_size)
        {
            return Err(BenchError::InvalidRank {
                rank: bad,
                world_size: group_size,
            });
        }
        if matches!(op, CollectiveOp::Pt2Pt | CollectiveOp::Recv)
            && call.src_ranks.len() != call.dst_ranks.len()
        {
            return Err(BenchError::collective(
                op.name(),
                self.rank,
                format!(
                    "{} source ranks paired with {} destination ranks",
                    call.src_ranks.len(),
                    call.dst_ranks.len()
                ),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    fn local_rank(&self) -> Rank {
        self.rank
    }

    fn global_rank(&self) -> Rank {
        self.rank
    }

    fn world_size(&self) -> u32 {
        self.world.size
    }

    fn device(&self) -> &str {
        "cpu"
    }

    fn groups(&self) -> &[ProcessGroup] {
        &self.world.groups
    }

    fn supported_collectives(&self) -> &[CollectiveOp] {
        CollectiveOp::ALL
    }

    fn alloc_random(&self, numel: usize, dtype: DataType, scale: f64) -> Tensor {
        self.count_allocation();
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        Tensor::random(&mut *rng, numel, dtype, scale)
    }

    fn alloc_ones(&self, numel: usize, dtype: DataType, scale: f64) -> Tensor {
        self.count_allocation();
        Tensor::full(numel, dtype, scale)
    }

    fn alloc_empty(&self, numel: usize, dtype: DataType) -> Tensor {
        self.count_allocation();
        Tensor::zeros(numel, dtype)
    }

    fn clear_memory(&self) {
        tracing::debug!(rank = self.rank, "clear_memory: nothing cached");
    }

    fn create_stream(&self) -> StreamId {
        StreamId(self.next_stream.fetch_add(1, Ordering::Relaxed))
    }

    fn switch_stream(&self, stream: Option<StreamId>) -> Option<StreamId> {
        let mut current = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *current, stream)
    }

    fn current_stream(&self) -> Option<StreamId> {
        *self.stream.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn initialize(&self) -> Result<()> {
        if self.world.size == 0 {
            return Err(BenchError::InvalidWorldSize { world_size: 0 });
        }
        if self.rank >= self.world.size {
            return Err(BenchError::InvalidRank {
                rank: self.rank,
                world_size: self.world.size,
            });
        }
        tracing::debug!(rank = self.rank, world_size = self.world.size, "local backend initialized");
        Ok(())
    }

    async fn collective(&self, mut call: CollectiveCall) -> Result<CollectiveCall> {
        let op = call.op();
        if matches!(op, CollectiveOp::Noop | CollectiveOp::Wait) {
            return Ok(call);
        }
        if !self.supported_collectives().contains(&op) {
            return Err(BenchError::UnsupportedCollective {
                name: op.name().to_string(),
                supported: self.supported_collectives().iter().map(|o| o.name()).collect(),
            });
        }

        let group = self.group(call.pg_id)?;
        let group_size = group.size();
        let me = group.rank_of(self.rank).ok_or(BenchError::InvalidRank {
            rank: self.rank,
            world_size: group_size,
        })?;
        self.check_peers(&call, group_size)?;

        let seq = self.next_seq(call.pg_id)?;
        let contribution = Contribution {
            op,
            input: call.buffers.input.clone(),
            in_split: call.buffers.in_split.clone(),
        };
        let all = self
            .world
            .exchange(
                (call.pg_id, seq),
                me as usize,
                group_size as usize,
                contribution,
                self.rank,
            )
            .await?;

        if let Some(other) = all.iter().find(|c| c.op != op) {
            return Err(BenchError::collective(
                op.name(),
                self.rank,
                format!("peer issued {} in the same round", other.op),
            ));
        }
        deliver(&mut call, me, &all)?;
        tracing::trace!(rank = self.rank, op = %op, seq, "collective complete");
        Ok(call)
    }
}

/// Fill `call`'s destination from the round's contributions, as seen by
/// group rank `me`.
fn deliver(call: &mut CollectiveCall, me: Rank, all: &[Contribution]) -> Result<()> {
    let op = call.op();
    let name = op.name();
    let root = call.root as usize;
    let idx = me as usize;
    let is_root = me == call.root;

    match op {
        CollectiveOp::AllReduce => {
            let acc = reduce_all(all.iter().map(|c| c.input.single(name)), call.reduce_op)?;
            write_single(call, &acc)
        }
        CollectiveOp::Reduce if is_root => {
            let acc = reduce_all(all.iter().map(|c| c.input.single(name)), call.reduce_op)?;
            write_single(call, &acc)
        }
        CollectiveOp::Broadcast => {
            let src = all[root].input.single(name)?.clone();
            write_single(call, &src)
        }
        CollectiveOp::Multicast if !is_root && call.is_destination(me) => {
            let src = all[root].input.single(name)?.clone();
            write_single(call, &src)
        }
        CollectiveOp::AllToAll => {
            let parts = all
                .iter()
                .map(|c| c.input.part(idx, name).cloned())
                .collect::<Result<Vec<_>>>()?;
            write_list(call, &parts)
        }
        CollectiveOp::AllToAllv => {
            let mut parts = Vec::with_capacity(all.len());
            for c in all {
                let split = c
                    .in_split
                    .as_deref()
                    .filter(|s| s.len() == all.len())
                    .ok_or_else(|| BenchError::collective(name, me, "peer sent no usable split"))?;
                let offset: usize = split[..idx].iter().sum();
                parts.push(c.input.single(name)?.slice(offset, split[idx])?);
            }
            let joined = concat(&parts)?;
            write_single(call, &joined)
        }
        CollectiveOp::AllGather => {
            let parts = singles(all, name)?;
            write_list(call, &parts)
        }
        CollectiveOp::Gather if is_root => {
            let parts = singles(all, name)?;
            write_list(call, &parts)
        }
        CollectiveOp::AllGatherBase => {
            let joined = concat(&singles(all, name)?)?;
            write_single(call, &joined)
        }
        CollectiveOp::ReduceScatter => {
            let acc = reduce_all(all.iter().map(|c| c.input.part(idx, name)), call.reduce_op)?;
            write_single(call, &acc)
        }
        CollectiveOp::ReduceScatterBase => {
            let chunk = call.buffers.destination().single(name)?.numel();
            let parts = all
                .iter()
                .map(|c| c.input.single(name)?.slice(idx * chunk, chunk))
                .collect::<Result<Vec<_>>>()?;
            let acc = reduce_all(parts.iter().map(Ok), call.reduce_op)?;
            write_single(call, &acc)
        }
        CollectiveOp::Scatter => {
            let src = all[root].input.part(idx, name)?.clone();
            write_single(call, &src)
        }
        CollectiveOp::Incast if is_root => {
            let parts = call
                .src_ranks
                .iter()
                .map(|&s| all[s as usize].input.single(name).cloned())
                .collect::<Result<Vec<_>>>()?;
            write_list(call, &parts)
        }
        CollectiveOp::Pt2Pt | CollectiveOp::Recv => {
            let src = call
                .src_ranks
                .iter()
                .zip(&call.dst_ranks)
                .filter(|&(_, &dst)| dst == me)
                .map(|(&src, _)| src)
                .last();
            match src {
                Some(src) => {
                    let data = all[src as usize].input.single(name)?.clone();
                    write_single(call, &data)
                }
                None => Ok(()),
            }
        }
        _ => Ok(()),
    }
}

fn singles(all: &[Contribution], name: &'static str) -> Result<Vec<Tensor>> {
    all.iter().map(|c| c.input.single(name).cloned()).collect()
}

fn concat(parts: &[Tensor]) -> Result<Tensor> {
    let dtype = parts.first().map(Tensor::dtype).unwrap_or(DataType::F32);
    Tensor::concat(parts, dtype)
}

fn reduce_all<'a>(
    mut tensors: impl Iterator<Item = Result<&'a Tensor>>,
    op: ReduceOp,
) -> Result<Tensor> {
    let mut acc = match tensors.next() {
        Some(first) => first?.clone(),
        None => return Err(BenchError::config("reduction over an empty group")),
    };
    for t in tensors {
        acc.reduce_with(t?, op)?;
    }
    Ok(acc)
}

fn write_single(call: &mut CollectiveCall, src: &Tensor) -> Result<()> {
    let name = call.op().name();
    match call.buffers.destination_mut() {
        Staged::Single(dst) => dst.copy_from(src),
        Staged::List(_) => Err(BenchError::config(format!(
            "{name} expects a single output tensor"
        ))),
    }
}

fn write_list(call: &mut CollectiveCall, parts: &[Tensor]) -> Result<()> {
    let dst = call.buffers.destination_mut();
    if !dst.is_list() || dst.tensors().len() != parts.len() {
        return Err(BenchError::BufferSizeMismatch {
            expected: parts.len(),
            actual: dst.tensors().len(),
        });
    }
    for (d, s) in dst.tensors_mut().iter_mut().zip(parts) {
        d.copy_from(s)?;
    }
    Ok(())
}
