//! In-process multi-rank communicator over a shared mailbox.
//!
//! `ThreadComm::group(n)` creates `n` ranks that live in one process, one per
//! thread. Messages are byte blobs posted into a shared `DashMap` keyed by
//! `(communicator id, epoch, src, dst)`; receives spin with `yield_now` until
//! the slot appears. The epoch counter advances once per collective, so a
//! rank can run ahead of its peers without slots colliding, provided every
//! rank calls every collective in the same order, which is the crate-wide
//! collective contract anyway.
//!
//! Derived communicators (`dup`, `split`, `graph*`) allocate their id from a
//! counter on the shared group state, memoized by (parent id, derivation
//! epoch); whichever rank derives first allocates, the rest look the id up,
//! so all ranks resolve the same id without an extra communication round and
//! no two communicators over one mailbox ever share an id. Sub-group states
//! for `split` are published the same way, created once by whichever member
//! arrives first.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering::SeqCst};

use bytes::Bytes;
use dashmap::DashMap;

use crate::comm::communicator::{Communicator, check_ranks};
use crate::mesh_error::MeshWeaveError;
use crate::types::Rank;

type MsgKey = (u64, u64, Rank, Rank); // (comm id, epoch, src, dst)

struct GroupState {
    size: usize,
    mailbox: DashMap<MsgKey, Bytes>,
    children: DashMap<(u64, i64), Arc<GroupState>>,
    // (parent id, derivation epoch) -> child id, allocated on first arrival
    derived_ids: DashMap<(u64, u64), u64>,
    next_id: AtomicU64,
}

impl GroupState {
    fn new(size: usize) -> Self {
        Self {
            size,
            mailbox: DashMap::new(),
            children: DashMap::new(),
            derived_ids: DashMap::new(),
            // the root communicator of every state holds id 0
            next_id: AtomicU64::new(1),
        }
    }
}

/// One rank of an in-process communicator group.
pub struct ThreadComm {
    state: Arc<GroupState>,
    rank: Rank,
    comm_id: u64,
    epoch: AtomicU64,
    srcs: Vec<Rank>,
    dsts: Vec<Rank>,
}

impl ThreadComm {
    /// Create a world of `n` ranks sharing one mailbox. Hand one communicator
    /// to each thread.
    pub fn group(n: usize) -> Vec<ThreadComm> {
        assert!(n > 0, "communicator group must have at least one rank");
        let state = Arc::new(GroupState::new(n));
        (0..n)
            .map(|rank| ThreadComm {
                state: Arc::clone(&state),
                rank,
                comm_id: 0,
                epoch: AtomicU64::new(0),
                srcs: (0..n).collect(),
                dsts: (0..n).collect(),
            })
            .collect()
    }

    fn bump(&self) -> u64 {
        self.epoch.fetch_add(1, SeqCst)
    }

    /// Id for the communicator derived from this one at `epoch`. The ranks of
    /// a group derive in the same order, so every rank resolves the same id;
    /// allocation from `next_id` keeps distinct derivations distinct.
    fn derive_id(&self, epoch: u64) -> u64 {
        *self
            .state
            .derived_ids
            .entry((self.comm_id, epoch))
            .or_insert_with(|| self.state.next_id.fetch_add(1, SeqCst))
    }

    fn post(&self, epoch: u64, dst: Rank, bytes: Bytes) {
        self.state
            .mailbox
            .insert((self.comm_id, epoch, self.rank, dst), bytes);
    }

    fn fetch(&self, epoch: u64, src: Rank) -> Bytes {
        let key = (self.comm_id, epoch, src, self.rank);
        loop {
            if let Some((_, v)) = self.state.mailbox.remove(&key) {
                return v;
            }
            std::thread::yield_now();
        }
    }

    fn allgather_at(&self, epoch: u64, bytes: &[u8]) -> Vec<Vec<u8>> {
        let blob = Bytes::copy_from_slice(bytes);
        for dst in 0..self.state.size {
            self.post(epoch, dst, blob.clone());
        }
        (0..self.state.size)
            .map(|src| self.fetch(epoch, src).to_vec())
            .collect()
    }

    fn derived(&self, id: u64, srcs: Vec<Rank>, dsts: Vec<Rank>) -> ThreadComm {
        ThreadComm {
            state: Arc::clone(&self.state),
            rank: self.rank,
            comm_id: id,
            epoch: AtomicU64::new(0),
            srcs,
            dsts,
        }
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> Rank {
        self.state.size
    }

    fn sources(&self) -> &[Rank] {
        &self.srcs
    }

    fn destinations(&self) -> &[Rank] {
        &self.dsts
    }

    fn dup(&self) -> Self {
        let e = self.bump();
        self.derived(self.derive_id(e), self.srcs.clone(), self.dsts.clone())
    }

    fn split(&self, color: i32, key: i32) -> Self {
        let e = self.bump();
        let mine = [color, key];
        let all = self.allgather_at(e, bytemuck::cast_slice(&mine));
        // members of my color, ordered by (key, old rank)
        let mut members: Vec<(i32, Rank)> = all
            .iter()
            .enumerate()
            .filter_map(|(rank, blob)| {
                let vals: [i32; 2] = [
                    bytemuck::pod_read_unaligned(&blob[0..4]),
                    bytemuck::pod_read_unaligned(&blob[4..8]),
                ];
                (vals[0] == color).then_some((vals[1], rank))
            })
            .collect();
        members.sort_unstable();
        let new_rank = members
            .iter()
            .position(|&(_, r)| r == self.rank)
            .expect("split member list must contain the calling rank");
        let new_size = members.len();
        let id = self.derive_id(e);
        let child = self
            .state
            .children
            .entry((id, color as i64))
            .or_insert_with(|| Arc::new(GroupState::new(new_size)))
            .clone();
        // the sub-group owns a fresh mailbox, so it restarts as that
        // mailbox's root communicator
        ThreadComm {
            state: child,
            rank: new_rank,
            comm_id: 0,
            epoch: AtomicU64::new(0),
            srcs: (0..new_size).collect(),
            dsts: (0..new_size).collect(),
        }
    }

    fn graph(&self, dsts: &[Rank]) -> Result<Self, MeshWeaveError> {
        check_ranks(dsts, self.state.size)?;
        let e = self.bump();
        // one discovery round: everyone publishes its destination list
        let encoded: Vec<u64> = dsts.iter().map(|&d| d as u64).collect();
        let all = self.allgather_at(e, bytemuck::cast_slice(&encoded));
        let mut srcs = Vec::new();
        for (rank, blob) in all.iter().enumerate() {
            let their: Vec<u64> = blob
                .chunks_exact(8)
                .map(bytemuck::pod_read_unaligned)
                .collect();
            if their.contains(&(self.rank as u64)) {
                srcs.push(rank);
            }
        }
        let mut dsts = dsts.to_vec();
        dsts.sort_unstable();
        dsts.dedup();
        Ok(self.derived(self.derive_id(e), srcs, dsts))
    }

    fn graph_adjacent(&self, srcs: &[Rank], dsts: &[Rank]) -> Result<Self, MeshWeaveError> {
        check_ranks(srcs, self.state.size)?;
        check_ranks(dsts, self.state.size)?;
        let e = self.bump();
        let mut srcs = srcs.to_vec();
        srcs.sort_unstable();
        srcs.dedup();
        let mut dsts = dsts.to_vec();
        dsts.sort_unstable();
        dsts.dedup();
        Ok(self.derived(self.derive_id(e), srcs, dsts))
    }

    fn allgather_bytes(&self, bytes: &[u8]) -> Vec<Vec<u8>> {
        let e = self.bump();
        self.allgather_at(e, bytes)
    }

    fn neighbor_alltoallv_bytes(&self, sends: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
        debug_assert_eq!(sends.len(), self.dsts.len());
        let e = self.bump();
        for (blob, &dst) in sends.into_iter().zip(&self.dsts) {
            self.post(e, dst, Bytes::from(blob));
        }
        self.srcs
            .iter()
            .map(|&src| self.fetch(e, src).to_vec())
            .collect()
    }
}
