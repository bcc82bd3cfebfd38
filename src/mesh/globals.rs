//! Cross-rank entity identity: global numbering and ownership.
//!
//! Copies of the same entity on different ranks are matched by a rendezvous
//! on the entity's canonical global-vertex tuple. Every rank hashes each of
//! its tuples with a fixed-seed hasher and sends (tuple, candidate address)
//! to rank `hash % size`; the rendezvous rank groups equal tuples, elects the
//! owner, numbers the distinct tuples, and replies along the inverted plan.
//!
//! Determinism: the hash seeds are constants, grouping sorts by
//! `(tuple, rank, local index)`, the owner is the first of each run, and
//! global ids are assigned in sorted-tuple order offset by an exclusive scan
//! of per-rank distinct counts. No step depends on message arrival order.

use std::hash::{BuildHasher, Hasher};
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};

use crate::arrays;
use crate::comm::communicator::{CommOp, Communicator};
use crate::exchange::{Distribution, Remote};
use crate::mesh_error::MeshWeaveError;
use crate::types::{Go, Lo, Rank};

/// Reply record sent from the rendezvous rank back to each candidate.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct GlobalOwner {
    global: Go,
    rank: u32,
    index: Lo,
}

static_assertions::const_assert_eq!(std::mem::size_of::<GlobalOwner>(), 16);

/// Fixed hash seeds; every rank of every run maps a tuple to the same
/// rendezvous rank.
const SEEDS: (u64, u64, u64, u64) = (
    0x8f3c_64b1_a0e5_7d29,
    0x1d79_02c4_be88_6a3f,
    0x5bb2_f8d1_443a_910c,
    0xe604_9ad1_27c3_55b7,
);

fn tuple_hash(tuple: &[Go]) -> u64 {
    let state = ahash::RandomState::with_seeds(SEEDS.0, SEEDS.1, SEEDS.2, SEEDS.3);
    let mut h = state.build_hasher();
    for &v in tuple {
        h.write_u64(v);
    }
    h.finish()
}

/// Assign a global id and an owner address to each local entity.
///
/// `tuples` holds one canonical (ascending) global-vertex tuple of `width`
/// values per entity. Collective; returns per-entity globals and owners in
/// input order. The owner of a replicated entity is the copy with the lowest
/// rank, ties broken by lowest local index.
pub(crate) fn number_entities<C: Communicator>(
    comm: &Arc<C>,
    tuples: &[Go],
    width: usize,
) -> Result<(Vec<Go>, Vec<Remote>), MeshWeaveError> {
    debug_assert!(width > 0);
    let nents = tuples.len() / width;
    arrays::check_len(tuples, nents, width, "entity key tuples")?;
    let size = comm.size();

    let dest_ranks: Vec<Rank> = (0..nents)
        .map(|i| (tuple_hash(&tuples[i * width..(i + 1) * width]) % size as u64) as Rank)
        .collect();
    let mut dist = Distribution::new(Arc::clone(comm));
    dist.set_dest_ranks(&dest_ranks)?;

    let candidates: Vec<Remote> = (0..nents)
        .map(|i| Remote::new(comm.rank(), i as Lo))
        .collect();
    let rtuples: Vec<Go> = dist.exch(tuples, width)?;
    let rcands: Vec<Remote> = dist.exch(&candidates, 1)?;
    let nrecords = rcands.len();

    // group equal tuples; lowest (rank, index) first within each run
    let tuple_of = |r: usize| &rtuples[r * width..(r + 1) * width];
    let mut order: Vec<usize> = (0..nrecords).collect();
    order.sort_unstable_by(|&a, &b| tuple_of(a).cmp(tuple_of(b)).then(rcands[a].cmp(&rcands[b])));

    let mut run_starts = Vec::new();
    for (pos, &r) in order.iter().enumerate() {
        if pos == 0 || tuple_of(order[pos - 1]) != tuple_of(r) {
            run_starts.push(pos);
        }
    }
    let ndistinct = run_starts.len() as u64;
    let start = comm.exscan(ndistinct, CommOp::Sum);
    log::debug!(
        "numbering rendezvous on rank {}: {nrecords} records, {ndistinct} distinct, ids from {start}",
        comm.rank(),
    );

    let mut replies = vec![GlobalOwner::zeroed(); nrecords];
    for (run, &begin) in run_starts.iter().enumerate() {
        let end = run_starts.get(run + 1).copied().unwrap_or(nrecords);
        let owner = rcands[order[begin]];
        let global = start + run as u64;
        for &r in &order[begin..end] {
            replies[r] = GlobalOwner {
                global,
                rank: owner.rank,
                index: owner.index,
            };
        }
    }

    let back: Vec<GlobalOwner> = dist.invert().exch(&replies, 1)?;
    debug_assert_eq!(back.len(), nents);
    let globals = back.iter().map(|g| g.global).collect();
    let owners = back
        .iter()
        .map(|g| Remote {
            rank: g.rank,
            index: g.index,
        })
        .collect();
    Ok((globals, owners))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::communicator::SerialComm;
    use crate::comm::thread_comm::ThreadComm;

    #[test]
    fn serial_numbering_follows_tuple_order() {
        let comm = Arc::new(SerialComm::world());
        // three edges keyed by global vertex pairs, given out of order
        let tuples: Vec<Go> = vec![4, 9, 0, 1, 2, 7];
        let (globals, owners) = number_entities(&comm, &tuples, 2).unwrap();
        // ids are dense 0..3 and respect sorted-tuple order
        let mut sorted = globals.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 1, 2]);
        assert!(globals[1] < globals[2] && globals[2] < globals[0]);
        for (i, o) in owners.iter().enumerate() {
            assert_eq!(*o, Remote::new(0, i as Lo));
        }
    }

    #[test]
    fn shared_tuple_agrees_across_ranks() {
        // both ranks hold the tuple (5, 8); rank 0 also (1, 2), rank 1 (8, 11)
        let comms = ThreadComm::group(2);
        let handles: Vec<_> = comms
            .into_iter()
            .enumerate()
            .map(|(rank, c)| {
                std::thread::spawn(move || {
                    let tuples: Vec<Go> = if rank == 0 {
                        vec![1, 2, 5, 8]
                    } else {
                        vec![5, 8, 8, 11]
                    };
                    let comm = Arc::new(c);
                    number_entities(&comm, &tuples, 2).unwrap()
                })
            })
            .collect();
        let out: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let (g0, o0) = &out[0];
        let (g1, o1) = &out[1];
        // the shared tuple gets one id and one owner, seen from both sides
        assert_eq!(g0[1], g1[0]);
        assert_eq!(o0[1], o1[0]);
        // rank 0 holds the lower-ranked copy, so it owns the shared entity
        assert_eq!(o0[1], Remote::new(0, 1));
        // three distinct tuples get three distinct dense ids
        let mut all = vec![g0[0], g0[1], g1[1]];
        all.push(g1[0]);
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|&g| g < 3));
    }
}
