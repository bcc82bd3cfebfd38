//! Two ranks, one triangle each, glued along one edge.
//!
//! Rank 0 holds global vertices {0, 1, 2}, rank 1 holds {1, 3, 2}; the edge
//! with global vertices (1, 2) exists on both ranks and must resolve to one
//! identity: same global id, one owner, and an exchange plan whose only
//! cross-rank item is the non-owner's copy of that edge.

use std::sync::Arc;

use mesh_weave::comm::{CommOp, Communicator, ThreadComm};
use mesh_weave::prelude::*;

fn on_two_ranks<T, F>(f: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(usize, ThreadComm) -> T + Send + Sync + Copy + 'static,
{
    let handles: Vec<_> = ThreadComm::group(2)
        .into_iter()
        .enumerate()
        .map(|(rank, c)| std::thread::spawn(move || f(rank, c)))
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

fn build(rank: usize, comm: ThreadComm) -> Mesh<ThreadComm> {
    let ev = Graph::flat(3, vec![0, 1, 2]);
    let vert_globals: Vec<Go> = if rank == 0 { vec![0, 1, 2] } else { vec![1, 3, 2] };
    Mesh::build_from_global_verts(Arc::new(comm), 2, ev, vert_globals).unwrap()
}

/// Local index of the shared edge: global tuple (1, 2) canonicalizes to
/// local (1, 2) on rank 0 and local (0, 2) on rank 1; derived edges sort as
/// (0,1), (0,2), (1,2) on both ranks.
fn shared_edge(rank: usize) -> usize {
    if rank == 0 { 2 } else { 1 }
}

#[test]
fn shared_edge_has_one_global_id_and_one_owner() {
    let out = on_two_ranks(|rank, comm| {
        let mut mesh = build(rank, comm);
        assert_eq!(mesh.nents(EDGE).unwrap(), 3);
        let globals = mesh.ask_globals(EDGE).unwrap().to_vec();
        let owners = mesh.ask_owners(EDGE).unwrap().to_vec();
        let total = mesh.nglobal_ents(EDGE).unwrap();
        (globals, owners, total)
    });
    let (g0, o0, t0) = &out[0];
    let (g1, o1, t1) = &out[1];
    // five distinct edges across the pair of triangles
    assert_eq!((*t0, *t1), (5, 5));
    assert_eq!(g0[shared_edge(0)], g1[shared_edge(1)]);
    assert_eq!(o0[shared_edge(0)], o1[shared_edge(1)]);
    // lowest rank wins ownership
    assert_eq!(o1[shared_edge(1)], Remote::new(0, shared_edge(0) as Lo));
    // unshared edges stay locally owned
    for e in 0..3 {
        if e != shared_edge(1) {
            assert_eq!(o1[e].rank, 1);
        }
    }
}

#[test]
fn exchange_plan_has_one_cross_rank_item_on_the_non_owner() {
    let out = on_two_ranks(|rank, comm| {
        let mut mesh = build(rank, comm);
        let dist = mesh.ask_dist(EDGE).unwrap();
        let dests = dist.items2dests().unwrap();
        let me = dist.parent_comm().rank() as u32;
        let cross: Vec<Remote> = dests.iter().copied().filter(|d| d.rank != me).collect();
        (dist.nitems(), cross)
    });
    assert_eq!(out[0].0, 3);
    assert_eq!(out[1].0, 3);
    // the owner side has no outgoing ghost items; the non-owner has exactly
    // one, addressed at the owner's local root
    assert!(out[0].1.is_empty());
    assert_eq!(out[1].1, vec![Remote::new(0, shared_edge(0) as Lo)]);
}

#[test]
fn sync_broadcasts_and_reduce_folds_over_copies() {
    let out = on_two_ranks(|rank, comm| {
        let mut mesh = build(rank, comm);
        let data: Vec<i64> = if rank == 0 {
            vec![10, 20, 30]
        } else {
            vec![40, 50, 60]
        };
        let synced = mesh.sync_array(EDGE, &data, 1).unwrap();
        let reduced = mesh.reduce_array(EDGE, &data, 1, CommOp::Sum).unwrap();
        (synced, reduced)
    });
    // rank 1's copy of the shared edge takes the owner's value
    assert_eq!(out[0].0, vec![10, 20, 30]);
    assert_eq!(out[1].0, vec![40, 30, 60]);
    // both copies see the fold 30 + 50
    assert_eq!(out[0].1, vec![10, 20, 80]);
    assert_eq!(out[1].1, vec![40, 80, 60]);
}

#[test]
fn vertex_globals_are_kept_and_vertex_owners_agree() {
    let out = on_two_ranks(|rank, comm| {
        let mut mesh = build(rank, comm);
        let globals = mesh.ask_globals(VERT).unwrap().to_vec();
        let owners = mesh.ask_owners(VERT).unwrap().to_vec();
        (globals, owners)
    });
    assert_eq!(out[0].0, vec![0, 1, 2]);
    assert_eq!(out[1].0, vec![1, 3, 2]);
    // shared vertices 1 and 2 resolve to the same owner on both ranks
    assert_eq!(out[0].1[1], out[1].1[0]);
    assert_eq!(out[0].1[2], out[1].1[2]);
    assert_eq!(out[0].1[1].rank, 0);
}
