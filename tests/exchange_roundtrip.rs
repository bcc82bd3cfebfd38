//! Exchange-plan behavior across an in-process three-rank ring.

use std::sync::Arc;

use mesh_weave::comm::{CommOp, ThreadComm};
use mesh_weave::prelude::*;

fn on_ranks<T, F>(n: usize, f: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(usize, ThreadComm) -> T + Send + Sync + Copy + 'static,
{
    let handles: Vec<_> = ThreadComm::group(n)
        .into_iter()
        .enumerate()
        .map(|(rank, c)| std::thread::spawn(move || f(rank, c)))
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

#[test]
fn roundtrip_through_invert_is_identity() {
    // each rank sends both its items to the next rank, one per root, so no
    // root ever receives twice
    let out = on_ranks(3, |rank, comm| {
        let next = (rank + 1) % 3;
        let dests = vec![Remote::new(next, 0), Remote::new(next, 1)];
        let dist = Distribution::from_remotes(Arc::new(comm), &dests, 2).unwrap();
        let x = vec![(rank * 10) as i64, (rank * 10 + 1) as i64];
        let there = dist.exch(&x, 1).unwrap();
        let back = dist.invert().exch(&there, 1).unwrap();
        (x, there, back)
    });
    for (rank, (x, there, back)) in out.into_iter().enumerate() {
        let prev = (rank + 2) % 3;
        assert_eq!(there, vec![(prev * 10) as i64, (prev * 10 + 1) as i64]);
        assert_eq!(back, x);
    }
}

#[test]
fn reduction_folds_fan_in_items() {
    // all three ranks address the same two roots on rank 0
    let out = on_ranks(3, |rank, comm| {
        let dests = vec![Remote::new(0, 0), Remote::new(0, 1)];
        let dist = Distribution::from_remotes(Arc::new(comm), &dests, 2).unwrap();
        let x = vec![1i64 << rank, 1i64 << (rank + 4)];
        dist.exch_reduce(&x, 1, CommOp::Sum).unwrap()
    });
    assert_eq!(out[0], vec![0b111, 0b111 << 4]);
    // ranks 1 and 2 declared two roots but received nothing
    assert_eq!(out[1], vec![0, 0]);
    assert_eq!(out[2], vec![0, 0]);
}

#[test]
fn wide_records_move_atomically() {
    let out = on_ranks(2, |rank, comm| {
        let other = 1 - rank;
        let dests = vec![Remote::new(other, 0)];
        let dist = Distribution::from_remotes(Arc::new(comm), &dests, 1).unwrap();
        let x = vec![rank as u64, 100 + rank as u64, 200 + rank as u64];
        dist.exch(&x, 3).unwrap()
    });
    assert_eq!(out[0], vec![1, 101, 201]);
    assert_eq!(out[1], vec![0, 100, 200]);
}

#[test]
fn repro_sum_is_invariant_under_partitioning() {
    let vals: Vec<f64> = (0..12).map(|i| (i as f64) * 0.3 - 1.7).collect();
    let whole = {
        let comm = SerialComm::world();
        repro_sum(&comm, &vals).to_bits()
    };
    let handles: Vec<_> = ThreadComm::group(3)
        .into_iter()
        .enumerate()
        .map(|(rank, comm)| {
            let mine = vals[rank * 4..(rank + 1) * 4].to_vec();
            std::thread::spawn(move || repro_sum(&comm, &mine).to_bits())
        })
        .collect();
    for h in handles {
        assert_eq!(h.join().unwrap(), whole);
    }
}
