//! Collective communication over a process group.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees); typed
//! collectives cast through `bytemuck` at the boundary. Every collective is a
//! synchronization point: all ranks of the group must call it, with matching
//! arguments, in the same order. A rank that skips a collective hangs the
//! group; that is a caller contract violation, not a recoverable error, and
//! no deadlock detection is attempted.
//!
//! Reductions and scans gather the per-rank contributions and fold them in
//! rank order, so the result is bit-identical on every rank regardless of
//! message arrival order. The same path makes `allreduce(Sum)` over `i128`
//! an exact wide-integer sum, which [`crate::comm::repro`] builds on.

use std::mem::size_of;
use std::ops::Add;

use bytemuck::Pod;
use num_traits::{Bounded, Zero};

use crate::mesh_error::MeshWeaveError;
use crate::types::{Lo, Rank};

/// Associative, commutative reduction operators.
///
/// `BOr`/`BAnd` are integer-only; applying them to a floating-point value is
/// a caller bug and panics.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CommOp {
    /// Elementwise minimum.
    Min,
    /// Elementwise maximum.
    Max,
    /// Sum.
    Sum,
    /// Bitwise or (integers only).
    BOr,
    /// Bitwise and (integers only).
    BAnd,
}

/// Scalar values that can ride through typed collectives.
pub trait CommValue:
    Pod + Copy + PartialOrd + Zero + Bounded + Add<Output = Self> + Send + Sync + 'static
{
    /// Fold two contributions under `op`.
    fn combine(op: CommOp, a: Self, b: Self) -> Self;
    /// The identity element of `op` (what a rank with no contribution adds).
    fn identity(op: CommOp) -> Self;
}

macro_rules! impl_comm_value_int {
    ($($t:ty),*) => {$(
        impl CommValue for $t {
            #[inline]
            fn combine(op: CommOp, a: Self, b: Self) -> Self {
                match op {
                    CommOp::Min => if b < a { b } else { a },
                    CommOp::Max => if b > a { b } else { a },
                    CommOp::Sum => a + b,
                    CommOp::BOr => a | b,
                    CommOp::BAnd => a & b,
                }
            }
            #[inline]
            fn identity(op: CommOp) -> Self {
                match op {
                    CommOp::Min => <$t>::max_value(),
                    CommOp::Max => <$t>::min_value(),
                    CommOp::Sum | CommOp::BOr => 0,
                    CommOp::BAnd => !0,
                }
            }
        }
    )*};
}

impl_comm_value_int!(i8, i16, i32, i64, i128, u8, u16, u32, u64);

impl CommValue for f64 {
    #[inline]
    fn combine(op: CommOp, a: Self, b: Self) -> Self {
        match op {
            CommOp::Min => {
                if b < a {
                    b
                } else {
                    a
                }
            }
            CommOp::Max => {
                if b > a {
                    b
                } else {
                    a
                }
            }
            CommOp::Sum => a + b,
            CommOp::BOr | CommOp::BAnd => panic!("bitwise reduction on floating point"),
        }
    }
    #[inline]
    fn identity(op: CommOp) -> Self {
        match op {
            CommOp::Min => f64::MAX,
            CommOp::Max => f64::MIN,
            CommOp::Sum => 0.0,
            CommOp::BOr | CommOp::BAnd => panic!("bitwise reduction on floating point"),
        }
    }
}

/// Copy a byte buffer into a typed vector (alignment-safe).
pub(crate) fn bytes_to_vec<T: Pod>(bytes: &[u8]) -> Vec<T> {
    debug_assert_eq!(bytes.len() % size_of::<T>(), 0);
    bytes
        .chunks_exact(size_of::<T>())
        .map(bytemuck::pod_read_unaligned)
        .collect()
}

/// Borrow a typed slice as bytes.
pub(crate) fn vec_to_bytes<T: Pod>(data: &[T]) -> Vec<u8> {
    bytemuck::cast_slice(data).to_vec()
}

/// Collective communication interface (minimal per-backend surface).
///
/// A communicator is either a plain group (sources = destinations = the full
/// rank set) or a bipartite *graph* communicator scoped to an explicit
/// source/destination rank set, so later exchanges only touch the minimal
/// rank subset.
pub trait Communicator: Send + Sync + Sized + 'static {
    /// This process's rank within the group.
    fn rank(&self) -> Rank;
    /// Number of ranks in the group.
    fn size(&self) -> Rank;
    /// Ranks that send to this one, ascending.
    fn sources(&self) -> &[Rank];
    /// Ranks this one sends to, ascending.
    fn destinations(&self) -> &[Rank];

    /// Duplicate this communicator (fresh collective context, same group).
    fn dup(&self) -> Self;
    /// Partition the group into disjoint sub-groups by `color`, ranked
    /// within each sub-group by `(key, old rank)`.
    fn split(&self, color: i32, key: i32) -> Self;
    /// Build a graph communicator whose destinations are `dsts`; the source
    /// set is discovered collectively.
    fn graph(&self, dsts: &[Rank]) -> Result<Self, MeshWeaveError>;
    /// Build a graph communicator from explicit source and destination sets;
    /// no discovery round is needed.
    fn graph_adjacent(&self, srcs: &[Rank], dsts: &[Rank]) -> Result<Self, MeshWeaveError>;

    /// Every rank contributes a blob; returns all blobs ordered by rank.
    fn allgather_bytes(&self, bytes: &[u8]) -> Vec<Vec<u8>>;
    /// Send `sends[i]` to `destinations()[i]`; returns one blob per entry of
    /// `sources()`, in order. Only the graph's rank pairs communicate.
    fn neighbor_alltoallv_bytes(&self, sends: Vec<Vec<u8>>) -> Vec<Vec<u8>>;

    /// The graph communicator with sources and destinations swapped.
    fn graph_inverse(&self) -> Result<Self, MeshWeaveError> {
        let srcs = self.destinations().to_vec();
        let dsts = self.sources().to_vec();
        self.graph_adjacent(&srcs, &dsts)
    }

    /// Block until every rank of the group arrives.
    fn barrier(&self) {
        let _ = self.allgather_bytes(&[]);
    }

    /// Collect one value per rank, ordered by rank.
    fn allgather<T: CommValue>(&self, x: T) -> Vec<T> {
        self.allgather_bytes(bytemuck::bytes_of(&x))
            .iter()
            .map(|b| bytemuck::pod_read_unaligned(b))
            .collect()
    }

    /// Reduce one value per rank down to an identical result on every rank.
    fn allreduce<T: CommValue>(&self, x: T, op: CommOp) -> T {
        self.allgather(x)
            .into_iter()
            .fold(T::identity(op), |acc, v| T::combine(op, acc, v))
    }

    /// Exclusive prefix scan: rank r receives the fold of ranks `0..r`
    /// (the identity on rank 0).
    fn exscan<T: CommValue>(&self, x: T, op: CommOp) -> T {
        self.allgather(x)
            .into_iter()
            .take(self.rank())
            .fold(T::identity(op), |acc, v| T::combine(op, acc, v))
    }

    /// Distribute `root`'s value to every rank.
    fn bcast<T: CommValue>(&self, root: Rank, x: T) -> T {
        self.allgather(x)[root]
    }

    /// Variable-length counterpart of [`Communicator::bcast`].
    fn bcast_string(&self, root: Rank, s: &str) -> String {
        let all = self.allgather_bytes(s.as_bytes());
        String::from_utf8_lossy(&all[root]).into_owned()
    }

    /// Logical-or reduction.
    fn reduce_or(&self, x: bool) -> bool {
        self.allreduce(x as u8, CommOp::BOr) != 0
    }

    /// Logical-and reduction.
    fn reduce_and(&self, x: bool) -> bool {
        self.allreduce(x as u8, CommOp::BAnd) != 0
    }

    /// Exact wide-integer sum; the reproducible-sum primitive.
    fn add_i128(&self, x: i128) -> i128 {
        self.allreduce(x, CommOp::Sum)
    }

    /// Fixed-length exchange: one record of `width` values per destination;
    /// returns one record per source, in source order.
    fn alltoall<T: CommValue>(&self, x: &[T], width: usize) -> Result<Vec<T>, MeshWeaveError> {
        let ndsts = self.destinations().len();
        crate::arrays::check_len(x, ndsts, width, "alltoall send buffer")?;
        let sends = x
            .chunks_exact(width)
            .map(vec_to_bytes)
            .collect::<Vec<_>>();
        let recvd = self.neighbor_alltoallv_bytes(sends);
        let mut out = Vec::with_capacity(recvd.len() * width);
        for blob in &recvd {
            out.extend(bytes_to_vec::<T>(blob));
        }
        Ok(out)
    }

    /// Variable-length exchange with explicit per-destination send counts and
    /// displacements; receive counts and displacements describe the layout of
    /// the returned buffer (all counts in records of `width = 1` value).
    fn alltoallv<T: CommValue>(
        &self,
        sendbuf: &[T],
        sendcounts: &[Lo],
        sdispls: &[Lo],
        recvcounts: &[Lo],
        rdispls: &[Lo],
    ) -> Result<Vec<T>, MeshWeaveError> {
        let ndsts = self.destinations().len();
        let nsrcs = self.sources().len();
        crate::arrays::check_len(sendcounts, ndsts, 1, "alltoallv sendcounts")?;
        crate::arrays::check_len(recvcounts, nsrcs, 1, "alltoallv recvcounts")?;
        let mut sends = Vec::with_capacity(ndsts);
        for m in 0..ndsts {
            let begin = sdispls[m] as usize;
            let end = begin + sendcounts[m] as usize;
            sends.push(vec_to_bytes(&sendbuf[begin..end]));
        }
        let recvd = self.neighbor_alltoallv_bytes(sends);
        let total: usize = recvcounts.iter().map(|&c| c as usize).sum();
        let mut out = vec![T::zero(); total];
        for (m, blob) in recvd.iter().enumerate() {
            let vals = bytes_to_vec::<T>(blob);
            if vals.len() != recvcounts[m] as usize {
                return Err(MeshWeaveError::SizeMismatch {
                    context: "alltoallv receive count",
                    expected: recvcounts[m] as usize,
                    got: vals.len(),
                });
            }
            let begin = rdispls[m] as usize;
            out[begin..begin + vals.len()].copy_from_slice(&vals);
        }
        Ok(out)
    }
}

/// Validate a rank list against a group size; used by every backend's graph
/// constructors.
pub(crate) fn check_ranks(ranks: &[Rank], size: Rank) -> Result<(), MeshWeaveError> {
    for &r in ranks {
        if r >= size {
            return Err(MeshWeaveError::RankOutOfRange { rank: r, size });
        }
    }
    Ok(())
}

/// Single-rank communicator for serial runs and pure unit tests.
#[derive(Clone, Debug)]
pub struct SerialComm {
    srcs: Vec<Rank>,
    dsts: Vec<Rank>,
}

impl Default for SerialComm {
    fn default() -> Self {
        Self {
            srcs: vec![0],
            dsts: vec![0],
        }
    }
}

impl SerialComm {
    /// A fresh single-rank world.
    pub fn world() -> Self {
        Self::default()
    }
}

impl Communicator for SerialComm {
    fn rank(&self) -> Rank {
        0
    }
    fn size(&self) -> Rank {
        1
    }
    fn sources(&self) -> &[Rank] {
        &self.srcs
    }
    fn destinations(&self) -> &[Rank] {
        &self.dsts
    }

    fn dup(&self) -> Self {
        self.clone()
    }

    fn split(&self, _color: i32, _key: i32) -> Self {
        Self::world()
    }

    fn graph(&self, dsts: &[Rank]) -> Result<Self, MeshWeaveError> {
        check_ranks(dsts, 1)?;
        Ok(Self {
            srcs: dsts.to_vec(),
            dsts: dsts.to_vec(),
        })
    }

    fn graph_adjacent(&self, srcs: &[Rank], dsts: &[Rank]) -> Result<Self, MeshWeaveError> {
        check_ranks(srcs, 1)?;
        check_ranks(dsts, 1)?;
        Ok(Self {
            srcs: srcs.to_vec(),
            dsts: dsts.to_vec(),
        })
    }

    fn allgather_bytes(&self, bytes: &[u8]) -> Vec<Vec<u8>> {
        vec![bytes.to_vec()]
    }

    fn neighbor_alltoallv_bytes(&self, sends: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
        debug_assert_eq!(sends.len(), self.dsts.len());
        // everything loops back to self
        sends
    }
}
