//! MPI communicator backend (feature `mpi-support`).
//!
//! Thin wrapper over the `mpi` crate. Graph communicators keep explicit
//! source/destination rank lists and run the neighbor exchange over
//! nonblocking sends plus probing receives on a duplicated communicator, so
//! unrelated exchanges never share a message-matching space.
//!
//! MPI communicators are used from one thread at a time per the crate-wide
//! single-writer collective contract; `Send`/`Sync` are asserted on that
//! basis.

use std::sync::Arc;

use mpi::datatype::PartitionMut;
use mpi::environment::Universe;
use mpi::topology::{Color, SimpleCommunicator};
use mpi::traits::{Communicator as _, CommunicatorCollectives, Destination, Source};

use crate::comm::communicator::{Communicator, check_ranks};
use crate::mesh_error::MeshWeaveError;
use crate::types::Rank;

/// Inter-process communicator over MPI.
pub struct MpiComm {
    universe: Arc<Universe>,
    comm: SimpleCommunicator,
    srcs: Vec<Rank>,
    dsts: Vec<Rank>,
}

unsafe impl Send for MpiComm {}
unsafe impl Sync for MpiComm {}

impl MpiComm {
    /// Initialize MPI (if needed) and wrap the world communicator.
    pub fn world() -> Self {
        let universe = Arc::new(
            mpi::initialize().expect("MPI may only be initialized once per process"),
        );
        let comm = universe.world();
        let n = comm.size() as Rank;
        Self {
            universe,
            comm,
            srcs: (0..n).collect(),
            dsts: (0..n).collect(),
        }
    }

    fn wrap(&self, comm: SimpleCommunicator, srcs: Vec<Rank>, dsts: Vec<Rank>) -> Self {
        Self {
            universe: Arc::clone(&self.universe),
            comm,
            srcs,
            dsts,
        }
    }
}

impl Communicator for MpiComm {
    fn rank(&self) -> Rank {
        self.comm.rank() as Rank
    }

    fn size(&self) -> Rank {
        self.comm.size() as Rank
    }

    fn sources(&self) -> &[Rank] {
        &self.srcs
    }

    fn destinations(&self) -> &[Rank] {
        &self.dsts
    }

    fn dup(&self) -> Self {
        self.wrap(self.comm.duplicate(), self.srcs.clone(), self.dsts.clone())
    }

    fn split(&self, color: i32, key: i32) -> Self {
        let sub = self
            .comm
            .split_by_color_with_key(Color::with_value(color), key)
            .expect("split color must be non-negative on every rank");
        let n = sub.size() as Rank;
        self.wrap(sub, (0..n).collect(), (0..n).collect())
    }

    fn graph(&self, dsts: &[Rank]) -> Result<Self, MeshWeaveError> {
        check_ranks(dsts, self.size())?;
        // discovery round: everyone publishes its destination list
        let encoded: Vec<u64> = dsts.iter().map(|&d| d as u64).collect();
        let all = self.allgather_bytes(bytemuck::cast_slice(&encoded));
        let mut srcs = Vec::new();
        for (rank, blob) in all.iter().enumerate() {
            let their: Vec<u64> = blob
                .chunks_exact(8)
                .map(bytemuck::pod_read_unaligned)
                .collect();
            if their.contains(&(self.rank() as u64)) {
                srcs.push(rank);
            }
        }
        let mut dsts = dsts.to_vec();
        dsts.sort_unstable();
        dsts.dedup();
        Ok(self.wrap(self.comm.duplicate(), srcs, dsts))
    }

    fn graph_adjacent(&self, srcs: &[Rank], dsts: &[Rank]) -> Result<Self, MeshWeaveError> {
        check_ranks(srcs, self.size())?;
        check_ranks(dsts, self.size())?;
        let mut srcs = srcs.to_vec();
        srcs.sort_unstable();
        srcs.dedup();
        let mut dsts = dsts.to_vec();
        dsts.sort_unstable();
        dsts.dedup();
        Ok(self.wrap(self.comm.duplicate(), srcs, dsts))
    }

    fn allgather_bytes(&self, bytes: &[u8]) -> Vec<Vec<u8>> {
        let n = self.size();
        let mut counts = vec![0i32; n];
        self.comm
            .all_gather_into(&(bytes.len() as i32), &mut counts[..]);
        let mut displs = Vec::with_capacity(n);
        let mut total = 0i32;
        for &c in &counts {
            displs.push(total);
            total += c;
        }
        let mut buf = vec![0u8; total as usize];
        {
            let mut partition = PartitionMut::new(&mut buf[..], &counts[..], &displs[..]);
            self.comm.all_gather_varcount_into(bytes, &mut partition);
        }
        counts
            .iter()
            .zip(&displs)
            .map(|(&c, &d)| buf[d as usize..(d + c) as usize].to_vec())
            .collect()
    }

    fn neighbor_alltoallv_bytes(&self, sends: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
        debug_assert_eq!(sends.len(), self.dsts.len());
        let mut recvd = Vec::with_capacity(self.srcs.len());
        mpi::request::multiple_scope(sends.len(), |scope, requests| {
            for (blob, &dst) in sends.iter().zip(&self.dsts) {
                requests.add(
                    self.comm
                        .process_at_rank(dst as i32)
                        .immediate_send(scope, &blob[..]),
                );
            }
            for &src in &self.srcs {
                let (data, _status) = self.comm.process_at_rank(src as i32).receive_vec::<u8>();
                recvd.push(data);
            }
            requests.wait_all(&mut Vec::new());
        });
        recvd
    }
}
