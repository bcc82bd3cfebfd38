//! # mesh-weave
//!
//! mesh-weave is a data engine for distributed unstructured simplicial
//! meshes. It keeps element-to-vertex connectivity as the only stored
//! topology and derives everything else on demand: edges and faces with
//! orientation codes, upward adjacencies, stars, element duals, global
//! numbering, ownership, and the owner/ghost exchange plans that move field
//! data between ranks.
//!
//! ## Layers
//! - [`comm`]: a pluggable [`Communicator`](comm::Communicator) trait with
//!   serial, in-process multi-rank, and (feature `mpi-support`) MPI backends,
//!   plus reproducible floating-point summation.
//! - [`exchange`]: [`Remote`](exchange::Remote) addresses and the reusable
//!   [`Distribution`](exchange::Distribution) communication plan.
//! - [`topology`]: compressed adjacency graphs, orientation codes, and the
//!   entity derivation/matching engine.
//! - [`mesh`]: the [`Mesh`](mesh::Mesh) container tying it together with
//!   caches, tags, coordinates, ghost synchronization, and migration.
//!
//! ## Determinism
//!
//! Reductions fold contributions in rank order and global numbering uses a
//! fixed-seed rendezvous hash, so results are bit-identical regardless of
//! rank count, partitioning, or message arrival order.
//!
//! ## Usage
//!
//! ```
//! use std::sync::Arc;
//! use mesh_weave::prelude::*;
//!
//! // a unit square as two triangles sharing the diagonal
//! let ev = Graph::flat(3, vec![0, 1, 2, 2, 3, 0]);
//! let comm = Arc::new(SerialComm::world());
//! let mut mesh = Mesh::build_from_elems2verts(comm, 2, ev, 4).unwrap();
//! assert_eq!(mesh.nents(EDGE).unwrap(), 5);
//! assert_eq!(mesh.ask_dual().unwrap().row(0), &[1]);
//! ```

pub mod arrays;
pub mod comm;
pub mod exchange;
pub mod mesh;
pub mod mesh_error;
pub mod topology;
pub mod types;

pub use mesh_error::MeshWeaveError;

/// Convenient re-exports for typical consumers.
pub mod prelude {
    pub use crate::comm::{CommOp, Communicator, SerialComm, ThreadComm, repro_sum};
    #[cfg(feature = "mpi-support")]
    pub use crate::comm::MpiComm;
    pub use crate::exchange::{Distribution, Remote};
    pub use crate::mesh::{Mesh, Tag, TagData};
    pub use crate::mesh_error::MeshWeaveError;
    pub use crate::topology::{
        Adjacency, Graph, RowLayout, code_is_flipped, code_rotation, code_which_down, make_code,
    };
    pub use crate::types::{Code, DIMS, EDGE, FACE, Go, Lo, REGION, Rank, VERT};
}
