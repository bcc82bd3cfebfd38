//! Primitive index and identifier types shared across the crate.
//!
//! Mesh entities are stored as compact index arrays, so the local index type
//! is a fixed-width `u32` rather than `usize`; global identifiers are `u64`
//! so they survive any realistic mesh size. Communicator ranks use `usize`
//! to index straight into per-rank vectors.

/// Local entity index within one rank's arrays.
pub type Lo = u32;

/// Global entity identifier, unique across all ranks.
pub type Go = u64;

/// Process rank within a communicator group.
pub type Rank = usize;

/// Packed orientation code: flip bit, 2-bit rotation, which-local-subentity.
/// See [`crate::topology::graph`] for the accessors.
pub type Code = u8;

/// Entity dimensions of a (up to) 3D mesh.
pub const VERT: usize = 0;
/// Edge dimension.
pub const EDGE: usize = 1;
/// Face (triangle) dimension.
pub const FACE: usize = 2;
/// Region (tetrahedron) dimension.
pub const REGION: usize = 3;

/// Number of entity dimensions tracked by a mesh container.
pub const DIMS: usize = 4;
