//! `MeshWeaveError`: unified error type for mesh-weave public APIs.
//!
//! Every fallible operation in the crate reports through this enum so callers
//! get robust, non-panicking error handling. Two of the fault classes from
//! the error taxonomy appear here: precondition violations (malformed
//! remotes, out-of-sequence pattern construction, bad dimensions) and
//! matching-integrity faults. Collective-participation mismatches are *not*
//! representable as errors; they manifest as hangs by contract.

use thiserror::Error;

use crate::types::{Lo, Rank};

/// Unified error type for mesh-weave operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MeshWeaveError {
    /// A remote reference points past the owner's declared root count.
    #[error("remote index {index} out of range: owner rank {rank} declares {nroots} roots")]
    MalformedRemote { rank: Rank, index: Lo, nroots: Lo },
    /// A rank identifier outside `[0, comm.size())` was passed to a graph
    /// communicator constructor.
    #[error("rank {rank} out of range for communicator of size {size}")]
    RankOutOfRange { rank: Rank, size: Rank },
    /// An exchange was attempted before the pattern's construction sequence
    /// (`set_dest_ranks` -> `set_dest_idxs`) completed.
    #[error("exchange pattern not ready: {0}")]
    PatternNotReady(&'static str),
    /// An array's length disagrees with the item/root count times width.
    #[error("size mismatch in {context}: expected {expected}, got {got}")]
    SizeMismatch {
        context: &'static str,
        expected: usize,
        got: usize,
    },
    /// An entity dimension outside `[0, mesh.dim()]`, or a (from, to) pair
    /// that names no adjacency relation.
    #[error("invalid entity dimension {dim} (mesh dimension is {mesh_dim})")]
    InvalidDimension { dim: usize, mesh_dim: usize },
    /// A candidate sub-entity found no counterpart among the derived
    /// entities. Indicates inconsistent input connectivity.
    #[error("no match for candidate {use_index} of dimension {dim}")]
    MatchingFailure { dim: usize, use_index: usize },
    /// Two distinct derived entities answered for the same canonical vertex
    /// tuple. Surfaced to the caller rather than resolved silently, since
    /// either resolution could corrupt topology.
    #[error("ambiguous match for candidate {use_index} of dimension {dim}")]
    MatchingAmbiguity { dim: usize, use_index: usize },
    /// A tag with this name already exists on the given dimension.
    #[error("tag `{0}` already exists on dimension {1}")]
    TagExists(String, usize),
    /// No tag with this name exists on the given dimension.
    #[error("no tag `{0}` on dimension {1}")]
    NoSuchTag(String, usize),
    /// A tag array's length disagrees with `nents(dim) * ncomps`.
    #[error("tag `{name}` array has {got} entries, expected {expected}")]
    TagSizeMismatch {
        name: String,
        expected: usize,
        got: usize,
    },
    /// Element connectivity references a vertex outside the declared vertex
    /// set.
    #[error("connectivity references vertex {0} outside the declared vertex set")]
    MissingEntities(usize),
}
