//! Remote entity addresses.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;

use crate::types::{Lo, Rank};

/// Address of an entity copy on some rank: the owning rank and the entity's
/// local index there.
///
/// `Pod` so arrays of addresses ride through byte-oriented exchanges without
/// per-element packing.
#[repr(C)]
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash,
    Pod, Zeroable, Serialize, Deserialize,
)]
pub struct Remote {
    /// Owning rank.
    pub rank: u32,
    /// Local index on the owning rank.
    pub index: Lo,
}

const_assert_eq!(std::mem::size_of::<Remote>(), 8);

impl Remote {
    pub fn new(rank: Rank, index: Lo) -> Self {
        Self {
            rank: rank as u32,
            index,
        }
    }

    /// Split a list of addresses into parallel rank and index arrays.
    pub fn unzip(remotes: &[Remote]) -> (Vec<Rank>, Vec<Lo>) {
        (
            remotes.iter().map(|r| r.rank as Rank).collect(),
            remotes.iter().map(|r| r.index).collect(),
        )
    }
}
