//! Compressed sparse row graphs, adjacency relations, and orientation codes.
//!
//! Every adjacency relation in the mesh is stored uniformly as a [`Graph`]:
//! a flattened target-index array plus either explicit row offsets or a
//! uniform row width (the degenerate "flat" layout used for element-to-vertex
//! connectivity). An [`Adjacency`] pairs a graph with an optional parallel
//! array of orientation codes, one per target entry.
//!
//! An orientation code packs three fields into one byte:
//!
//! ```text
//! bit 0      flip        (reflection relative to canonical order)
//! bits 1-2   rotation    (position of the canonical first vertex)
//! bits 3-7   which_down  (which local sub-entity of the parent)
//! ```
//!
//! Codes are only ever built and decoded through [`make_code`] and the
//! `code_*` accessors, never ad hoc, so every producer and consumer agrees on
//! the packing.

use serde::{Deserialize, Serialize};

use crate::types::{Code, Lo};

/// Build an orientation code from its three fields.
#[inline]
pub const fn make_code(flipped: bool, rotation: u8, which_down: u8) -> Code {
    (which_down << 3) | ((rotation & 3) << 1) | flipped as u8
}

/// Whether the sub-entity is reflected relative to its canonical order.
#[inline]
pub const fn code_is_flipped(code: Code) -> bool {
    code & 1 != 0
}

/// Rotation applied after (un)reflection; for a triangle this is the
/// canonical position of the original first vertex.
#[inline]
pub const fn code_rotation(code: Code) -> u8 {
    (code >> 1) & 3
}

/// Which local sub-entity of the parent this entry refers to.
#[inline]
pub const fn code_which_down(code: Code) -> u8 {
    code >> 3
}

/// Row structure of a [`Graph`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowLayout {
    /// Every row has the same fixed width (flat element connectivity).
    Uniform(usize),
    /// Explicit CSR offsets: `len = nrows + 1`, monotonically non-decreasing,
    /// `last == targets.len()`.
    Offsets(Vec<Lo>),
}

/// A many-to-many relation in compressed sparse row form.
///
/// Row `i`'s targets are `targets[offset(i)..offset(i + 1)]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graph {
    rows: RowLayout,
    targets: Vec<Lo>,
}

impl Graph {
    /// Flat graph: every row has exactly `width` targets.
    pub fn flat(width: usize, targets: Vec<Lo>) -> Self {
        debug_assert!(width > 0 && targets.len() % width == 0);
        Self {
            rows: RowLayout::Uniform(width),
            targets,
        }
    }

    /// CSR graph from explicit offsets.
    pub fn from_offsets(offsets: Vec<Lo>, targets: Vec<Lo>) -> Self {
        debug_assert!(!offsets.is_empty());
        debug_assert_eq!(*offsets.last().unwrap() as usize, targets.len());
        debug_assert!(offsets.windows(2).all(|w| w[0] <= w[1]));
        Self {
            rows: RowLayout::Offsets(offsets),
            targets,
        }
    }

    /// An empty relation with zero rows.
    pub fn empty() -> Self {
        Self::from_offsets(vec![0], Vec::new())
    }

    /// Number of rows.
    pub fn nrows(&self) -> usize {
        match &self.rows {
            RowLayout::Uniform(w) => self.targets.len() / w,
            RowLayout::Offsets(o) => o.len() - 1,
        }
    }

    /// Total number of target entries.
    pub fn ntargets(&self) -> usize {
        self.targets.len()
    }

    /// Start of row `i` in the flattened target array.
    #[inline]
    pub fn offset(&self, i: usize) -> usize {
        match &self.rows {
            RowLayout::Uniform(w) => i * w,
            RowLayout::Offsets(o) => o[i] as usize,
        }
    }

    /// Targets of row `i`.
    #[inline]
    pub fn row(&self, i: usize) -> &[Lo] {
        &self.targets[self.offset(i)..self.offset(i + 1)]
    }

    /// The fixed row width, if this is a flat graph.
    pub fn uniform_width(&self) -> Option<usize> {
        match self.rows {
            RowLayout::Uniform(w) => Some(w),
            RowLayout::Offsets(_) => None,
        }
    }

    /// The row layout.
    pub fn layout(&self) -> &RowLayout {
        &self.rows
    }

    /// The flattened target array.
    pub fn targets(&self) -> &[Lo] {
        &self.targets
    }

    /// Materialized CSR offsets (length `nrows + 1`).
    pub fn offsets_vec(&self) -> Vec<Lo> {
        match &self.rows {
            RowLayout::Uniform(w) => (0..=self.nrows()).map(|i| (i * w) as Lo).collect(),
            RowLayout::Offsets(o) => o.clone(),
        }
    }

    /// Transpose: for an `nrows`-row relation onto `ncols` columns, the
    /// `ncols`-row relation back onto the rows.
    ///
    /// Implemented as a stable two-pass counting sort: entries sharing a
    /// target preserve source-row order (and, within a row, target-slot
    /// order).
    pub fn invert(&self, ncols: usize) -> Graph {
        let mut counts = vec![0 as Lo; ncols];
        for &t in &self.targets {
            counts[t as usize] += 1;
        }
        let offsets = crate::arrays::exclusive_scan(&counts);
        let mut fill = offsets[..ncols].to_vec();
        let mut out = vec![0 as Lo; self.targets.len()];
        for row in 0..self.nrows() {
            for &t in self.row(row) {
                let slot = fill[t as usize];
                out[slot as usize] = row as Lo;
                fill[t as usize] = slot + 1;
            }
        }
        Graph::from_offsets(offsets, out)
    }
}

/// A [`Graph`] annotated with per-target orientation codes.
///
/// `codes` is either empty (no orientation recorded) or exactly
/// `targets.len()` long.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adjacency {
    /// The underlying relation.
    pub graph: Graph,
    /// One orientation code per target entry, or empty.
    pub codes: Vec<Code>,
}

impl Adjacency {
    /// Adjacency without orientation codes.
    pub fn plain(graph: Graph) -> Self {
        Self {
            graph,
            codes: Vec::new(),
        }
    }

    /// Adjacency with one code per target entry.
    pub fn with_codes(graph: Graph, codes: Vec<Code>) -> Self {
        debug_assert_eq!(codes.len(), graph.ntargets());
        Self { graph, codes }
    }

    /// Transpose a downward relation into the upward one.
    ///
    /// The upward codes pack each entry's `which_down` (its slot within the
    /// parent's row) together with the flip/rotation of the corresponding
    /// downward code, so a consumer can recover the child's local vertex
    /// ordering relative to any of its parents.
    pub fn invert(&self, ncols: usize) -> Adjacency {
        let mut counts = vec![0 as Lo; ncols];
        for &t in self.graph.targets() {
            counts[t as usize] += 1;
        }
        let offsets = crate::arrays::exclusive_scan(&counts);
        let mut fill = offsets[..ncols].to_vec();
        let ntargets = self.graph.ntargets();
        let mut parents = vec![0 as Lo; ntargets];
        let mut codes = vec![0 as Code; ntargets];
        for row in 0..self.graph.nrows() {
            let begin = self.graph.offset(row);
            for (which, &child) in self.graph.row(row).iter().enumerate() {
                let slot = fill[child as usize] as usize;
                parents[slot] = row as Lo;
                let down_code = if self.codes.is_empty() {
                    0
                } else {
                    self.codes[begin + which]
                };
                codes[slot] = make_code(
                    code_is_flipped(down_code),
                    code_rotation(down_code),
                    which as u8,
                );
                fill[child as usize] += 1;
            }
        }
        Adjacency::with_codes(Graph::from_offsets(offsets, parents), codes)
    }
}
