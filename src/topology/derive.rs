//! Derivation of intermediate entities from element connectivity.
//!
//! The mesh stores only element-to-vertex connectivity as ground truth; edges
//! and faces (and their adjacencies) are derived on demand. Derivation runs
//! in three steps:
//!
//! 1. [`form_uses`]: expand each element into its boundary "uses" via the
//!    reference templates in [`crate::topology::simplex`];
//! 2. [`find_unique`]: canonicalize each use's vertex tuple and deduplicate,
//!    yielding one entity per distinct vertex set in canonical order;
//! 3. [`find_matches`]: map each use back to its unique entity, recording an
//!    orientation code that reconstructs the use's vertex order from the
//!    entity's stored order.
//!
//! Canonicalization is pure vertex-id arithmetic, so any two ranks holding
//! copies of the same entity agree on its canonical order without
//! communicating.

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::mesh_error::MeshWeaveError;
use crate::topology::graph::{
    Adjacency, Graph, code_is_flipped, code_rotation, make_code,
};
use crate::topology::simplex::{down_template, simplex_degree};
use crate::types::{Code, Lo};

/// Canonical order of a vertex tuple plus the code that undoes it.
///
/// The canonical order puts the smallest vertex first; for triangles the
/// remaining two follow in ascending order of the second position. The
/// returned code satisfies `apply_code(&canon, code) == verts`.
pub fn canonicalize<T: Ord + Copy>(verts: &[T]) -> (Vec<T>, Code) {
    match verts.len() {
        1 => (verts.to_vec(), make_code(false, 0, 0)),
        2 => {
            let flipped = verts[0] > verts[1];
            let canon = if flipped {
                vec![verts[1], verts[0]]
            } else {
                verts.to_vec()
            };
            (canon, make_code(flipped, 0, 0))
        }
        3 => {
            let r = (0..3).min_by_key(|&i| verts[i]).unwrap_or(0);
            let rotated = [verts[r], verts[(r + 1) % 3], verts[(r + 2) % 3]];
            let flipped = rotated[2] < rotated[1];
            let canon = if flipped {
                vec![rotated[0], rotated[2], rotated[1]]
            } else {
                rotated.to_vec()
            };
            (canon, make_code(flipped, r as u8, 0))
        }
        n => panic!("cannot canonicalize a {n}-vertex tuple"),
    }
}

/// Reconstruct a vertex tuple from its canonical order and an orientation
/// code; inverse of [`canonicalize`].
pub fn apply_code<T: Copy>(canon: &[T], code: Code) -> Vec<T> {
    let deg = canon.len();
    let r = code_rotation(code) as usize;
    let t: Vec<T> = if code_is_flipped(code) && deg == 3 {
        vec![canon[0], canon[2], canon[1]]
    } else if code_is_flipped(code) && deg == 2 {
        vec![canon[1], canon[0]]
    } else {
        canon.to_vec()
    };
    (0..deg).map(|k| t[(k + deg - r) % deg]).collect()
}

/// The code aligning stored order `from` to observed order `to`, if the two
/// tuples contain the same vertices.
pub fn alignment<T: Ord + Copy>(from: &[T], to: &[T]) -> Option<Code> {
    let deg = from.len();
    debug_assert_eq!(to.len(), deg);
    let rotations = if deg == 3 { 3 } else { 1 };
    for flipped in [false, true] {
        for r in 0..rotations {
            let code = make_code(flipped, r as u8, 0);
            if apply_code(from, code) == to {
                return Some(code);
            }
        }
    }
    None
}

/// Expand each element row into its `bdry_dim`-dimensional uses.
///
/// The result is a flat graph of `nelems * degree` rows, each the vertex
/// tuple of one use in template order; row `e * degree + which` is use
/// `which` of element `e`.
pub fn form_uses(elems2verts: &Graph, elem_dim: usize, bdry_dim: usize) -> Graph {
    let degree = simplex_degree(elem_dim, bdry_dim);
    let use_width = bdry_dim + 1;
    let nelems = elems2verts.nrows();
    let mut out = vec![0 as Lo; nelems * degree * use_width];

    let fill = |elem: usize, chunk: &mut [Lo]| {
        let ev = elems2verts.row(elem);
        for which in 0..degree {
            let template = down_template(elem_dim, bdry_dim, which);
            for (slot, &local) in template.iter().enumerate() {
                chunk[which * use_width + slot] = ev[local];
            }
        }
    };

    #[cfg(feature = "parallel")]
    out.par_chunks_mut(degree * use_width)
        .enumerate()
        .for_each(|(elem, chunk)| fill(elem, chunk));
    #[cfg(not(feature = "parallel"))]
    out.chunks_mut(degree * use_width)
        .enumerate()
        .for_each(|(elem, chunk)| fill(elem, chunk));

    Graph::flat(use_width, out)
}

/// Deduplicate uses into unique entities.
///
/// Each distinct vertex set appears once, stored in canonical order; entities
/// are numbered in ascending canonical-tuple order, so the numbering is a
/// pure function of the connectivity.
pub fn find_unique(uses: &Graph) -> Graph {
    let width = uses
        .uniform_width()
        .expect("uses are always a flat graph");
    let mut tuples: Vec<Vec<Lo>> = (0..uses.nrows())
        .map(|i| canonicalize(uses.row(i)).0)
        .collect();
    tuples.sort_unstable();
    tuples.dedup();
    Graph::flat(width, tuples.into_iter().flatten().collect())
}

/// Match each row of `av2v` against the entities of `bv2v`.
///
/// `v2b` must be the inversion of `bv2v` (vertex to entity). Returns, per
/// row of `av2v`, the matching entity index and the code aligning the
/// entity's stored vertex order to the row's order.
pub fn find_matches(
    dim: usize,
    av2v: &Graph,
    bv2v: &Graph,
    v2b: &Graph,
) -> Result<(Vec<Lo>, Vec<Code>), MeshWeaveError> {
    let mut a2b = Vec::with_capacity(av2v.nrows());
    let mut codes = Vec::with_capacity(av2v.nrows());
    for a in 0..av2v.nrows() {
        let verts = av2v.row(a);
        let (canon, _) = canonicalize(verts);
        let mut found: Option<Lo> = None;
        for &b in v2b.row(canon[0] as usize) {
            let (b_canon, _) = canonicalize(bv2v.row(b as usize));
            if b_canon == canon {
                if found.is_some() {
                    return Err(MeshWeaveError::MatchingAmbiguity { dim, use_index: a });
                }
                found = Some(b);
            }
        }
        let b = found.ok_or(MeshWeaveError::MatchingFailure { dim, use_index: a })?;
        let code = alignment(bv2v.row(b as usize), verts)
            .ok_or(MeshWeaveError::MatchingFailure { dim, use_index: a })?;
        a2b.push(b);
        codes.push(code);
    }
    Ok((a2b, codes))
}

/// Downward adjacency from elements to derived boundary entities.
///
/// `bdries2verts` must hold every boundary use of `elems2verts` (as produced
/// by [`find_unique`] on the same connectivity) and `verts2bdries` its
/// inversion.
pub fn reflect_down(
    elems2verts: &Graph,
    bdries2verts: &Graph,
    verts2bdries: &Graph,
    elem_dim: usize,
    bdry_dim: usize,
) -> Result<Adjacency, MeshWeaveError> {
    let uses = form_uses(elems2verts, elem_dim, bdry_dim);
    let (a2b, codes) = find_matches(bdry_dim, &uses, bdries2verts, verts2bdries)?;
    let degree = simplex_degree(elem_dim, bdry_dim);
    Ok(Adjacency::with_codes(Graph::flat(degree, a2b), codes))
}

/// Second-neighborhood composition: rows of `a2b` joined through `b2a`.
///
/// Used for both stars (neighbors through shared vertices) and duals
/// (neighbors through shared facets). Each output row is sorted,
/// deduplicated, and excludes the row itself.
pub fn neighbors_through(a2b: &Graph, b2a: &Graph) -> Graph {
    let nrows = a2b.nrows();
    let mut offsets = Vec::with_capacity(nrows + 1);
    offsets.push(0 as Lo);
    let mut targets = Vec::new();
    let mut scratch = Vec::new();
    for i in 0..nrows {
        scratch.clear();
        for &bridge in a2b.row(i) {
            for &peer in b2a.row(bridge as usize) {
                if peer as usize != i {
                    scratch.push(peer);
                }
            }
        }
        scratch.sort_unstable();
        scratch.dedup();
        targets.extend_from_slice(&scratch);
        offsets.push(targets.len() as Lo);
    }
    Graph::from_offsets(offsets, targets)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two triangles sharing the diagonal of a unit square:
    /// verts 0..4, elems [0,1,2] and [2,3,0].
    fn square() -> Graph {
        Graph::flat(3, vec![0, 1, 2, 2, 3, 0])
    }

    #[test]
    fn canonicalize_round_trips_through_apply_code() {
        let cases: Vec<Vec<Lo>> = vec![
            vec![7],
            vec![3, 9],
            vec![9, 3],
            vec![1, 2, 3],
            vec![5, 1, 3],
            vec![5, 3, 1],
            vec![2, 3, 1],
            vec![3, 1, 2],
        ];
        for verts in cases {
            let (canon, code) = canonicalize(&verts);
            // canonical order is ascending for every simplex degree
            assert!(canon.windows(2).all(|w| w[0] < w[1]));
            assert_eq!(apply_code(&canon, code), verts, "tuple {verts:?}");
        }
    }

    #[test]
    fn alignment_finds_the_relating_code() {
        let stored = [1 as Lo, 4, 8];
        for observed in [[1, 4, 8], [4, 8, 1], [8, 1, 4], [1, 8, 4], [8, 4, 1], [4, 1, 8]] {
            let code = alignment(&stored, &observed).unwrap();
            assert_eq!(apply_code(&stored, code), observed);
        }
        assert_eq!(alignment(&stored, &[1, 4, 9]), None);
    }

    #[test]
    fn square_produces_five_unique_edges() {
        let uses = form_uses(&square(), 2, 1);
        assert_eq!(uses.nrows(), 6);
        let edges = find_unique(&uses);
        assert_eq!(edges.nrows(), 5);
        // canonical tuples in ascending order
        assert_eq!(
            edges.targets(),
            &[0, 1, 0, 2, 0, 3, 1, 2, 2, 3]
        );
    }

    #[test]
    fn square_diagonal_gets_opposite_codes() {
        let elems = square();
        let uses = form_uses(&elems, 2, 1);
        let edges = find_unique(&uses);
        let v2e = edges.invert(4);
        let down = reflect_down(&elems, &edges, &v2e, 2, 1).unwrap();
        assert_eq!(down.graph.uniform_width(), Some(3));
        // the diagonal (0,2) is edge 1; locate it in each triangle
        let mut hits = Vec::new();
        for elem in 0..2 {
            for (slot, &e) in down.graph.row(elem).iter().enumerate() {
                if e == 1 {
                    hits.push(down.codes[down.graph.offset(elem) + slot]);
                }
            }
        }
        assert_eq!(hits.len(), 2);
        // triangle 0 traverses it as (2,0), triangle 1 as (0,2)
        assert_ne!(code_is_flipped(hits[0]), code_is_flipped(hits[1]));
    }

    #[test]
    fn matching_failure_on_missing_entity() {
        let elems = square();
        let uses = form_uses(&elems, 2, 1);
        // drop the last edge from the table
        let edges = find_unique(&uses);
        let truncated = Graph::flat(2, edges.targets()[..8].to_vec());
        let v2e = truncated.invert(4);
        let err = find_matches(1, &uses, &truncated, &v2e).unwrap_err();
        assert!(matches!(err, MeshWeaveError::MatchingFailure { dim: 1, .. }));
    }

    #[test]
    fn dual_of_square_crosses_the_diagonal() {
        let elems = square();
        let uses = form_uses(&elems, 2, 1);
        let edges = find_unique(&uses);
        let v2e = edges.invert(4);
        let down = reflect_down(&elems, &edges, &v2e, 2, 1).unwrap();
        let up = down.invert(edges.nrows());
        let dual = neighbors_through(&down.graph, &up.graph);
        assert_eq!(dual.row(0), &[1]);
        assert_eq!(dual.row(1), &[0]);
    }

    #[test]
    fn vertex_star_through_edges() {
        let elems = square();
        let uses = form_uses(&elems, 2, 1);
        let edges = find_unique(&uses);
        let v2e = edges.invert(4);
        let e2v = Adjacency::plain(edges.clone());
        let star = neighbors_through(&v2e, &e2v.graph);
        // vertex 0 touches edges to 1, 2, 3; vertex 1 only to 0 and 2
        assert_eq!(star.row(0), &[1, 2, 3]);
        assert_eq!(star.row(1), &[0, 2]);
    }

    #[test]
    fn tet_derivation_counts() {
        let tet = Graph::flat(4, vec![0, 1, 2, 3]);
        let edge_uses = form_uses(&tet, 3, 1);
        assert_eq!(find_unique(&edge_uses).nrows(), 6);
        let face_uses = form_uses(&tet, 3, 2);
        let faces = find_unique(&face_uses);
        assert_eq!(faces.nrows(), 4);
        let v2f = faces.invert(4);
        let down = reflect_down(&tet, &faces, &v2f, 3, 2).unwrap();
        assert_eq!(down.graph.row(0).len(), 4);
    }
}
