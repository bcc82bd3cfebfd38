//! Canonical simplex reference tables.
//!
//! These tables fix, once and for all, which local vertices form each
//! boundary sub-entity of an edge, triangle, or tetrahedron, and in which
//! order. Every derivation in [`crate::topology::derive`] reads from here, so
//! two ranks that derive the same element independently produce the same
//! local orderings.

/// Number of `bdry_dim`-dimensional boundaries of one `elem_dim`-simplex.
///
/// This is the binomial coefficient C(elem_dim + 1, bdry_dim + 1).
pub const fn simplex_degree(elem_dim: usize, bdry_dim: usize) -> usize {
    const CHOOSE: [[usize; 4]; 4] = [
        [1, 0, 0, 0],
        [2, 1, 0, 0],
        [3, 3, 1, 0],
        [4, 6, 4, 1],
    ];
    CHOOSE[elem_dim][bdry_dim]
}

const EDGE_VERTS: [&[usize]; 2] = [&[0], &[1]];

const TRI_VERTS: [&[usize]; 3] = [&[0], &[1], &[2]];
const TRI_EDGES: [&[usize]; 3] = [&[0, 1], &[1, 2], &[2, 0]];

const TET_VERTS: [&[usize]; 4] = [&[0], &[1], &[2], &[3]];
const TET_EDGES: [&[usize]; 6] = [
    &[0, 1],
    &[1, 2],
    &[2, 0],
    &[0, 3],
    &[1, 3],
    &[2, 3],
];
const TET_FACES: [&[usize]; 4] = [&[0, 2, 1], &[0, 1, 3], &[1, 2, 3], &[2, 0, 3]];

/// Local vertices of boundary `which` of an `elem_dim`-simplex, where the
/// boundary has dimension `bdry_dim`.
pub fn down_template(elem_dim: usize, bdry_dim: usize, which: usize) -> &'static [usize] {
    match (elem_dim, bdry_dim) {
        (1, 0) => EDGE_VERTS[which],
        (2, 0) => TRI_VERTS[which],
        (2, 1) => TRI_EDGES[which],
        (3, 0) => TET_VERTS[which],
        (3, 1) => TET_EDGES[which],
        (3, 2) => TET_FACES[which],
        _ => panic!("no template for {bdry_dim}-boundaries of a {elem_dim}-simplex"),
    }
}
