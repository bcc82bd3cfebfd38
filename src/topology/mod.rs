//! Mesh topology: compressed adjacency storage and the derivation engine
//! that reconstructs every adjacency relation from element-to-vertex
//! connectivity.

pub mod derive;
pub mod graph;
pub mod simplex;

pub use graph::{
    Adjacency, Graph, RowLayout, code_is_flipped, code_rotation, code_which_down, make_code,
};
