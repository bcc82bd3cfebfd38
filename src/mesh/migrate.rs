//! Element migration: repartitioning the mesh by pulling elements.
//!
//! Each rank names the elements it wants next as addresses into the current
//! partition; connectivity (as global vertex ids), vertex coordinates, and
//! element tags are pulled through one exchange plan and the local mesh is
//! rebuilt from scratch. Every derived cache is discarded; vertex-dimension
//! tags other than coordinates and all intermediate-dimension tags do not
//! survive (their entity sets change identity).

use std::sync::Arc;

use itertools::Itertools;

use crate::comm::communicator::Communicator;
use crate::exchange::{Distribution, Remote};
use crate::mesh::tags::TagData;
use crate::mesh::{COORDS_TAG, Mesh};
use crate::mesh_error::MeshWeaveError;
use crate::types::{Go, Lo};

impl<C: Communicator> Mesh<C> {
    /// Replace this rank's elements with `new_elems`, each addressing an
    /// element of the current partition by (rank, local index). Collective;
    /// every current element must be claimed by at least one rank.
    pub fn migrate(&mut self, new_elems: &[Remote]) -> Result<(), MeshWeaveError> {
        let dim = self.dim();
        let corners = dim + 1;
        let nold = self.nelems();
        let comm = Arc::clone(self.comm());

        // per-old-element payloads, pulled below through the inverted plan
        let vert_globals = self.ask_globals(0)?.to_vec();
        let ev = self.ask_verts_of(dim)?.clone();
        let elem_globals: Vec<Go> = ev
            .targets()
            .iter()
            .map(|&v| vert_globals[v as usize])
            .collect();
        let corner_coords: Option<Vec<f64>> = if self.has_tag(0, COORDS_TAG) {
            let coords = self.coords()?;
            let mut out = Vec::with_capacity(nold * corners * dim);
            for &v in ev.targets() {
                let v = v as usize;
                out.extend_from_slice(&coords[v * dim..(v + 1) * dim]);
            }
            Some(out)
        } else {
            None
        };
        let old_tags: Vec<_> = self.tags(dim).to_vec();

        let dist = Distribution::from_remotes(comm.clone(), new_elems, nold)?;
        let pull = dist.invert();
        let new_ev_globals: Vec<Go> = pull.exch(&elem_globals, corners)?;
        let new_corner_coords = match &corner_coords {
            Some(cc) => Some(pull.exch(cc, corners * dim)?),
            None => None,
        };
        let mut new_tags = Vec::with_capacity(old_tags.len());
        for tag in &old_tags {
            let w = tag.ncomps();
            let data = match tag.data() {
                TagData::I8(v) => TagData::I8(pull.exch(v, w)?),
                TagData::I32(v) => TagData::I32(pull.exch(v, w)?),
                TagData::I64(v) => TagData::I64(pull.exch(v, w)?),
                TagData::F64(v) => TagData::F64(pull.exch(v, w)?),
            };
            new_tags.push((tag.name().to_owned(), w, data));
        }

        // rebuild local vertex set from the pulled connectivity
        let new_vert_globals: Vec<Go> = new_ev_globals
            .iter()
            .copied()
            .sorted_unstable()
            .dedup()
            .collect();
        let local_of = |g: Go| {
            new_vert_globals
                .binary_search(&g)
                .expect("every corner global is in the deduplicated set") as Lo
        };
        let new_ev: Vec<Lo> = new_ev_globals.iter().map(|&g| local_of(g)).collect();
        let nverts = new_vert_globals.len();
        let nelems = new_ev.len() / corners;
        log::debug!(
            "migrated rank {}: {nold} -> {nelems} elements, {nverts} vertices",
            comm.rank(),
        );

        let new_coords = new_corner_coords.map(|cc| {
            let mut coords = vec![0.0f64; nverts * dim];
            for (corner, &g) in new_ev_globals.iter().enumerate() {
                let v = local_of(g) as usize;
                coords[v * dim..(v + 1) * dim]
                    .copy_from_slice(&cc[corner * dim..(corner + 1) * dim]);
            }
            coords
        });

        let ev_graph = crate::topology::graph::Graph::flat(corners, new_ev);
        let mut rebuilt = Mesh::build_from_global_verts(comm, dim, ev_graph, new_vert_globals)?;
        if let Some(coords) = new_coords {
            rebuilt.add_coords(coords)?;
        }
        for (name, ncomps, data) in new_tags {
            rebuilt.add_tag(dim, &name, ncomps, data)?;
        }
        *self = rebuilt;
        Ok(())
    }
}
