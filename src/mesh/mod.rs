//! The distributed mesh container.
//!
//! A [`Mesh`] owns element-to-vertex connectivity as ground truth plus lazily
//! derived, cached views: intermediate entities, downward/upward/star/dual
//! adjacencies, global numbering, ownership, and the owner/ghost exchange
//! plan. All `ask_*` accessors take `&mut self` because a miss derives and
//! caches; repeated asks are lookups.
//!
//! Operations that build cross-rank state (`ask_globals`, `ask_owners`,
//! `ask_dist`, `sync_array`, `reduce_array`) are collective over the mesh
//! communicator; purely local derivation (`ask_down` and friends) is not.

pub mod globals;
pub mod migrate;
pub mod tags;

pub use tags::{Tag, TagData};

use std::sync::Arc;

use ahash::AHashMap;
use bytemuck::Pod;

use crate::arrays;
use crate::comm::communicator::{CommOp, CommValue, Communicator};
use crate::exchange::{Distribution, Remote};
use crate::mesh_error::MeshWeaveError;
use crate::topology::derive::{canonicalize, find_unique, form_uses, neighbors_through, reflect_down};
use crate::topology::graph::{Adjacency, Graph};
use crate::types::{DIMS, Go, Lo};

/// Name of the reserved vertex coordinate tag.
pub const COORDS_TAG: &str = "coordinates";

/// A simplicial mesh partitioned over the ranks of `C`.
pub struct Mesh<C: Communicator> {
    comm: Arc<C>,
    dim: usize,
    nents: [usize; DIMS],
    /// Entity-to-vertex connectivity per dimension; `[dim]` is ground truth,
    /// intermediate dimensions are derived on demand in canonical order.
    ents2verts: [Option<Graph>; DIMS],
    down: AHashMap<(usize, usize), Adjacency>,
    up: AHashMap<(usize, usize), Adjacency>,
    stars: AHashMap<usize, Graph>,
    dual: Option<Graph>,
    globals: [Option<Vec<Go>>; DIMS],
    owners: [Option<Vec<Remote>>; DIMS],
    dists: [Option<Distribution<C>>; DIMS],
    tags: [Vec<Tag>; DIMS],
}

impl<C: Communicator> Mesh<C> {
    fn new_raw(
        comm: Arc<C>,
        dim: usize,
        ev2v: Graph,
        vert_globals: Vec<Go>,
    ) -> Result<Self, MeshWeaveError> {
        if dim == 0 || dim >= DIMS {
            return Err(MeshWeaveError::InvalidDimension { dim, mesh_dim: dim });
        }
        if ev2v.uniform_width() != Some(dim + 1) {
            return Err(MeshWeaveError::SizeMismatch {
                context: "element connectivity width",
                expected: dim + 1,
                got: ev2v.uniform_width().unwrap_or(0),
            });
        }
        let nverts = vert_globals.len();
        if let Some(&v) = ev2v.targets().iter().find(|&&v| v as usize >= nverts) {
            return Err(MeshWeaveError::MissingEntities(v as usize));
        }
        let mut nents = [0; DIMS];
        nents[0] = nverts;
        nents[dim] = ev2v.nrows();
        let mut ents2verts: [Option<Graph>; DIMS] = Default::default();
        ents2verts[dim] = Some(ev2v);
        let mut globals: [Option<Vec<Go>>; DIMS] = Default::default();
        globals[0] = Some(vert_globals);
        log::debug!(
            "mesh built on rank {}: dim {dim}, {} elements, {nverts} vertices",
            comm.rank(),
            nents[dim],
        );
        Ok(Self {
            comm,
            dim,
            nents,
            ents2verts,
            down: AHashMap::new(),
            up: AHashMap::new(),
            stars: AHashMap::new(),
            dual: None,
            globals,
            owners: Default::default(),
            dists: Default::default(),
            tags: Default::default(),
        })
    }

    /// Single-rank (or rank-independent) construction: vertex globals are the
    /// local indices.
    pub fn build_from_elems2verts(
        comm: Arc<C>,
        dim: usize,
        ev2v: Graph,
        nverts: usize,
    ) -> Result<Self, MeshWeaveError> {
        Self::new_raw(comm, dim, ev2v, (0..nverts as Go).collect())
    }

    /// Partitioned construction: connectivity in local vertex indices plus
    /// each local vertex's global id. Ranks sharing a global vertex share the
    /// entities derived through it.
    pub fn build_from_global_verts(
        comm: Arc<C>,
        dim: usize,
        ev2v: Graph,
        vert_globals: Vec<Go>,
    ) -> Result<Self, MeshWeaveError> {
        Self::new_raw(comm, dim, ev2v, vert_globals)
    }

    pub fn comm(&self) -> &Arc<C> {
        &self.comm
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn nverts(&self) -> usize {
        self.nents[0]
    }

    pub fn nelems(&self) -> usize {
        self.nents[self.dim]
    }

    fn check_dim(&self, d: usize) -> Result<(), MeshWeaveError> {
        if d > self.dim {
            return Err(MeshWeaveError::InvalidDimension {
                dim: d,
                mesh_dim: self.dim,
            });
        }
        Ok(())
    }

    /// Number of local entities of dimension `d` (deriving them on first ask).
    pub fn nents(&mut self, d: usize) -> Result<usize, MeshWeaveError> {
        self.ensure_derived(d)?;
        Ok(self.nents[d])
    }

    /// Number of distinct entities of dimension `d` across all ranks.
    /// Collective.
    pub fn nglobal_ents(&mut self, d: usize) -> Result<u64, MeshWeaveError> {
        let nowned = self.owned(d)?.iter().filter(|&&o| o).count() as u64;
        Ok(self.comm.allreduce(nowned, CommOp::Sum))
    }

    fn ensure_derived(&mut self, d: usize) -> Result<(), MeshWeaveError> {
        self.check_dim(d)?;
        if d == 0 || d == self.dim || self.ents2verts[d].is_some() {
            return Ok(());
        }
        let elems = self.ents2verts[self.dim]
            .as_ref()
            .expect("element connectivity is set at construction");
        let uses = form_uses(elems, self.dim, d);
        let ents = find_unique(&uses);
        log::debug!(
            "derived {} entities of dimension {d} from {} uses",
            ents.nrows(),
            uses.nrows(),
        );
        self.nents[d] = ents.nrows();
        self.ents2verts[d] = Some(ents);
        Ok(())
    }

    /// Vertex tuples of each `d`-entity (the identity map for `d == 0`).
    pub fn ask_verts_of(&mut self, d: usize) -> Result<&Graph, MeshWeaveError> {
        self.ensure_derived(d)?;
        if d == 0 && self.ents2verts[0].is_none() {
            self.ents2verts[0] = Some(Graph::flat(1, (0..self.nents[0] as Lo).collect()));
        }
        Ok(self.ents2verts[d]
            .as_ref()
            .expect("connectivity cached above"))
    }

    /// Downward adjacency from `from`-entities to `to`-entities
    /// (`to < from`). Codes are present whenever `to > 0`.
    pub fn ask_down(&mut self, from: usize, to: usize) -> Result<&Adjacency, MeshWeaveError> {
        self.check_dim(from)?;
        if to >= from {
            return Err(MeshWeaveError::InvalidDimension {
                dim: to,
                mesh_dim: self.dim,
            });
        }
        if !self.down.contains_key(&(from, to)) {
            self.ensure_derived(from)?;
            self.ensure_derived(to)?;
            let from_g = self.ents2verts[from]
                .as_ref()
                .expect("derived above")
                .clone();
            let adj = if to == 0 {
                Adjacency::plain(from_g)
            } else {
                let to_g = self.ents2verts[to].as_ref().expect("derived above").clone();
                let v2b = to_g.invert(self.nents[0]);
                reflect_down(&from_g, &to_g, &v2b, from, to)?
            };
            self.down.insert((from, to), adj);
        }
        Ok(&self.down[&(from, to)])
    }

    /// Upward adjacency from `from`-entities to `to`-entities (`from < to`).
    /// Codes pack each child's slot within the parent (`which_down`).
    pub fn ask_up(&mut self, from: usize, to: usize) -> Result<&Adjacency, MeshWeaveError> {
        self.check_dim(to)?;
        if from >= to {
            return Err(MeshWeaveError::InvalidDimension {
                dim: from,
                mesh_dim: self.dim,
            });
        }
        if !self.up.contains_key(&(from, to)) {
            let down = self.ask_down(to, from)?.clone();
            let nlow = self.nents(from)?;
            self.up.insert((from, to), down.invert(nlow));
        }
        Ok(&self.up[&(from, to)])
    }

    /// Same-dimension neighbors through shared vertices (through shared edges
    /// for `d == 0`).
    pub fn ask_star(&mut self, d: usize) -> Result<&Graph, MeshWeaveError> {
        self.check_dim(d)?;
        if !self.stars.contains_key(&d) {
            let star = if d == 0 {
                let e2v = self.ask_down(1, 0)?.graph.clone();
                let v2e = self.ask_up(0, 1)?.graph.clone();
                neighbors_through(&v2e, &e2v)
            } else {
                let d2v = self.ask_down(d, 0)?.graph.clone();
                let v2d = self.ask_up(0, d)?.graph.clone();
                neighbors_through(&d2v, &v2d)
            };
            self.stars.insert(d, star);
        }
        Ok(&self.stars[&d])
    }

    /// Element neighbors through shared facets.
    pub fn ask_dual(&mut self) -> Result<&Graph, MeshWeaveError> {
        if self.dual.is_none() {
            let facet_dim = self.dim - 1;
            let down = self.ask_down(self.dim, facet_dim)?.graph.clone();
            let nfacets = self.nents(facet_dim)?;
            let up = down.invert(nfacets);
            self.dual = Some(neighbors_through(&down, &up));
        }
        Ok(self.dual.as_ref().expect("cached above"))
    }

    /// Compute globals and owners of dimension `d` together; both come from
    /// one rendezvous. Collective.
    fn ensure_identity(&mut self, d: usize) -> Result<(), MeshWeaveError> {
        self.ensure_derived(d)?;
        if self.owners[d].is_some() && self.globals[d].is_some() {
            return Ok(());
        }
        if d == self.dim {
            // elements are never replicated: self-owned, ids by scan
            let n = self.nents[d];
            let start = self.comm.exscan(n as u64, CommOp::Sum);
            self.globals[d] = Some((0..n as u64).map(|i| start + i).collect());
            self.owners[d] = Some(
                (0..n)
                    .map(|i| Remote::new(self.comm.rank(), i as Lo))
                    .collect(),
            );
            return Ok(());
        }
        let vert_globals = self.globals[0]
            .as_ref()
            .expect("vertex globals are set at construction")
            .clone();
        let width = d + 1;
        let tuples: Vec<Go> = if d == 0 {
            vert_globals.clone()
        } else {
            let e2v = self.ents2verts[d].as_ref().expect("derived above");
            let mut tuples = Vec::with_capacity(e2v.ntargets());
            for e in 0..e2v.nrows() {
                let gv: Vec<Go> = e2v.row(e).iter().map(|&v| vert_globals[v as usize]).collect();
                tuples.extend(canonicalize(&gv).0);
            }
            tuples
        };
        let (ids, owners) = globals::number_entities(&self.comm, &tuples, width)?;
        // vertices keep their caller-provided global ids
        if d != 0 {
            self.globals[d] = Some(ids);
        }
        self.owners[d] = Some(owners);
        Ok(())
    }

    /// Global id of each local `d`-entity. Collective on first ask.
    pub fn ask_globals(&mut self, d: usize) -> Result<&[Go], MeshWeaveError> {
        self.ensure_identity(d)?;
        Ok(self.globals[d].as_deref().expect("cached above"))
    }

    /// Owner address of each local `d`-entity. Collective on first ask.
    pub fn ask_owners(&mut self, d: usize) -> Result<&[Remote], MeshWeaveError> {
        self.ensure_identity(d)?;
        Ok(self.owners[d].as_deref().expect("cached above"))
    }

    /// Whether each local `d`-entity is owned by this rank. Collective on
    /// first ask.
    pub fn owned(&mut self, d: usize) -> Result<Vec<bool>, MeshWeaveError> {
        let rank = self.comm.rank() as u32;
        Ok(self
            .ask_owners(d)?
            .iter()
            .map(|o| o.rank == rank)
            .collect())
    }

    /// The owner/ghost exchange plan of dimension `d`: every local copy is an
    /// item addressed at its owner's root. Collective on first ask.
    pub fn ask_dist(&mut self, d: usize) -> Result<&Distribution<C>, MeshWeaveError> {
        self.ensure_identity(d)?;
        if self.dists[d].is_none() {
            let owners = self.owners[d].as_deref().expect("cached above");
            let dist =
                Distribution::from_remotes(Arc::clone(&self.comm), owners, self.nents[d])?;
            self.dists[d] = Some(dist);
        }
        Ok(self.dists[d].as_ref().expect("cached above"))
    }

    /// Owner broadcast: every copy of an entity receives the owner copy's
    /// record. Collective.
    pub fn sync_array<T: Pod>(
        &mut self,
        d: usize,
        data: &[T],
        width: usize,
    ) -> Result<Vec<T>, MeshWeaveError> {
        arrays::check_len(data, self.nents(d)?, width, "sync records")?;
        self.ask_dist(d)?.invert().exch(data, width)
    }

    /// Copy reduction: every copy of an entity receives the fold of all
    /// copies' records under `op`. Collective.
    pub fn reduce_array<T: CommValue>(
        &mut self,
        d: usize,
        data: &[T],
        width: usize,
        op: CommOp,
    ) -> Result<Vec<T>, MeshWeaveError> {
        arrays::check_len(data, self.nents(d)?, width, "reduce records")?;
        let dist = self.ask_dist(d)?;
        let owned_vals = dist.exch_reduce(data, width, op)?;
        dist.invert().exch(&owned_vals, width)
    }

    /// Attach a named array to the `d`-entities. Fails if the name is taken
    /// or the length is not `nents(d) * ncomps`.
    pub fn add_tag(
        &mut self,
        d: usize,
        name: &str,
        ncomps: usize,
        data: TagData,
    ) -> Result<(), MeshWeaveError> {
        let nents = self.nents(d)?;
        if self.has_tag(d, name) {
            return Err(MeshWeaveError::TagExists(name.to_owned(), d));
        }
        if data.len() != nents * ncomps {
            return Err(MeshWeaveError::TagSizeMismatch {
                name: name.to_owned(),
                expected: nents * ncomps,
                got: data.len(),
            });
        }
        self.tags[d].push(Tag::new(name.to_owned(), ncomps, data));
        Ok(())
    }

    /// Replace an existing tag's data. A plain data update: no adjacency or
    /// ownership cache is touched.
    pub fn set_tag(&mut self, d: usize, name: &str, data: TagData) -> Result<(), MeshWeaveError> {
        self.check_dim(d)?;
        let expected = self
            .get_tag(d, name)
            .map(|t| t.ncomps() * self.nents[d])?;
        if data.len() != expected {
            return Err(MeshWeaveError::TagSizeMismatch {
                name: name.to_owned(),
                expected,
                got: data.len(),
            });
        }
        let tag = self.tags[d]
            .iter_mut()
            .find(|t| t.name() == name)
            .expect("presence checked above");
        tag.set_data(data);
        Ok(())
    }

    pub fn get_tag(&self, d: usize, name: &str) -> Result<&Tag, MeshWeaveError> {
        self.check_dim(d)?;
        self.tags[d]
            .iter()
            .find(|t| t.name() == name)
            .ok_or_else(|| MeshWeaveError::NoSuchTag(name.to_owned(), d))
    }

    pub fn remove_tag(&mut self, d: usize, name: &str) -> Result<Tag, MeshWeaveError> {
        self.check_dim(d)?;
        let pos = self.tags[d]
            .iter()
            .position(|t| t.name() == name)
            .ok_or_else(|| MeshWeaveError::NoSuchTag(name.to_owned(), d))?;
        Ok(self.tags[d].remove(pos))
    }

    pub fn has_tag(&self, d: usize, name: &str) -> bool {
        d < DIMS && self.tags[d].iter().any(|t| t.name() == name)
    }

    pub fn ntags(&self, d: usize) -> usize {
        self.tags[d].len()
    }

    pub fn tags(&self, d: usize) -> &[Tag] {
        &self.tags[d]
    }

    /// Attach vertex coordinates (`dim` values per vertex).
    pub fn add_coords(&mut self, coords: Vec<f64>) -> Result<(), MeshWeaveError> {
        let ncomps = self.dim;
        self.add_tag(0, COORDS_TAG, ncomps, TagData::F64(coords))
    }

    /// Replace vertex coordinates. No topology cache is touched.
    pub fn set_coords(&mut self, coords: Vec<f64>) -> Result<(), MeshWeaveError> {
        self.set_tag(0, COORDS_TAG, TagData::F64(coords))
    }

    /// Vertex coordinates, `dim` values per vertex.
    pub fn coords(&self) -> Result<&[f64], MeshWeaveError> {
        match self.get_tag(0, COORDS_TAG)?.data() {
            TagData::F64(v) => Ok(v),
            _ => Err(MeshWeaveError::NoSuchTag(COORDS_TAG.to_owned(), 0)),
        }
    }
}
