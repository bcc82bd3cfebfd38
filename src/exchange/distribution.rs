//! Reusable communication plans for entity data.
//!
//! A [`Distribution`] is built once from per-item destination addresses and
//! then routes any number of typed payloads along the same pattern. The
//! forward direction moves one record per *item* (local copy) to its
//! destination *root* on the destination rank; [`Distribution::invert`]
//! yields the plan for the opposite direction without further communication.
//!
//! The plan is three composable layers per direction:
//!
//! 1. `roots2items`: optional fan-out offsets, when one root's record feeds
//!    several items;
//! 2. `items2content`: optional permutation packing items into send-buffer
//!    order (items bound for the same rank become contiguous);
//! 3. `msgs2content`: message offsets into the packed buffer, one per
//!    neighboring rank, driving a sparse neighbor exchange.
//!
//! On the receive side the same three layers run mirrored: the wire content
//! is gathered into reverse-item order (grouped by destination root), which
//! is what makes [`Distribution::exch_reduce`] a contiguous-run fold.
//!
//! Construction is collective: every rank of the communicator must build the
//! same distribution in the same order.

use std::sync::Arc;

use bytemuck::Pod;

use crate::arrays;
use crate::comm::communicator::{CommOp, CommValue, Communicator, bytes_to_vec, check_ranks};
use crate::exchange::remotes::Remote;
use crate::mesh_error::MeshWeaveError;
use crate::types::{Lo, Rank};

const FWD: usize = 0;
const REV: usize = 1;

/// A bidirectional communication plan between items and roots.
pub struct Distribution<C: Communicator> {
    parent: Arc<C>,
    comms: [Option<Arc<C>>; 2],
    nitems: [usize; 2],
    roots2items: [Option<Arc<[Lo]>>; 2],
    items2content: [Option<Arc<[Lo]>>; 2],
    msgs2content: [Option<Arc<[Lo]>>; 2],
    msgs2ranks: [Option<Arc<[Rank]>>; 2],
    items2dest_idxs: [Option<Arc<[Lo]>>; 2],
}

impl<C: Communicator> std::fmt::Debug for Distribution<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Distribution")
            .field("nitems", &self.nitems[FWD])
            .field("nroots", &self.nroots())
            .field("ndests", &self.ndests())
            .field("msgs2ranks", &self.msgs2ranks[FWD].as_deref())
            .finish_non_exhaustive()
    }
}

impl<C: Communicator> Clone for Distribution<C> {
    fn clone(&self) -> Self {
        Self {
            parent: Arc::clone(&self.parent),
            comms: self.comms.clone(),
            nitems: self.nitems,
            roots2items: self.roots2items.clone(),
            items2content: self.items2content.clone(),
            msgs2content: self.msgs2content.clone(),
            msgs2ranks: self.msgs2ranks.clone(),
            items2dest_idxs: self.items2dest_idxs.clone(),
        }
    }
}

impl<C: Communicator> Distribution<C> {
    /// An empty plan on `comm`; stage it with [`Self::set_dest_ranks`] and
    /// optionally [`Self::set_dest_idxs`] / [`Self::set_roots2items`].
    pub fn new(comm: Arc<C>) -> Self {
        Self {
            parent: comm,
            comms: [None, None],
            nitems: [0, 0],
            roots2items: [None, None],
            items2content: [None, None],
            msgs2content: [None, None],
            msgs2ranks: [None, None],
            items2dest_idxs: [None, None],
        }
    }

    /// Full plan from per-item remote addresses: each item's record lands at
    /// `dests[i].index` on rank `dests[i].rank`, where the destination rank
    /// holds `nroots` roots.
    pub fn from_remotes(
        comm: Arc<C>,
        dests: &[Remote],
        nroots: usize,
    ) -> Result<Self, MeshWeaveError> {
        let (ranks, idxs) = Remote::unzip(dests);
        let mut dist = Self::new(comm);
        dist.set_dest_ranks(&ranks)?;
        dist.set_dest_idxs(&idxs, nroots)?;
        Ok(dist)
    }

    /// Stage 1: route each item to a destination rank. Collective; discovers
    /// the source-rank set and exchanges per-message record counts.
    pub fn set_dest_ranks(&mut self, ranks: &[Rank]) -> Result<(), MeshWeaveError> {
        check_ranks(ranks, self.parent.size())?;
        let nitems = ranks.len();

        let mut dst_ranks: Vec<Rank> = ranks.to_vec();
        dst_ranks.sort_unstable();
        dst_ranks.dedup();
        let nmsgs = dst_ranks.len();
        let msg_of = |r: Rank| dst_ranks.binary_search(&r).expect("rank seen above");

        let mut counts = vec![0 as Lo; nmsgs];
        for &r in ranks {
            counts[msg_of(r)] += 1;
        }
        let msgs2content_f = arrays::exclusive_scan(&counts);
        let mut fill = msgs2content_f[..nmsgs].to_vec();
        let mut items2content_f = vec![0 as Lo; nitems];
        for (i, &r) in ranks.iter().enumerate() {
            let m = msg_of(r);
            items2content_f[i] = fill[m];
            fill[m] += 1;
        }

        let comm_f = Arc::new(self.parent.graph(&dst_ranks)?);
        let comm_r = Arc::new(comm_f.graph_inverse()?);
        let src_ranks: Vec<Rank> = comm_f.sources().to_vec();

        // one count per outgoing message; received counts shape the reverse
        // content buffer
        let sends: Vec<Vec<u8>> = counts
            .iter()
            .map(|c| bytemuck::bytes_of(c).to_vec())
            .collect();
        let recvd = comm_f.neighbor_alltoallv_bytes(sends);
        let recv_counts: Vec<Lo> = recvd
            .iter()
            .map(|b| bytemuck::pod_read_unaligned(b))
            .collect();
        let msgs2content_r = arrays::exclusive_scan(&recv_counts);
        let nitems_r = *msgs2content_r.last().unwrap() as usize;

        log::debug!(
            "distribution plan: {} items in {} messages out, {} records in {} messages back",
            nitems,
            nmsgs,
            nitems_r,
            src_ranks.len(),
        );

        self.comms = [Some(comm_f), Some(comm_r)];
        self.nitems = [nitems, nitems_r];
        self.items2content[FWD] = Some(items2content_f.into());
        self.msgs2content = [Some(msgs2content_f.into()), Some(msgs2content_r.into())];
        self.msgs2ranks = [Some(dst_ranks.into()), Some(src_ranks.into())];
        Ok(())
    }

    /// Stage 2: pin each item to a root index on its destination rank, so
    /// receives arrive grouped by root and reductions become possible.
    /// Collective.
    pub fn set_dest_idxs(&mut self, idxs: &[Lo], nroots: usize) -> Result<(), MeshWeaveError> {
        arrays::check_len(idxs, self.nitems[FWD], 1, "destination index list")?;
        let content2roots = self.exch_items(idxs, 1)?;
        for &root in &content2roots {
            if root as usize >= nroots {
                return Err(MeshWeaveError::MalformedRemote {
                    rank: self.parent.rank(),
                    index: root,
                    nroots: nroots as Lo,
                });
            }
        }
        let (offsets, content_pos) = arrays::invert_map(&content2roots, nroots);
        log::debug!(
            "distribution plan: {} received records over {} roots",
            content_pos.len(),
            nroots,
        );
        self.roots2items[REV] = Some(offsets.into());
        self.items2content[REV] = Some(content_pos.into());
        self.items2dest_idxs[FWD] = Some(idxs.to_vec().into());
        Ok(())
    }

    /// Stage 3 (optional): fan one root's record out to several items before
    /// sending. `offsets` are CSR offsets from roots to items. Local.
    pub fn set_roots2items(&mut self, offsets: Vec<Lo>) -> Result<(), MeshWeaveError> {
        let nitems = *offsets.last().ok_or(MeshWeaveError::PatternNotReady(
            "fan-out offsets must be non-empty",
        ))? as usize;
        if self.comms[FWD].is_some() && nitems != self.nitems[FWD] {
            return Err(MeshWeaveError::SizeMismatch {
                context: "fan-out offsets",
                expected: self.nitems[FWD],
                got: nitems,
            });
        }
        self.roots2items[FWD] = Some(offsets.into());
        Ok(())
    }

    /// Number of local items (forward send side).
    pub fn nitems(&self) -> usize {
        self.nitems[FWD]
    }

    /// Number of local roots on the forward send side.
    pub fn nroots(&self) -> usize {
        match &self.roots2items[FWD] {
            Some(r2i) => r2i.len() - 1,
            None => self.nitems[FWD],
        }
    }

    /// Number of local roots on the receive side.
    pub fn ndests(&self) -> usize {
        match &self.roots2items[REV] {
            Some(r2i) => r2i.len() - 1,
            None => self.nitems[REV],
        }
    }

    /// Number of ranks this rank receives from.
    pub fn nsrcs(&self) -> usize {
        self.msgs2ranks[REV].as_ref().map_or(0, |m| m.len())
    }

    /// Destination rank of each outgoing message, ascending.
    pub fn msgs2ranks(&self) -> Result<&[Rank], MeshWeaveError> {
        self.msgs2ranks[FWD]
            .as_deref()
            .ok_or(MeshWeaveError::PatternNotReady(
                "destination ranks have not been set",
            ))
    }

    /// Outgoing message index of each item.
    pub fn items2msgs(&self) -> Result<Vec<Lo>, MeshWeaveError> {
        let m2c = self.msgs2content[FWD]
            .as_deref()
            .ok_or(MeshWeaveError::PatternNotReady(
                "destination ranks have not been set",
            ))?;
        let pos_of = |item: usize| match &self.items2content[FWD] {
            Some(i2c) => i2c[item],
            None => item as Lo,
        };
        Ok((0..self.nitems[FWD])
            .map(|i| {
                let pos = pos_of(i);
                (m2c.partition_point(|&off| off <= pos) - 1) as Lo
            })
            .collect())
    }

    /// Destination rank of each item.
    pub fn items2ranks(&self) -> Result<Vec<Rank>, MeshWeaveError> {
        let m2r = self.msgs2ranks()?;
        Ok(self.items2msgs()?.iter().map(|&m| m2r[m as usize]).collect())
    }

    /// Destination root index of each item, as given to
    /// [`Self::set_dest_idxs`].
    pub fn items2dest_idxs(&self) -> Result<&[Lo], MeshWeaveError> {
        self.items2dest_idxs[FWD]
            .as_deref()
            .ok_or(MeshWeaveError::PatternNotReady(
                "destination indices have not been set",
            ))
    }

    /// Full destination address of each item.
    pub fn items2dests(&self) -> Result<Vec<Remote>, MeshWeaveError> {
        let ranks = self.items2ranks()?;
        let idxs = self.items2dest_idxs()?;
        Ok(ranks
            .iter()
            .zip(idxs)
            .map(|(&r, &i)| Remote::new(r, i))
            .collect())
    }

    /// The communicator this plan was built on.
    pub fn parent_comm(&self) -> &Arc<C> {
        &self.parent
    }

    /// The forward graph communicator (destinations = ranks sent to).
    pub fn comm(&self) -> Result<&Arc<C>, MeshWeaveError> {
        self.comms[FWD].as_ref().ok_or(MeshWeaveError::PatternNotReady(
            "destination ranks have not been set",
        ))
    }

    /// Fan-out offsets from forward roots to items, if staged.
    pub fn roots2items(&self) -> Option<&[Lo]> {
        self.roots2items[FWD].as_deref()
    }

    /// Per-message record offsets into the packed forward send buffer.
    pub fn msgs2content(&self) -> Result<&[Lo], MeshWeaveError> {
        self.msgs2content[FWD]
            .as_deref()
            .ok_or(MeshWeaveError::PatternNotReady(
                "destination ranks have not been set",
            ))
    }

    /// The reverse plan. Pure pointer swaps; no communication.
    pub fn invert(&self) -> Self {
        let swap = |pair: &[Option<Arc<[Lo]>>; 2]| [pair[REV].clone(), pair[FWD].clone()];
        Self {
            parent: Arc::clone(&self.parent),
            comms: [self.comms[REV].clone(), self.comms[FWD].clone()],
            nitems: [self.nitems[REV], self.nitems[FWD]],
            roots2items: swap(&self.roots2items),
            items2content: swap(&self.items2content),
            msgs2content: swap(&self.msgs2content),
            msgs2ranks: [self.msgs2ranks[REV].clone(), self.msgs2ranks[FWD].clone()],
            items2dest_idxs: swap(&self.items2dest_idxs),
        }
    }

    /// The same plan rebuilt over `new_comm` (same size and rank layout);
    /// no pattern discovery is repeated.
    pub fn change_comm(&self, new_comm: Arc<C>) -> Result<Self, MeshWeaveError> {
        let old_f = self.comms[FWD].as_ref().ok_or(MeshWeaveError::PatternNotReady(
            "destination ranks have not been set",
        ))?;
        let comm_f = Arc::new(new_comm.graph_adjacent(old_f.sources(), old_f.destinations())?);
        let comm_r = Arc::new(comm_f.graph_inverse()?);
        let mut out = self.clone();
        out.parent = new_comm;
        out.comms = [Some(comm_f), Some(comm_r)];
        Ok(out)
    }

    /// Route `width`-value records along the plan.
    ///
    /// Input is one record per root if fan-out offsets were staged, otherwise
    /// one per item; output is one record per reverse item (grouped by
    /// destination root when indices were staged, else in wire order).
    /// Collective.
    pub fn exch<T: Pod>(&self, data: &[T], width: usize) -> Result<Vec<T>, MeshWeaveError> {
        let item_data: Vec<T> = match &self.roots2items[FWD] {
            Some(r2i) => {
                arrays::check_len(data, r2i.len() - 1, width, "exchange send records")?;
                arrays::expand(data, r2i, width)
            }
            None => {
                arrays::check_len(data, self.nitems[FWD], width, "exchange send records")?;
                data.to_vec()
            }
        };
        self.exch_items(&item_data, width)
    }

    /// Route per-item records, then fold the records of each destination root
    /// under `op`. Roots that receive nothing get the identity of `op`.
    /// Collective.
    pub fn exch_reduce<T: CommValue>(
        &self,
        data: &[T],
        width: usize,
        op: CommOp,
    ) -> Result<Vec<T>, MeshWeaveError> {
        let r2i = self.roots2items[REV]
            .clone()
            .ok_or(MeshWeaveError::PatternNotReady(
                "reduction requires destination indices",
            ))?;
        let recvd = self.exch(data, width)?;
        let nroots = r2i.len() - 1;
        let mut out = vec![T::identity(op); nroots * width];
        for root in 0..nroots {
            for item in r2i[root] as usize..r2i[root + 1] as usize {
                for c in 0..width {
                    out[root * width + c] =
                        T::combine(op, out[root * width + c], recvd[item * width + c]);
                }
            }
        }
        Ok(out)
    }

    /// The wire leg shared by [`Self::exch`] and plan construction: pack,
    /// neighbor exchange, unpack. Skips root fan-out on purpose.
    fn exch_items<T: Pod>(&self, item_data: &[T], width: usize) -> Result<Vec<T>, MeshWeaveError> {
        let comm_f = self.comms[FWD].as_ref().ok_or(MeshWeaveError::PatternNotReady(
            "destination ranks have not been set",
        ))?;
        let m2c_f = self.msgs2content[FWD].as_deref().unwrap();
        let m2c_r = self.msgs2content[REV].as_deref().unwrap();

        let content: Vec<T> = match &self.items2content[FWD] {
            Some(i2c) => {
                let mut packed = vec![T::zeroed(); item_data.len()];
                for (i, &pos) in i2c.iter().enumerate() {
                    let pos = pos as usize;
                    packed[pos * width..(pos + 1) * width]
                        .copy_from_slice(&item_data[i * width..(i + 1) * width]);
                }
                packed
            }
            None => item_data.to_vec(),
        };

        let sends: Vec<Vec<u8>> = (0..m2c_f.len() - 1)
            .map(|m| {
                let begin = m2c_f[m] as usize * width;
                let end = m2c_f[m + 1] as usize * width;
                bytemuck::cast_slice(&content[begin..end]).to_vec()
            })
            .collect();
        let recvd = comm_f.neighbor_alltoallv_bytes(sends);

        let mut rcontent: Vec<T> = Vec::with_capacity(self.nitems[REV] * width);
        for (m, blob) in recvd.iter().enumerate() {
            let vals = bytes_to_vec::<T>(blob);
            let expect = (m2c_r[m + 1] - m2c_r[m]) as usize * width;
            if vals.len() != expect {
                return Err(MeshWeaveError::SizeMismatch {
                    context: "exchange receive message",
                    expected: expect,
                    got: vals.len(),
                });
            }
            rcontent.extend(vals);
        }

        match &self.items2content[REV] {
            Some(i2c) => Ok(arrays::gather(&rcontent, i2c, width)),
            None => Ok(rcontent),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::communicator::SerialComm;
    use crate::comm::thread_comm::ThreadComm;

    fn on_ranks<T, F>(n: usize, f: F) -> Vec<T>
    where
        T: Send + 'static,
        F: Fn(ThreadComm) -> T + Send + Sync + Copy + 'static,
    {
        let comms = ThreadComm::group(n);
        let handles: Vec<_> = comms
            .into_iter()
            .map(|c| std::thread::spawn(move || f(c)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    /// Item addresses for a fixed two-rank scenario: rank 0 has three items
    /// addressed (0,0), (1,0), (1,1); rank 1 has two addressed (1,0), (0,1).
    /// Both ranks hold two roots.
    fn two_rank_dist(comm: ThreadComm) -> Distribution<ThreadComm> {
        let dests = if comm.rank() == 0 {
            vec![Remote::new(0, 0), Remote::new(1, 0), Remote::new(1, 1)]
        } else {
            vec![Remote::new(1, 0), Remote::new(0, 1)]
        };
        Distribution::from_remotes(Arc::new(comm), &dests, 2).unwrap()
    }

    #[test]
    fn serial_permutation_roundtrip() {
        let comm = Arc::new(SerialComm::world());
        let dests = vec![Remote::new(0, 2), Remote::new(0, 0), Remote::new(0, 1)];
        let dist = Distribution::from_remotes(comm, &dests, 3).unwrap();
        assert_eq!(dist.nitems(), 3);
        assert_eq!(dist.ndests(), 3);
        let out = dist.exch(&[20i64, 0, 10], 1).unwrap();
        assert_eq!(out, vec![0, 10, 20]);
        // width 2 records move atomically
        let out = dist.exch(&[20i64, 21, 0, 1, 10, 11], 2).unwrap();
        assert_eq!(out, vec![0, 1, 10, 11, 20, 21]);
    }

    #[test]
    fn two_rank_exchange_groups_by_root() {
        let out = on_ranks(2, |c| {
            let rank = c.rank();
            let dist = two_rank_dist(c);
            let data: Vec<i64> = if rank == 0 {
                vec![100, 101, 102]
            } else {
                vec![110, 111]
            };
            dist.exch(&data, 1).unwrap()
        });
        assert_eq!(out[0], vec![100, 111]);
        // rank 1's root 0 receives from both ranks, lowest source rank first
        assert_eq!(out[1], vec![101, 110, 102]);
    }

    #[test]
    fn two_rank_reduce_folds_per_root() {
        let out = on_ranks(2, |c| {
            let rank = c.rank();
            let dist = two_rank_dist(c);
            let data: Vec<i64> = if rank == 0 {
                vec![100, 101, 102]
            } else {
                vec![110, 111]
            };
            dist.exch_reduce(&data, 1, CommOp::Sum).unwrap()
        });
        assert_eq!(out[0], vec![100, 111]);
        assert_eq!(out[1], vec![211, 102]);
    }

    #[test]
    fn inverted_plan_fetches_root_records() {
        let out = on_ranks(2, |c| {
            let rank = c.rank();
            let dist = two_rank_dist(c);
            let roots: Vec<i64> = if rank == 0 { vec![5, 6] } else { vec![7, 8] };
            dist.invert().exch(&roots, 1).unwrap()
        });
        // each item receives the record of the root it addresses
        assert_eq!(out[0], vec![5, 7, 8]);
        assert_eq!(out[1], vec![7, 6]);
    }

    #[test]
    fn accessors_recover_the_addresses() {
        let out = on_ranks(2, |c| {
            let rank = c.rank();
            let dist = two_rank_dist(c);
            (rank, dist.items2dests().unwrap(), dist.nsrcs())
        });
        assert_eq!(
            out[0].1,
            vec![Remote::new(0, 0), Remote::new(1, 0), Remote::new(1, 1)]
        );
        assert_eq!(out[1].1, vec![Remote::new(1, 0), Remote::new(0, 1)]);
        assert_eq!(out[0].2, 2);
        assert_eq!(out[1].2, 2);
    }

    #[test]
    fn nsrcs_counts_ranks_sending_here() {
        let out = on_ranks(2, |c| {
            let rank = c.rank();
            // rank 1 addresses one item at rank 0; rank 0 sends nothing
            let dests = if rank == 1 {
                vec![Remote::new(0, 0)]
            } else {
                vec![]
            };
            let dist = Distribution::from_remotes(Arc::new(c), &dests, 1).unwrap();
            (dist.nsrcs(), dist.msgs2ranks().unwrap().len())
        });
        // rank 0 receives from one rank and sends to none; rank 1 the reverse
        assert_eq!(out[0], (1, 0));
        assert_eq!(out[1], (0, 1));
    }

    #[test]
    fn change_comm_rebuilds_over_a_duplicate() {
        let out = on_ranks(2, |c| {
            let rank = c.rank();
            let dist = two_rank_dist(c);
            let fresh = Arc::new(dist.parent_comm().dup());
            let dist = dist.change_comm(fresh).unwrap();
            let data: Vec<i64> = if rank == 0 {
                vec![100, 101, 102]
            } else {
                vec![110, 111]
            };
            dist.exch(&data, 1).unwrap()
        });
        assert_eq!(out[0], vec![100, 111]);
        assert_eq!(out[1], vec![101, 110, 102]);
    }

    #[test]
    fn plan_debug_shows_the_shape() {
        let comm = Arc::new(SerialComm::world());
        let dist = Distribution::from_remotes(comm, &[Remote::new(0, 0)], 1).unwrap();
        let s = format!("{dist:?}");
        assert!(s.contains("nitems: 1"));
        assert!(s.contains("msgs2ranks: Some([0])"));
    }

    #[test]
    fn fan_out_expands_roots_before_sending() {
        let comm = Arc::new(SerialComm::world());
        let mut dist = Distribution::new(comm);
        // two roots fan out to three items, all landing locally
        dist.set_dest_ranks(&[0, 0, 0]).unwrap();
        dist.set_dest_idxs(&[2, 0, 1], 3).unwrap();
        dist.set_roots2items(vec![0, 2, 3]).unwrap();
        let out = dist.exch(&[40i32, 50], 1).unwrap();
        assert_eq!(out, vec![40, 50, 40]);
        assert_eq!(dist.nroots(), 2);
    }

    #[test]
    fn malformed_destination_index_is_rejected() {
        let comm = Arc::new(SerialComm::world());
        let err = Distribution::from_remotes(comm, &[Remote::new(0, 7)], 3).unwrap_err();
        assert!(matches!(
            err,
            MeshWeaveError::MalformedRemote { index: 7, nroots: 3, .. }
        ));
    }

    #[test]
    fn reduce_without_indices_is_not_ready() {
        let comm = Arc::new(SerialComm::world());
        let mut dist = Distribution::new(comm);
        dist.set_dest_ranks(&[0]).unwrap();
        let err = dist.exch_reduce(&[1i64], 1, CommOp::Sum).unwrap_err();
        assert!(matches!(err, MeshWeaveError::PatternNotReady(_)));
    }
}
