//! Copy planning: which regions each patch exchanges with which neighbour.
//!
//! For every destination patch `d` and every other patch `s`, the cells of
//! `d`'s grown box that lie in `s`'s valid box are one copy. Copies are
//! numbered per source (send slot) and per destination (receive slot); those
//! numbers become descriptor indices in the patches' connections and double
//! as partner links.

use crate::geometry::{IndexBox, IntVect};
use crate::halo_error::HaloError;
use crate::layout::{BoxLayout, check_disjoint};
use crate::sync::{ConnectionConfig, CopyDescriptor, Direction, LocalConnection};

/// One planned copy between two patches.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PlannedCopy {
    pub src: usize,
    pub dst: usize,
    pub region: IndexBox,
    /// Index among the sends of `src`.
    pub send_slot: usize,
    /// Index among the receives of `dst`.
    pub recv_slot: usize,
}

#[derive(Clone, Debug, Default)]
pub struct CopyPlan {
    copies: Vec<PlannedCopy>,
    sends: Vec<Vec<usize>>,
    recvs: Vec<Vec<usize>>,
    n_comp: usize,
}

impl CopyPlan {
    /// Plan the ghost fill of every patch of `layout` for `n_grow` ghost
    /// cells per axis and `n_comp` components.
    pub fn build<L>(layout: &L, n_grow: IntVect, n_comp: usize) -> Result<Self, HaloError>
    where
        L: BoxLayout + ?Sized,
    {
        if n_grow.iter().any(|&g| g < 0) {
            return Err(HaloError::InvalidConfig(format!(
                "ghost width must be non-negative, got {n_grow:?}"
            )));
        }
        if n_comp == 0 {
            return Err(HaloError::InvalidConfig("n_comp must be positive".into()));
        }
        let n = layout.len();
        let boxes = (0..n)
            .map(|i| layout.try_patch_box(i))
            .collect::<Result<Vec<_>, _>>()?;
        // overlapping valid boxes would plan copies into valid cells
        check_disjoint(&boxes)?;

        let mut plan = CopyPlan {
            copies: Vec::new(),
            sends: vec![Vec::new(); n],
            recvs: vec![Vec::new(); n],
            n_comp,
        };
        for (dst, dst_box) in boxes.iter().enumerate() {
            let grown = dst_box.grow_by(n_grow);
            for (src, src_box) in boxes.iter().enumerate() {
                if src == dst {
                    continue;
                }
                let region = grown.intersect(src_box);
                if region.is_empty() {
                    continue;
                }
                let id = plan.copies.len();
                plan.copies.push(PlannedCopy {
                    src,
                    dst,
                    region,
                    send_slot: plan.sends[src].len(),
                    recv_slot: plan.recvs[dst].len(),
                });
                plan.sends[src].push(id);
                plan.recvs[dst].push(id);
            }
        }
        log::debug!(
            "copy plan: {} patches, {} copies, ghost width {:?}",
            n,
            plan.copies.len(),
            n_grow
        );
        Ok(plan)
    }

    pub fn copies(&self) -> &[PlannedCopy] {
        &self.copies
    }

    pub fn num_patches(&self) -> usize {
        self.sends.len()
    }

    pub fn n_comp(&self) -> usize {
        self.n_comp
    }

    /// Copies sourced from `patch`, in send-slot order.
    pub fn sends_of(&self, patch: usize) -> impl Iterator<Item = &PlannedCopy> + '_ {
        self.sends
            .get(patch)
            .into_iter()
            .flatten()
            .map(|&id| &self.copies[id])
    }

    /// Copies filling the ghosts of `patch`, in receive-slot order.
    pub fn recvs_of(&self, patch: usize) -> impl Iterator<Item = &PlannedCopy> + '_ {
        self.recvs
            .get(patch)
            .into_iter()
            .flatten()
            .map(|&id| &self.copies[id])
    }

    fn descriptor(&self, c: &PlannedCopy) -> Result<CopyDescriptor, HaloError> {
        Ok(
            CopyDescriptor::new(Some(c.src), Some(c.dst), c.region, c.region, self.n_comp)?
                .with_partners(Some(c.send_slot), Some(c.recv_slot)),
        )
    }

    /// Build the (not yet activated) connection of `patch`: its sends on the
    /// send side, its ghost fills on the receive side.
    pub fn connection_for(
        &self,
        patch: usize,
        cfg: &ConnectionConfig,
    ) -> Result<LocalConnection, HaloError> {
        if patch >= self.num_patches() {
            return Err(HaloError::UnknownPatch {
                patch,
                len: self.num_patches(),
            });
        }
        let conn = LocalConnection::from_config(cfg)?;
        for c in self.sends_of(patch) {
            conn.add_copy(Direction::Send, self.descriptor(c)?)?;
        }
        for c in self.recvs_of(patch) {
            conn.add_copy(Direction::Receive, self.descriptor(c)?)?;
        }
        Ok(conn)
    }
}
