//! Same-process ghost fill driven by per-patch local connections.
//!
//! Every patch gets one [`LocalConnection`]: its outgoing copies on the send
//! side, the copies that fill its ghost cells on the receive side. A worker
//! thread that owns some patches calls [`HaloExchange::fill_boundary`] once
//! per epoch:
//!
//! 1. pack each outgoing region, deliver it into the partner's receive
//!    descriptor (using the partner's recycled buffer), then complete the send;
//! 2. poll the owned connections, draining each one as soon as its firing
//!    rule opens and unpacking received regions into ghost cells;
//! 3. meet the other workers at the epoch barrier, where the last arrival
//!    resets every connection before anybody may start the next epoch.
//!
//! Readiness is discovered by each worker on its own connections; no thread
//! schedules the others.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::algs::copy_plan::CopyPlan;
use crate::data::fab::Fab;
use crate::geometry::{IndexBox, IntVect};
use crate::halo_error::HaloError;
use crate::layout::BoxLayout;
use crate::sync::{
    CohortBarrier, ConnectionConfig, Direction, Fire, FiringRule, LocalConnection,
};

/// Parameters of a halo exchange.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct HaloConfig {
    /// Ghost cells per axis.
    pub n_grow: IntVect,
    /// Components per cell.
    pub n_comp: usize,
    /// Worker threads calling `fill_boundary` each epoch.
    pub workers: usize,
    pub firing_rule: FiringRule,
    /// Give up on an epoch whose inputs have not all landed by then.
    pub epoch_deadline: Option<Duration>,
}

impl Default for HaloConfig {
    fn default() -> Self {
        Self {
            n_grow: [1, 1, 1],
            n_comp: 1,
            workers: 1,
            firing_rule: FiringRule::All,
            epoch_deadline: None,
        }
    }
}

impl HaloConfig {
    pub fn validate(&self) -> Result<(), HaloError> {
        if self.n_comp == 0 {
            return Err(HaloError::InvalidConfig("n_comp must be positive".into()));
        }
        if self.workers == 0 {
            return Err(HaloError::InvalidConfig("workers must be positive".into()));
        }
        if !self.firing_rule.gates(Direction::Receive) {
            // ghost data would be unpacked before it has all landed
            return Err(HaloError::InvalidConfig(format!(
                "firing rule {:?} does not wait for receives",
                self.firing_rule
            )));
        }
        if self.n_grow.iter().any(|&g| g < 0) {
            return Err(HaloError::InvalidConfig(format!(
                "ghost width must be non-negative, got {:?}",
                self.n_grow
            )));
        }
        Ok(())
    }
}

pub struct HaloExchange {
    config: HaloConfig,
    boxes: Vec<IndexBox>,
    plan: CopyPlan,
    connections: Vec<LocalConnection>,
    epoch_barrier: CohortBarrier,
    reset_result: Mutex<Option<Result<(), HaloError>>>,
    aborted: AtomicBool,
}

impl HaloExchange {
    /// Plan the copies of `layout`, build one connection per patch and
    /// activate them all.
    pub fn new<L>(layout: &L, config: HaloConfig) -> Result<Self, HaloError>
    where
        L: BoxLayout + ?Sized,
    {
        config.validate()?;
        let boxes = (0..layout.len())
            .map(|i| layout.try_patch_box(i))
            .collect::<Result<Vec<_>, _>>()?;
        let plan = CopyPlan::build(layout, config.n_grow, config.n_comp)?;
        let conn_cfg = ConnectionConfig {
            firing_rule: config.firing_rule,
            barrier_participants: None,
        };
        let connections = (0..boxes.len())
            .map(|p| {
                let c = plan.connection_for(p, &conn_cfg)?;
                c.activate()?;
                Ok(c)
            })
            .collect::<Result<Vec<_>, HaloError>>()?;
        log::debug!(
            "halo exchange ready: {} patches, {} copies, {} workers",
            boxes.len(),
            plan.copies().len(),
            config.workers
        );
        Ok(Self {
            epoch_barrier: CohortBarrier::new(config.workers)?,
            config,
            boxes,
            plan,
            connections,
            reset_result: Mutex::new(None),
            aborted: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &HaloConfig {
        &self.config
    }

    pub fn plan(&self) -> &CopyPlan {
        &self.plan
    }

    pub fn num_patches(&self) -> usize {
        self.boxes.len()
    }

    pub fn connection(&self, patch: usize) -> Result<&LocalConnection, HaloError> {
        self.connections.get(patch).ok_or(HaloError::UnknownPatch {
            patch,
            len: self.boxes.len(),
        })
    }

    /// Zeroed cell data shaped for `patch`.
    pub fn make_fab(&self, patch: usize) -> Result<Fab, HaloError> {
        let valid = *self.boxes.get(patch).ok_or(HaloError::UnknownPatch {
            patch,
            len: self.boxes.len(),
        })?;
        Ok(Fab::new(valid, self.config.n_grow, self.config.n_comp))
    }

    fn check_fab(&self, patch: usize, fab: &Fab) -> Result<(), HaloError> {
        let expect = self.make_fab_shape(patch)?;
        if fab.grown_box() != expect || fab.n_comp() != self.config.n_comp {
            return Err(HaloError::RegionOutOfBounds {
                region: expect,
                storage: fab.grown_box(),
            });
        }
        Ok(())
    }

    fn make_fab_shape(&self, patch: usize) -> Result<IndexBox, HaloError> {
        self.boxes
            .get(patch)
            .map(|b| b.grow_by(self.config.n_grow))
            .ok_or(HaloError::UnknownPatch {
                patch,
                len: self.boxes.len(),
            })
    }

    /// Pack and deliver every outgoing copy of `patch`.
    pub fn send(&self, patch: usize, fab: &Fab) -> Result<(), HaloError> {
        self.check_fab(patch, fab)?;
        let conn = self.connection(patch)?;
        for (slot, desc) in conn.descriptors(Direction::Send).iter().enumerate() {
            let mut pkg = desc.acquire_package();
            fab.pack(&desc.sbx(), pkg.payload_mut())?;

            let (dst, recv_slot) = desc.nd().zip(desc.d_partner()).ok_or_else(|| {
                HaloError::InvariantViolation(format!(
                    "send {slot} of patch {patch} has no receiving partner"
                ))
            })?;
            let partner = self.connection(dst)?;
            let mut incoming = partner.acquire_package(Direction::Receive, recv_slot)?;
            incoming.payload_mut().copy_from_slice(pkg.payload());
            partner.complete_receive(recv_slot, incoming)?;
            conn.complete_send(slot, pkg)?;
        }
        Ok(())
    }

    /// If the connection of `patch` has fired, unpack its ghost data into
    /// `fab`, recycle the packages and return `true`.
    pub fn try_fill(&self, patch: usize, fab: &mut Fab) -> Result<bool, HaloError> {
        self.check_fab(patch, fab)?;
        let conn = self.connection(patch)?;
        match conn.try_fire() {
            Fire::Pending => Ok(false),
            Fire::Fired => Err(HaloError::AlreadyDrained),
            Fire::Ready => {
                conn.consume(|dir, desc, pkg| match dir {
                    Direction::Receive => fab.unpack(&desc.dbx(), pkg.payload()),
                    Direction::Send => Ok(()),
                })?;
                Ok(true)
            }
        }
    }

    /// Run one epoch of ghost exchange for the patches this worker owns.
    ///
    /// Every one of `config.workers` workers must call this once per epoch,
    /// with disjoint sets of patches. A failure on any worker aborts the epoch
    /// for all of them and leaves the exchange unusable; rebuild it.
    pub fn fill_boundary(&self, owned: &mut [(usize, &mut Fab)]) -> Result<(), HaloError> {
        if self.aborted.load(Ordering::Acquire) {
            return Err(HaloError::EpochAborted);
        }
        let local = self.run_epoch(owned);
        if let Err(e) = &local {
            log::warn!("halo epoch failed on this worker: {e}");
            self.aborted.store(true, Ordering::Release);
        }

        if self.epoch_barrier.wait().is_leader() {
            let res = if self.aborted.load(Ordering::Acquire) {
                Err(HaloError::EpochAborted)
            } else {
                self.connections
                    .iter()
                    .try_for_each(LocalConnection::reset_for_next_epoch)
            };
            *self.reset_result.lock() = Some(res);
        }
        self.epoch_barrier.wait();

        local?;
        self.reset_result.lock().clone().unwrap_or(Ok(()))
    }

    fn run_epoch(&self, owned: &mut [(usize, &mut Fab)]) -> Result<(), HaloError> {
        for (patch, fab) in owned.iter() {
            self.send(*patch, fab)?;
        }

        let deadline = self.config.epoch_deadline.map(|d| Instant::now() + d);
        let mut waiting: Vec<usize> = (0..owned.len()).collect();
        while !waiting.is_empty() {
            let mut still = Vec::with_capacity(waiting.len());
            for i in waiting {
                let (patch, fab) = &mut owned[i];
                if !self.try_fill(*patch, fab)? {
                    still.push(i);
                }
            }
            waiting = still;
            if waiting.is_empty() {
                break;
            }
            if self.aborted.load(Ordering::Acquire) {
                return Err(HaloError::EpochAborted);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                let patches: Vec<usize> = waiting.iter().map(|&i| owned[i].0).collect();
                for &p in &patches {
                    if let Ok(conn) = self.connection(p) {
                        log::warn!("patch {p} still waiting on {:?}", conn.pending());
                    }
                }
                return Err(HaloError::EpochDeadline { patches });
            }
            std::thread::yield_now();
        }
        Ok(())
    }
}
