//! `LocalConnection`: the firing rule over a set of copy descriptors.
//!
//! A connection owns the send-side descriptors (`scpy`) and receive-side
//! descriptors (`dcpy`) of one patch relationship. Each descriptor that
//! reaches its registered threshold bumps `firing_rule_cnt` exactly once; when
//! the count reaches the number of gating descriptors the connection becomes
//! fireable and its consumer may drain it.
//!
//! Per epoch:
//!
//! ```text
//! Idle -> Accumulating -> Fireable -> Drained -> (reset) -> Idle
//! ```
//!
//! `Building` precedes the first epoch; `Draining` is the short window in
//! which the consumer is emptying descriptor queues.
//!
//! Locks: `s_lock` and `d_lock` guard each side's descriptor list and
//! aggregate counter, `ghost_lock` guards the phase and the firing rule.
//! Descriptors are frozen into lock-free storage at activation, so looking one
//! up never requires a connection lock.

use std::fmt;
use std::sync::OnceLock;
use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard};
use static_assertions::assert_impl_all;

use crate::data::package::Package;
use crate::debug_invariants::DebugInvariants;
use crate::halo_error::HaloError;
use crate::sync::Direction;
use crate::sync::barrier::CohortBarrier;
use crate::sync::descriptor::CopyDescriptor;

/// Which descriptors gate the connection's firing rule.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum FiringRule {
    /// Every send and receive descriptor (`nscpy + ndcpy` inputs).
    #[default]
    All,
    /// Receive descriptors only: a pure consumer.
    ReceiveOnly,
    /// Send descriptors only: a pure producer waiting for its buffers.
    SendOnly,
}

impl FiringRule {
    /// Whether completions on `dir` count toward the gate.
    pub fn gates(self, dir: Direction) -> bool {
        match self {
            FiringRule::All => true,
            FiringRule::ReceiveOnly => dir == Direction::Receive,
            FiringRule::SendOnly => dir == Direction::Send,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ConnectionPhase {
    Building,
    Idle,
    Accumulating,
    Fireable,
    Draining,
    Drained,
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Result of [`LocalConnection::try_fire`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Fire {
    /// The gate is open and this caller is the one that claimed it.
    Ready,
    /// Inputs are still outstanding.
    Pending,
    /// The gate opened and was already claimed this epoch.
    Fired,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ConnectionConfig {
    pub firing_rule: FiringRule,
    /// Threads that must all call `activate`/`reset_for_next_epoch`. `None`
    /// means a single caller drives both.
    pub barrier_participants: Option<usize>,
}

/// Packages drained from one descriptor.
#[derive(Debug)]
pub struct DrainedCopy {
    pub direction: Direction,
    pub index: usize,
    pub packages: Vec<Package>,
}

/// A gating descriptor that has not reached its threshold.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PendingCopy {
    pub direction: Direction,
    pub index: usize,
    pub ns: Option<usize>,
    pub nd: Option<usize>,
    pub observed: usize,
    pub expected: usize,
}

/// Point-in-time view for diagnostics.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub phase: ConnectionPhase,
    pub epoch: u64,
    pub nscpy: usize,
    pub ndcpy: usize,
    pub scpy_cnt: usize,
    pub dcpy_cnt: usize,
    pub firing_rule_cnt: usize,
    pub firing_total: usize,
}

#[derive(Default)]
struct Side {
    building: Vec<CopyDescriptor>,
    completed: usize,
    sealed: bool,
}

struct GhostState {
    phase: ConnectionPhase,
    firing_rule_cnt: usize,
    firing_total: usize,
    claimed: bool,
    epoch: u64,
    phase_result: Option<Result<(), HaloError>>,
}

pub struct LocalConnection {
    firing_rule: FiringRule,
    scpy: OnceLock<Box<[CopyDescriptor]>>,
    dcpy: OnceLock<Box<[CopyDescriptor]>>,
    s_lock: Mutex<Side>,
    d_lock: Mutex<Side>,
    ghost_lock: Mutex<GhostState>,
    fired: Condvar,
    local_barrier: Option<CohortBarrier>,
}

assert_impl_all!(LocalConnection: Send, Sync);

impl Default for LocalConnection {
    fn default() -> Self {
        Self::with_rule(FiringRule::All)
    }
}

impl LocalConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(firing_rule: FiringRule) -> Self {
        Self {
            firing_rule,
            scpy: OnceLock::new(),
            dcpy: OnceLock::new(),
            s_lock: Mutex::new(Side::default()),
            d_lock: Mutex::new(Side::default()),
            ghost_lock: Mutex::new(GhostState {
                phase: ConnectionPhase::Building,
                firing_rule_cnt: 0,
                firing_total: 0,
                claimed: false,
                epoch: 0,
                phase_result: None,
            }),
            fired: Condvar::new(),
            local_barrier: None,
        }
    }

    pub fn from_config(cfg: &ConnectionConfig) -> Result<Self, HaloError> {
        let mut conn = Self::with_rule(cfg.firing_rule);
        if let Some(n) = cfg.barrier_participants {
            conn.local_barrier = Some(CohortBarrier::new(n)?);
        }
        Ok(conn)
    }

    pub fn firing_rule(&self) -> FiringRule {
        self.firing_rule
    }

    pub fn barrier(&self) -> Option<&CohortBarrier> {
        self.local_barrier.as_ref()
    }

    fn side_lock(&self, dir: Direction) -> MutexGuard<'_, Side> {
        match dir {
            Direction::Send => self.s_lock.lock(),
            Direction::Receive => self.d_lock.lock(),
        }
    }

    fn frozen(&self, dir: Direction) -> Option<&[CopyDescriptor]> {
        let cell = match dir {
            Direction::Send => &self.scpy,
            Direction::Receive => &self.dcpy,
        };
        cell.get().map(|b| &b[..])
    }

    // ------------------------------------------------------------------
    // construction
    // ------------------------------------------------------------------

    /// Append a descriptor to the send or receive side. Only valid before
    /// [`activate`](Self::activate). Returns the descriptor's index.
    pub fn add_copy(&self, dir: Direction, desc: CopyDescriptor) -> Result<usize, HaloError> {
        if desc.transfers_per_epoch() == 0 {
            return Err(HaloError::InvalidConfig(
                "a copy must expect at least one transfer per epoch".into(),
            ));
        }
        let mut side = self.side_lock(dir);
        if side.sealed {
            return Err(HaloError::ConnectionSealed { direction: dir });
        }
        if side.building.iter().any(|d| d.same_copy(&desc)) {
            return Err(HaloError::DuplicateDescriptor {
                direction: dir,
                ns: desc.ns(),
                nd: desc.nd(),
                region: desc.sbx(),
            });
        }
        side.building.push(desc);
        Ok(side.building.len() - 1)
    }

    /// Number of send-side descriptors.
    pub fn nscpy(&self) -> usize {
        self.side_len(Direction::Send)
    }

    /// Number of receive-side descriptors.
    pub fn ndcpy(&self) -> usize {
        self.side_len(Direction::Receive)
    }

    pub fn side_len(&self, dir: Direction) -> usize {
        match self.frozen(dir) {
            Some(d) => d.len(),
            None => self.side_lock(dir).building.len(),
        }
    }

    /// Seal both sides, register the first epoch and enter `Idle`.
    ///
    /// With a barrier, every participant calls this; the last to arrive does
    /// the work and nobody returns before it is done.
    pub fn activate(&self) -> Result<(), HaloError> {
        self.phase_sync(|| self.activate_now())
    }

    fn activate_now(&self) -> Result<(), HaloError> {
        let mut frozen = [Vec::new(), Vec::new()];
        for (slot, dir) in frozen.iter_mut().zip(Direction::BOTH) {
            let mut side = self.side_lock(dir);
            if side.sealed {
                return Err(HaloError::AlreadyActivated);
            }
            side.sealed = true;
            *slot = std::mem::take(&mut side.building);
        }
        let [scpy, dcpy] = frozen;
        for (descs, dir) in [(&scpy, Direction::Send), (&dcpy, Direction::Receive)] {
            for d in descs {
                d.register_transfer(dir, d.transfers_per_epoch())?;
            }
        }
        let total = self.gating_count(scpy.len(), dcpy.len());
        {
            let mut g = self.ghost_lock.lock();
            g.firing_total = total;
            g.firing_rule_cnt = 0;
            g.phase = if total == 0 {
                ConnectionPhase::Fireable
            } else {
                ConnectionPhase::Idle
            };
            log::debug!(
                "connection activated: nscpy={} ndcpy={} gate={total} rule={:?}",
                scpy.len(),
                dcpy.len(),
                self.firing_rule
            );
        }
        // only the caller that sealed the sides gets here
        let _ = self.scpy.set(scpy.into_boxed_slice());
        let _ = self.dcpy.set(dcpy.into_boxed_slice());
        self.fired.notify_all();
        Ok(())
    }

    fn gating_count(&self, nscpy: usize, ndcpy: usize) -> usize {
        match self.firing_rule {
            FiringRule::All => nscpy + ndcpy,
            FiringRule::ReceiveOnly => ndcpy,
            FiringRule::SendOnly => nscpy,
        }
    }

    /// Run `f` once per barrier generation and share its result.
    fn phase_sync<F>(&self, f: F) -> Result<(), HaloError>
    where
        F: FnOnce() -> Result<(), HaloError>,
    {
        let Some(barrier) = &self.local_barrier else {
            return f();
        };
        if barrier.wait().is_leader() {
            let res = f();
            self.ghost_lock.lock().phase_result = Some(res);
        }
        barrier.wait();
        self.ghost_lock
            .lock()
            .phase_result
            .clone()
            .unwrap_or(Ok(()))
    }

    // ------------------------------------------------------------------
    // descriptor access
    // ------------------------------------------------------------------

    /// Descriptor `index` on side `dir`. Requires an active connection.
    pub fn descriptor(&self, dir: Direction, index: usize) -> Result<&CopyDescriptor, HaloError> {
        let descs = self.frozen(dir).ok_or(HaloError::NotActive)?;
        descs.get(index).ok_or(HaloError::UnknownDescriptor {
            direction: dir,
            index,
            len: descs.len(),
        })
    }

    /// All descriptors on one side; empty before activation.
    pub fn descriptors(&self, dir: Direction) -> &[CopyDescriptor] {
        self.frozen(dir).unwrap_or(&[])
    }

    /// A buffer from the recycle queue of descriptor `index`.
    pub fn acquire_package(&self, dir: Direction, index: usize) -> Result<Package, HaloError> {
        Ok(self.descriptor(dir, index)?.acquire_package())
    }

    /// Return a consumed package to its descriptor's recycle queue.
    pub fn recycle(&self, dir: Direction, index: usize, pkg: Package) -> Result<(), HaloError> {
        self.descriptor(dir, index)?.recycle(pkg);
        Ok(())
    }

    // ------------------------------------------------------------------
    // completion and firing
    // ------------------------------------------------------------------

    /// Record a completed send on descriptor `index`. Returns whether that
    /// descriptor reached its threshold with this call.
    pub fn complete_send(&self, index: usize, pkg: Package) -> Result<bool, HaloError> {
        self.complete(Direction::Send, index, pkg)
    }

    /// Record a completed receive on descriptor `index`.
    pub fn complete_receive(&self, index: usize, pkg: Package) -> Result<bool, HaloError> {
        self.complete(Direction::Receive, index, pkg)
    }

    fn complete(&self, dir: Direction, index: usize, pkg: Package) -> Result<bool, HaloError> {
        let desc = self.descriptor(dir, index)?;
        let mut fold = Ok(());
        let reached = desc.complete_then(dir, pkg, |reached| {
            self.side_lock(dir).completed += 1;
            if reached {
                fold = self.on_descriptor_complete(dir).map(|_| ());
            }
        })?;
        fold?;
        Ok(reached)
    }

    /// Count one descriptor of side `dir` as complete. Called from the
    /// completion path while the descriptor lock is held; may also be driven
    /// directly by callers that manage descriptors themselves.
    ///
    /// Descriptors on a side that does not gate the firing rule move the
    /// connection out of `Idle` but are not counted.
    pub fn on_descriptor_complete(&self, dir: Direction) -> Result<ConnectionPhase, HaloError> {
        let mut g = self.ghost_lock.lock();
        match g.phase {
            ConnectionPhase::Building => return Err(HaloError::NotActive),
            ConnectionPhase::Idle | ConnectionPhase::Accumulating => {}
            _ if !self.firing_rule.gates(dir) => return Ok(g.phase),
            _ => {
                return Err(HaloError::FiringRuleOverflow {
                    count: g.firing_rule_cnt,
                    total: g.firing_total,
                });
            }
        }
        g.phase = ConnectionPhase::Accumulating;
        if !self.firing_rule.gates(dir) {
            return Ok(g.phase);
        }
        g.firing_rule_cnt += 1;
        if g.firing_rule_cnt == g.firing_total {
            g.phase = ConnectionPhase::Fireable;
            log::debug!(
                "connection fireable: epoch={} inputs={}",
                g.epoch,
                g.firing_total
            );
            self.fired.notify_all();
        }
        Ok(g.phase)
    }

    fn claim(g: &mut GhostState) -> Fire {
        match g.phase {
            ConnectionPhase::Fireable if !g.claimed => {
                g.claimed = true;
                Fire::Ready
            }
            ConnectionPhase::Fireable | ConnectionPhase::Draining | ConnectionPhase::Drained => {
                Fire::Fired
            }
            _ => Fire::Pending,
        }
    }

    fn is_waiting(phase: ConnectionPhase) -> bool {
        matches!(
            phase,
            ConnectionPhase::Building | ConnectionPhase::Idle | ConnectionPhase::Accumulating
        )
    }

    /// Non-blocking check. Returns [`Fire::Ready`] to exactly one caller per
    /// epoch.
    pub fn try_fire(&self) -> Fire {
        Self::claim(&mut self.ghost_lock.lock())
    }

    /// Block until the gate opens, then claim it.
    pub fn wait_for_fire(&self) -> Fire {
        let mut g = self.ghost_lock.lock();
        while Self::is_waiting(g.phase) {
            self.fired.wait(&mut g);
        }
        Self::claim(&mut g)
    }

    /// Like [`wait_for_fire`](Self::wait_for_fire) but gives up at the
    /// caller's `deadline`, returning [`Fire::Pending`].
    pub fn wait_for_fire_until(&self, deadline: Instant) -> Fire {
        let mut g = self.ghost_lock.lock();
        while Self::is_waiting(g.phase) {
            if self.fired.wait_until(&mut g, deadline).timed_out() {
                break;
            }
        }
        Self::claim(&mut g)
    }

    /// `true` while the gate is open and not yet drained.
    pub fn is_fireable(&self) -> bool {
        self.ghost_lock.lock().phase == ConnectionPhase::Fireable
    }

    // ------------------------------------------------------------------
    // drain and reset
    // ------------------------------------------------------------------

    /// Take every package of the epoch, send side first.
    ///
    /// Fails with [`HaloError::NotReady`] before the gate opens. Descriptors
    /// on a side that does not gate the rule are drained of whatever has
    /// landed; later completions on them are refused until the reset.
    ///
    /// If a gating descriptor refuses to drain (it was drained directly), the
    /// whole epoch is recycled, the connection still ends `Drained` so it can
    /// be reset, and the descriptor's error is returned.
    pub fn drain(&self) -> Result<Vec<DrainedCopy>, HaloError> {
        {
            let mut g = self.ghost_lock.lock();
            match g.phase {
                ConnectionPhase::Fireable => {
                    g.phase = ConnectionPhase::Draining;
                    g.claimed = true;
                }
                ConnectionPhase::Draining | ConnectionPhase::Drained => {
                    return Err(HaloError::AlreadyDrained);
                }
                ConnectionPhase::Building => return Err(HaloError::NotActive),
                ConnectionPhase::Idle | ConnectionPhase::Accumulating => {
                    return Err(HaloError::NotReady {
                        pending: g.firing_total - g.firing_rule_cnt,
                        total: g.firing_total,
                    });
                }
            }
        }

        let mut out = Vec::with_capacity(self.nscpy() + self.ndcpy());
        let mut first_err = None;
        for dir in Direction::BOTH {
            for (index, desc) in self.descriptors(dir).iter().enumerate() {
                let packages = if !self.firing_rule.gates(dir) {
                    desc.drain_available()
                } else {
                    match desc.drain() {
                        Ok(p) => p,
                        Err(e) => {
                            // a gating descriptor was drained behind our back
                            first_err.get_or_insert(e);
                            desc.drain_available()
                        }
                    }
                };
                out.push(DrainedCopy {
                    direction: dir,
                    index,
                    packages,
                });
            }
        }

        let mut g = self.ghost_lock.lock();
        g.phase = ConnectionPhase::Drained;
        if let Some(e) = first_err {
            drop(g);
            log::warn!("connection drain incomplete, recycling the epoch: {e}");
            for copy in out {
                if let Ok(desc) = self.descriptor(copy.direction, copy.index) {
                    copy.packages.into_iter().for_each(|p| desc.recycle(p));
                }
            }
            return Err(e);
        }
        log::debug!(
            "connection drained: epoch={} packages={}",
            g.epoch,
            out.iter().map(|c| c.packages.len()).sum::<usize>()
        );
        Ok(out)
    }

    /// Drain, hand every package to `f`, and recycle it. Returns the number
    /// of packages consumed.
    pub fn consume<F>(&self, mut f: F) -> Result<usize, HaloError>
    where
        F: FnMut(Direction, &CopyDescriptor, &Package) -> Result<(), HaloError>,
    {
        let drained = self.drain()?;
        let mut n = 0;
        let mut first_err = None;
        for copy in drained {
            let desc = self.descriptor(copy.direction, copy.index)?;
            for pkg in copy.packages {
                if first_err.is_none() {
                    if let Err(e) = f(copy.direction, desc, &pkg) {
                        first_err = Some(e);
                    }
                }
                desc.recycle(pkg);
                n += 1;
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(n),
        }
    }

    /// Zero the firing rule, reset and re-register every descriptor, and
    /// return to `Idle` for the next epoch.
    ///
    /// Requires a drained epoch. With a barrier, every participant calls this
    /// and none returns until the reset is complete.
    pub fn reset_for_next_epoch(&self) -> Result<(), HaloError> {
        self.phase_sync(|| self.reset_now())
    }

    fn reset_now(&self) -> Result<(), HaloError> {
        {
            let g = self.ghost_lock.lock();
            let quiet_idle = g.phase == ConnectionPhase::Idle && g.firing_rule_cnt == 0;
            if g.phase != ConnectionPhase::Drained && !quiet_idle {
                return Err(HaloError::ResetBeforeDrain {
                    phase: g.phase.to_string(),
                });
            }
        }
        for dir in Direction::BOTH {
            for d in self.descriptors(dir) {
                d.reset_epoch()?;
                d.register_transfer(dir, d.transfers_per_epoch())?;
            }
            self.side_lock(dir).completed = 0;
        }
        let mut g = self.ghost_lock.lock();
        g.firing_rule_cnt = 0;
        g.claimed = false;
        g.epoch += 1;
        g.phase = if g.firing_total == 0 {
            ConnectionPhase::Fireable
        } else {
            ConnectionPhase::Idle
        };
        log::debug!("connection reset: now in epoch {}", g.epoch);
        drop(g);
        self.debug_assert_invariants();
        Ok(())
    }

    // ------------------------------------------------------------------
    // diagnostics
    // ------------------------------------------------------------------

    pub fn phase(&self) -> ConnectionPhase {
        self.ghost_lock.lock().phase
    }

    pub fn epoch(&self) -> u64 {
        self.ghost_lock.lock().epoch
    }

    pub fn firing_rule_cnt(&self) -> usize {
        self.ghost_lock.lock().firing_rule_cnt
    }

    /// Inputs the gate waits for.
    pub fn firing_total(&self) -> usize {
        self.ghost_lock.lock().firing_total
    }

    /// Sends completed this epoch across all send descriptors.
    pub fn scpy_cnt(&self) -> usize {
        self.s_lock.lock().completed
    }

    /// Receives completed this epoch across all receive descriptors.
    pub fn dcpy_cnt(&self) -> usize {
        self.d_lock.lock().completed
    }

    /// Gating descriptors still below their threshold.
    pub fn pending(&self) -> Vec<PendingCopy> {
        let mut out = Vec::new();
        for dir in Direction::BOTH {
            if !self.firing_rule.gates(dir) {
                continue;
            }
            for (index, d) in self.descriptors(dir).iter().enumerate() {
                let (observed, expected) = d.progress(dir);
                if observed < expected {
                    out.push(PendingCopy {
                        direction: dir,
                        index,
                        ns: d.ns(),
                        nd: d.nd(),
                        observed,
                        expected,
                    });
                }
            }
        }
        out
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        let scpy_cnt = self.scpy_cnt();
        let dcpy_cnt = self.dcpy_cnt();
        let (nscpy, ndcpy) = (self.nscpy(), self.ndcpy());
        let g = self.ghost_lock.lock();
        ConnectionSnapshot {
            phase: g.phase,
            epoch: g.epoch,
            nscpy,
            ndcpy,
            scpy_cnt,
            dcpy_cnt,
            firing_rule_cnt: g.firing_rule_cnt,
            firing_total: g.firing_total,
        }
    }
}

impl fmt::Debug for LocalConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.snapshot();
        f.debug_struct("LocalConnection")
            .field("rule", &self.firing_rule)
            .field("phase", &s.phase)
            .field("epoch", &s.epoch)
            .field("nscpy", &s.nscpy)
            .field("ndcpy", &s.ndcpy)
            .field("firing_rule_cnt", &s.firing_rule_cnt)
            .finish()
    }
}

impl DebugInvariants for LocalConnection {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "LocalConnection");
    }

    /// Meaningful only while no completion is in flight.
    fn validate_invariants(&self) -> Result<(), HaloError> {
        for dir in Direction::BOTH {
            for d in self.descriptors(dir) {
                d.validate_invariants()?;
            }
        }
        let s = self.snapshot();
        if s.firing_total > s.nscpy + s.ndcpy {
            return Err(HaloError::InvariantViolation(format!(
                "gate of {} exceeds {} descriptors",
                s.firing_total,
                s.nscpy + s.ndcpy
            )));
        }
        if s.firing_rule_cnt > s.firing_total {
            return Err(HaloError::FiringRuleOverflow {
                count: s.firing_rule_cnt,
                total: s.firing_total,
            });
        }
        if s.phase == ConnectionPhase::Fireable && s.firing_rule_cnt != s.firing_total {
            return Err(HaloError::InvariantViolation(format!(
                "fireable with {} of {} inputs",
                s.firing_rule_cnt, s.firing_total
            )));
        }
        for (dir, agg) in [(Direction::Send, s.scpy_cnt), (Direction::Receive, s.dcpy_cnt)] {
            let sum: usize = self.descriptors(dir).iter().map(|d| d.progress(dir).0).sum();
            let drained = matches!(s.phase, ConnectionPhase::Drained);
            if !drained && sum != agg {
                return Err(HaloError::InvariantViolation(format!(
                    "{dir} aggregate {agg} disagrees with descriptor sum {sum}"
                )));
            }
        }
        Ok(())
    }
}
