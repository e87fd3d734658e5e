//! `CopyDescriptor`: one point-to-point ghost-region copy.
//!
//! A descriptor names the source patch `ns` and destination patch `nd`, the
//! sub-regions `sbx`/`dbx` copied on each side, and counts how many sends and
//! receives have landed against it in the current epoch. All counter and
//! queue updates happen under the descriptor's own lock, so two descriptors of
//! one connection never contend with each other.
//!
//! Per epoch the protocol is:
//!
//! 1. [`register_transfer`](CopyDescriptor::register_transfer) for each
//!    direction in use,
//! 2. any number of concurrent `complete_*` calls, up to the registered count,
//! 3. a single [`drain`](CopyDescriptor::drain) once the threshold is met,
//! 4. [`reset_epoch`](CopyDescriptor::reset_epoch).

use parking_lot::Mutex;

use crate::data::package::Package;
use crate::data::package_pool::PackagePool;
use crate::data::package_queue::PackageQueue;
use crate::debug_invariants::DebugInvariants;
use crate::geometry::IndexBox;
use crate::halo_error::HaloError;
use crate::sync::Direction;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
struct DescriptorState {
    expected_sends: usize,
    expected_recvs: usize,
    scpy_cnt: usize,
    dcpy_cnt: usize,
    drained: bool,
}

impl DescriptorState {
    fn expected(&self, dir: Direction) -> usize {
        match dir {
            Direction::Send => self.expected_sends,
            Direction::Receive => self.expected_recvs,
        }
    }

    fn count(&self, dir: Direction) -> usize {
        match dir {
            Direction::Send => self.scpy_cnt,
            Direction::Receive => self.dcpy_cnt,
        }
    }

    fn count_mut(&mut self, dir: Direction) -> &mut usize {
        match dir {
            Direction::Send => &mut self.scpy_cnt,
            Direction::Receive => &mut self.dcpy_cnt,
        }
    }

    fn registered(&self) -> bool {
        self.expected_sends > 0 || self.expected_recvs > 0
    }

    /// Registered transfers that have not landed yet.
    fn outstanding(&self) -> usize {
        (self.expected_sends - self.scpy_cnt) + (self.expected_recvs - self.dcpy_cnt)
    }

    fn satisfied(&self) -> bool {
        self.registered() && self.outstanding() == 0
    }
}

pub struct CopyDescriptor {
    ns: Option<usize>,
    nd: Option<usize>,
    sbx: IndexBox,
    dbx: IndexBox,
    n_comp: usize,
    sz: usize,
    s_partner: Option<usize>,
    d_partner: Option<usize>,
    transfers_per_epoch: usize,
    state: Mutex<DescriptorState>,
    p_queue: PackageQueue,
    recycle: PackagePool,
}

impl CopyDescriptor {
    /// Describe a copy of `sbx` on patch `ns` into `dbx` on patch `nd`.
    ///
    /// Fails with [`HaloError::GeometryMismatch`] when the two regions differ
    /// in cell count, and with [`HaloError::EmptyCopyRegion`] when they are
    /// empty.
    pub fn new(
        ns: Option<usize>,
        nd: Option<usize>,
        sbx: IndexBox,
        dbx: IndexBox,
        n_comp: usize,
    ) -> Result<Self, HaloError> {
        let (src_cells, dst_cells) = (sbx.num_cells(), dbx.num_cells());
        if src_cells != dst_cells {
            return Err(HaloError::GeometryMismatch {
                ns,
                nd,
                sbx,
                dbx,
                src_cells,
                dst_cells,
            });
        }
        if src_cells == 0 {
            return Err(HaloError::EmptyCopyRegion { ns, nd });
        }
        if n_comp == 0 {
            return Err(HaloError::InvalidConfig(
                "a copy must carry at least one component".into(),
            ));
        }
        let sz = src_cells * n_comp;
        Ok(Self {
            ns,
            nd,
            sbx,
            dbx,
            n_comp,
            sz,
            s_partner: None,
            d_partner: None,
            transfers_per_epoch: 1,
            state: Mutex::new(DescriptorState::default()),
            p_queue: PackageQueue::new(),
            recycle: PackagePool::new(sz),
        })
    }

    /// Link the matched descriptors on the sending and receiving side.
    pub fn with_partners(mut self, s_partner: Option<usize>, d_partner: Option<usize>) -> Self {
        self.s_partner = s_partner;
        self.d_partner = d_partner;
        self
    }

    /// Number of packages a connection registers for this copy each epoch.
    pub fn with_transfers_per_epoch(mut self, n: usize) -> Self {
        self.transfers_per_epoch = n;
        self
    }

    pub fn ns(&self) -> Option<usize> {
        self.ns
    }
    pub fn nd(&self) -> Option<usize> {
        self.nd
    }
    pub fn sbx(&self) -> IndexBox {
        self.sbx
    }
    pub fn dbx(&self) -> IndexBox {
        self.dbx
    }
    pub fn n_comp(&self) -> usize {
        self.n_comp
    }
    /// Values per package: cells times components.
    pub fn sz(&self) -> usize {
        self.sz
    }
    pub fn s_partner(&self) -> Option<usize> {
        self.s_partner
    }
    pub fn d_partner(&self) -> Option<usize> {
        self.d_partner
    }
    pub fn transfers_per_epoch(&self) -> usize {
        self.transfers_per_epoch
    }

    /// Sends completed this epoch.
    pub fn scpy_cnt(&self) -> usize {
        self.state.lock().scpy_cnt
    }

    /// Receives completed this epoch.
    pub fn dcpy_cnt(&self) -> usize {
        self.state.lock().dcpy_cnt
    }

    /// `(observed, expected)` for one direction.
    pub fn progress(&self, dir: Direction) -> (usize, usize) {
        let st = self.state.lock();
        (st.count(dir), st.expected(dir))
    }

    /// `true` once every registered transfer of the epoch has landed.
    pub fn is_satisfied(&self) -> bool {
        self.state.lock().satisfied()
    }

    /// Packages pushed and not yet drained.
    pub fn queued(&self) -> usize {
        self.p_queue.len()
    }

    /// The descriptor's buffer pool (its recycle queue).
    pub fn pool(&self) -> &PackagePool {
        &self.recycle
    }

    /// Same copy, same side: used to reject duplicate registration.
    pub(crate) fn same_copy(&self, other: &CopyDescriptor) -> bool {
        self.ns == other.ns && self.nd == other.nd && self.sbx == other.sbx && self.dbx == other.dbx
    }

    /// Declare how many `dir` transfers this epoch must observe.
    ///
    /// Both directions must be registered before the first completion in
    /// either of them.
    pub fn register_transfer(&self, dir: Direction, expected: usize) -> Result<(), HaloError> {
        if expected == 0 {
            return Err(HaloError::EmptyRegistration { direction: dir });
        }
        let mut st = self.state.lock();
        let observed = st.scpy_cnt + st.dcpy_cnt;
        if observed > 0 || st.drained {
            return Err(HaloError::RegisterMidEpoch {
                direction: dir,
                observed,
            });
        }
        match dir {
            Direction::Send => st.expected_sends = expected,
            Direction::Receive => st.expected_recvs = expected,
        }
        Ok(())
    }

    /// A package sized for this copy, taken from the recycle queue when one
    /// is available and stamped with the copy's route.
    pub fn acquire_package(&self) -> Package {
        let mut pkg = self.recycle.acquire();
        pkg.set_route(self.ns, self.nd);
        pkg
    }

    /// Return a consumed package to the recycle queue.
    pub fn recycle(&self, pkg: Package) {
        self.recycle.release(pkg);
    }

    /// Record one completed send. Returns `true` when this call is the one
    /// that lands the last registered transfer of the epoch.
    pub fn complete_send(&self, pkg: Package) -> Result<bool, HaloError> {
        self.complete_then(Direction::Send, pkg, |_| {})
    }

    /// Record one completed receive. Returns `true` when this call is the one
    /// that lands the last registered transfer of the epoch.
    pub fn complete_receive(&self, pkg: Package) -> Result<bool, HaloError> {
        self.complete_then(Direction::Receive, pkg, |_| {})
    }

    /// Shared completion path. `then` runs while the descriptor lock is still
    /// held, which is where a connection folds the result into its own
    /// counters (descriptor-then-connection order).
    pub(crate) fn complete_then<F>(
        &self,
        dir: Direction,
        mut pkg: Package,
        then: F,
    ) -> Result<bool, HaloError>
    where
        F: FnOnce(bool),
    {
        let mut st = self.state.lock();
        if st.drained {
            return Err(HaloError::CompleteAfterDrain { direction: dir });
        }
        let expected = st.expected(dir);
        if expected == 0 {
            return Err(HaloError::NotRegistered { direction: dir });
        }
        if st.count(dir) == expected {
            return Err(HaloError::ExcessTransfer {
                direction: dir,
                expected,
            });
        }
        if pkg.len() != self.sz {
            return Err(HaloError::PackageSizeMismatch {
                expected: self.sz,
                found: pkg.len(),
            });
        }
        if pkg.src_patch().is_none() && pkg.dst_patch().is_none() {
            pkg.set_route(self.ns, self.nd);
        }
        self.p_queue.enqueue(pkg);
        let cnt = st.count_mut(dir);
        *cnt += 1;
        let observed = *cnt;
        // counts only grow and never pass their registration, so this flips once
        let reached = st.satisfied();
        log::trace!(
            "copy {:?}->{:?}: {dir} {observed}/{expected}",
            self.ns,
            self.nd
        );
        then(reached);
        Ok(reached)
    }

    /// Take every package pushed this epoch. Fails with
    /// [`HaloError::NotReady`] while any registered transfer is outstanding.
    ///
    /// Packages are handed to the caller; return them with
    /// [`recycle`](Self::recycle) once consumed.
    pub fn drain(&self) -> Result<Vec<Package>, HaloError> {
        let mut st = self.state.lock();
        if st.drained {
            return Err(HaloError::AlreadyDrained);
        }
        if !st.satisfied() {
            return Err(HaloError::NotReady {
                pending: if st.registered() { st.outstanding() } else { 1 },
                total: st.expected_sends + st.expected_recvs,
            });
        }
        st.drained = true;
        Ok(self.p_queue.drain_all())
    }

    /// Take whatever has landed without checking the threshold. Used for
    /// descriptors that do not gate their connection's firing rule.
    pub(crate) fn drain_available(&self) -> Vec<Package> {
        let mut st = self.state.lock();
        st.drained = true;
        self.p_queue.drain_all()
    }

    /// Drain, hand each package to `f`, then recycle it.
    pub fn drain_with<F>(&self, mut f: F) -> Result<usize, HaloError>
    where
        F: FnMut(&Package) -> Result<(), HaloError>,
    {
        let pkgs = self.drain()?;
        let n = pkgs.len();
        let mut first_err = None;
        for pkg in pkgs {
            if first_err.is_none() {
                if let Err(e) = f(&pkg) {
                    first_err = Some(e);
                }
            }
            self.recycle(pkg);
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(n),
        }
    }

    /// Zero counters and expectations for the next epoch.
    ///
    /// Refused while transfers of the current epoch have landed but have not
    /// been drained. The caller must keep `complete_*` calls away for the
    /// duration.
    pub fn reset_epoch(&self) -> Result<(), HaloError> {
        let mut st = self.state.lock();
        if !st.drained && (st.scpy_cnt > 0 || st.dcpy_cnt > 0) {
            return Err(HaloError::ResetBeforeDrain {
                phase: "accumulating".into(),
            });
        }
        *st = DescriptorState::default();
        Ok(())
    }
}

impl std::fmt::Debug for CopyDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = *self.state.lock();
        f.debug_struct("CopyDescriptor")
            .field("ns", &self.ns)
            .field("nd", &self.nd)
            .field("sbx", &self.sbx)
            .field("dbx", &self.dbx)
            .field("sz", &self.sz)
            .field("s_partner", &self.s_partner)
            .field("d_partner", &self.d_partner)
            .field("scpy_cnt", &st.scpy_cnt)
            .field("dcpy_cnt", &st.dcpy_cnt)
            .finish()
    }
}

impl DebugInvariants for CopyDescriptor {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "CopyDescriptor");
    }

    fn validate_invariants(&self) -> Result<(), HaloError> {
        let st = *self.state.lock();
        for dir in Direction::BOTH {
            if st.count(dir) > st.expected(dir) {
                return Err(HaloError::ExcessTransfer {
                    direction: dir,
                    expected: st.expected(dir),
                });
            }
        }
        let queued = self.p_queue.len();
        let outstanding = if st.drained { 0 } else { st.scpy_cnt + st.dcpy_cnt };
        if queued > outstanding {
            return Err(HaloError::InvariantViolation(format!(
                "{queued} packages queued but only {outstanding} outstanding"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip(x0: i32) -> IndexBox {
        IndexBox::new([x0, 0, 0], [x0, 3, 0])
    }

    fn desc() -> CopyDescriptor {
        CopyDescriptor::new(Some(0), Some(1), strip(3), strip(3), 2).unwrap()
    }

    #[test]
    fn geometry_mismatch_is_config_error() {
        let err = CopyDescriptor::new(
            Some(0),
            Some(1),
            strip(3),
            IndexBox::new([0, 0, 0], [1, 3, 0]),
            1,
        )
        .unwrap_err();
        assert!(matches!(err, HaloError::GeometryMismatch { src_cells: 4, dst_cells: 8, .. }));
        assert_eq!(err.kind(), crate::halo_error::ErrorKind::Configuration);
    }

    #[test]
    fn shifted_regions_of_equal_size_are_accepted() {
        let d = CopyDescriptor::new(None, None, strip(3), strip(-1), 3).unwrap();
        assert_eq!(d.sz(), 12);
        assert_eq!(d.ns(), None);
    }

    #[test]
    fn threshold_reached_exactly_once() {
        let d = desc();
        d.register_transfer(Direction::Receive, 2).unwrap();
        assert!(!d.complete_receive(d.acquire_package()).unwrap());
        assert!(d.complete_receive(d.acquire_package()).unwrap());
        assert_eq!(
            d.complete_receive(d.acquire_package()),
            Err(HaloError::ExcessTransfer {
                direction: Direction::Receive,
                expected: 2
            })
        );
        assert_eq!(d.dcpy_cnt(), 2);
        d.validate_invariants().unwrap();
    }

    #[test]
    fn complete_requires_registration() {
        let d = desc();
        assert_eq!(
            d.complete_send(d.acquire_package()),
            Err(HaloError::NotRegistered {
                direction: Direction::Send
            })
        );
        assert_eq!(
            d.register_transfer(Direction::Send, 0),
            Err(HaloError::EmptyRegistration {
                direction: Direction::Send
            })
        );
    }

    #[test]
    fn register_mid_epoch_is_refused() {
        let d = desc();
        d.register_transfer(Direction::Send, 2).unwrap();
        d.complete_send(d.acquire_package()).unwrap();
        assert_eq!(
            d.register_transfer(Direction::Send, 3),
            Err(HaloError::RegisterMidEpoch {
                direction: Direction::Send,
                observed: 1
            })
        );
    }

    #[test]
    fn both_directions_report_threshold_once() {
        let d = desc();
        d.register_transfer(Direction::Send, 1).unwrap();
        d.register_transfer(Direction::Receive, 2).unwrap();
        assert!(!d.complete_send(d.acquire_package()).unwrap());
        assert_eq!(
            d.register_transfer(Direction::Receive, 1),
            Err(HaloError::RegisterMidEpoch {
                direction: Direction::Receive,
                observed: 1
            })
        );
        assert!(!d.complete_receive(d.acquire_package()).unwrap());
        assert_eq!(
            d.drain().unwrap_err(),
            HaloError::NotReady { pending: 1, total: 3 }
        );
        assert!(d.complete_receive(d.acquire_package()).unwrap());
        assert!(d.is_satisfied());
        assert_eq!(d.drain().unwrap().len(), 3);
    }

    #[test]
    fn wrong_package_size_is_rejected() {
        let d = desc();
        d.register_transfer(Direction::Send, 1).unwrap();
        assert_eq!(
            d.complete_send(Package::new(0, 3)),
            Err(HaloError::PackageSizeMismatch {
                expected: 8,
                found: 3
            })
        );
        assert_eq!(d.scpy_cnt(), 0);
    }

    #[test]
    fn drain_before_threshold_is_not_ready() {
        let d = desc();
        d.register_transfer(Direction::Receive, 2).unwrap();
        d.complete_receive(d.acquire_package()).unwrap();
        assert_eq!(
            d.drain().unwrap_err(),
            HaloError::NotReady { pending: 1, total: 2 }
        );
        assert_eq!(d.queued(), 1);
    }

    #[test]
    fn drain_then_reset_then_reuse() {
        let d = desc();
        d.register_transfer(Direction::Send, 1).unwrap();
        let pkg = d.acquire_package();
        let (id, addr, cap) = (pkg.id(), pkg.buffer_addr(), pkg.capacity());
        assert!(d.complete_send(pkg).unwrap());

        assert_eq!(
            d.reset_epoch(),
            Err(HaloError::ResetBeforeDrain {
                phase: "accumulating".into()
            })
        );

        let got = d.drain().unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].src_patch(), Some(0));
        assert_eq!(d.drain().unwrap_err(), HaloError::AlreadyDrained);
        assert_eq!(
            d.complete_send(Package::new(5, 8)),
            Err(HaloError::CompleteAfterDrain {
                direction: Direction::Send
            })
        );
        for p in got {
            d.recycle(p);
        }
        d.reset_epoch().unwrap();

        d.register_transfer(Direction::Send, 1).unwrap();
        let again = d.acquire_package();
        assert_eq!(again.id(), id);
        assert_eq!(again.buffer_addr(), addr);
        assert_eq!(again.capacity(), cap);
        assert_eq!(d.pool().allocated(), 1);
    }

    #[test]
    fn drain_with_recycles_everything() {
        let d = desc();
        d.register_transfer(Direction::Receive, 3).unwrap();
        for _ in 0..3 {
            let mut p = d.acquire_package();
            p.payload_mut()[0] = 1.5;
            d.complete_receive(p).unwrap();
        }
        let mut sum = 0.0;
        let n = d
            .drain_with(|p| {
                sum += p.payload()[0];
                Ok(())
            })
            .unwrap();
        assert_eq!(n, 3);
        assert_eq!(sum, 4.5);
        assert_eq!(d.pool().available(), 3);
    }

    #[test]
    fn concurrent_completes_never_lose_an_increment() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let d = Arc::new(desc());
        d.register_transfer(Direction::Send, 64).unwrap();
        let reached = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let (d, reached) = (d.clone(), reached.clone());
                std::thread::spawn(move || {
                    for _ in 0..8 {
                        if d.complete_send(d.acquire_package()).unwrap() {
                            reached.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(d.scpy_cnt(), 64);
        assert_eq!(reached.load(Ordering::SeqCst), 1);
        assert_eq!(d.drain().unwrap().len(), 64);
    }
}
