//! # halo-sync
//!
//! halo-sync is the same-process half of a block-structured AMR ghost
//! exchange: patches owned by threads of one process fill each other's ghost
//! cells through shared memory, without messages and without a central
//! scheduler.
//!
//! ## Pieces
//! - [`sync::CopyDescriptor`]: one rectangular copy between two patches,
//!   with its own lock, completion counters, pending package queue and
//!   recycle pool.
//! - [`sync::LocalConnection`]: all descriptors of one patch, plus the firing
//!   rule that opens once every expected send and receive has landed.
//! - [`sync::CohortBarrier`]: the fixed-size barrier a cohort of threads
//!   meets at for setup and epoch teardown.
//! - [`algs::CopyPlan`] and [`algs::HaloExchange`]: planning copies from a
//!   [`layout::BoxLayout`] and driving whole ghost-fill epochs over
//!   [`data::Fab`] cell data.
//!
//! ## Epochs
//! A connection cycles `Idle -> Accumulating -> Fireable -> Draining ->
//! Drained` and back to `Idle` on [`sync::LocalConnection::reset_for_next_epoch`].
//! Producers complete transfers in any order from any thread; the last
//! completion opens the gate, and exactly one consumer drains it.
//!
//! ## Checked invariants
//! Enable `check-invariants` to run [`DebugInvariants`] validation in release
//! builds, or `strict-invariants` to panic on violation.

pub mod algs;
pub mod data;
pub mod debug_invariants;
pub mod geometry;
pub mod halo_error;
pub mod layout;
pub mod sync;

pub use debug_invariants::DebugInvariants;
pub use halo_error::HaloError;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::copy_plan::{CopyPlan, PlannedCopy};
    pub use crate::algs::halo_exchange::{HaloConfig, HaloExchange};
    pub use crate::data::fab::Fab;
    pub use crate::data::package::Package;
    pub use crate::data::package_pool::PackagePool;
    pub use crate::data::package_queue::PackageQueue;
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::geometry::{IndexBox, IntVect};
    pub use crate::halo_error::{ErrorKind, HaloError};
    pub use crate::layout::{BoxLayout, VecLayout};
    pub use crate::sync::{
        CohortBarrier, ConnectionConfig, ConnectionPhase, CopyDescriptor, Direction, Fire,
        FiringRule, LocalConnection,
    };
}

#[cfg(test)]
mod send_sync {
    use static_assertions::assert_impl_all;

    assert_impl_all!(crate::sync::CopyDescriptor: Send, Sync);
    assert_impl_all!(crate::sync::CohortBarrier: Send, Sync);
    assert_impl_all!(crate::algs::HaloExchange: Send, Sync);
}
