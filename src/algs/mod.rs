//! Ghost-exchange algorithms built on local connections.
pub mod copy_plan;
pub mod halo_exchange;

pub use copy_plan::{CopyPlan, PlannedCopy};
pub use halo_exchange::{HaloConfig, HaloExchange};
