//! Local dataflow synchronization for same-process ghost exchange.
//!
//! - [`CopyDescriptor`]: one point-to-point copy with its own lock, counters
//!   and package queues.
//! - [`LocalConnection`]: the descriptors of one patch relationship plus the
//!   firing rule that decides when the consumer may drain them.
//! - [`CohortBarrier`]: fixed-size barrier for setup and epoch teardown.
//!
//! Lock order is always descriptor first, connection second. Descriptor
//! completion paths take the connection's side and ghost locks while holding
//! the descriptor lock; connection paths never take a descriptor lock while
//! holding one of their own.

use std::fmt;

pub mod barrier;
pub mod connection;
pub mod descriptor;

pub use barrier::{BarrierWaitResult, CohortBarrier};
pub use connection::{
    ConnectionConfig, ConnectionPhase, ConnectionSnapshot, DrainedCopy, Fire, FiringRule,
    LocalConnection, PendingCopy,
};
pub use descriptor::CopyDescriptor;

/// Which side of a copy an operation refers to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Direction {
    /// Outgoing: the patch is the source of the copy.
    Send,
    /// Incoming: the patch is the destination of the copy.
    Receive,
}

impl Direction {
    pub const BOTH: [Direction; 2] = [Direction::Send, Direction::Receive];
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Send => f.write_str("send"),
            Direction::Receive => f.write_str("receive"),
        }
    }
}
