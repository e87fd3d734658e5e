//! HaloError: unified error type for halo-sync public APIs
//!
//! Every error this crate reports is a defect in the caller's setup or in the
//! task layer driving the exchange. None of them is transient, so there is no
//! retryable class: see [`HaloError::kind`].

use thiserror::Error;

use crate::geometry::IndexBox;
use crate::sync::Direction;

/// Broad classification of a [`HaloError`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Detected while building descriptors or connections.
    Configuration,
    /// The calling task layer used the epoch protocol out of order.
    Protocol,
}

/// Unified error type for halo-sync operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HaloError {
    // ---- configuration -------------------------------------------------
    /// Source and destination regions of one copy hold different cell counts.
    #[error("copy {ns:?} -> {nd:?}: source region {sbx:?} has {src_cells} cells, destination {dbx:?} has {dst_cells}")]
    GeometryMismatch {
        ns: Option<usize>,
        nd: Option<usize>,
        sbx: IndexBox,
        dbx: IndexBox,
        src_cells: usize,
        dst_cells: usize,
    },
    /// A copy with an empty region carries no data and cannot be counted.
    #[error("copy {ns:?} -> {nd:?} has an empty region")]
    EmptyCopyRegion { ns: Option<usize>, nd: Option<usize> },
    /// The same copy was added twice to one side of a connection.
    #[error("duplicate {direction} descriptor for copy {ns:?} -> {nd:?} over {region:?}")]
    DuplicateDescriptor {
        direction: Direction,
        ns: Option<usize>,
        nd: Option<usize>,
        region: IndexBox,
    },
    /// `add_copy` after the connection was activated.
    #[error("connection is sealed; {direction} descriptors can no longer be added")]
    ConnectionSealed { direction: Direction },
    /// The connection was activated twice.
    #[error("connection was already activated")]
    AlreadyActivated,
    /// A patch index that the layout does not know about.
    #[error("patch {patch} is not part of the layout ({len} patches)")]
    UnknownPatch { patch: usize, len: usize },
    /// Two valid boxes of one layout overlap.
    #[error("patches {a} and {b} overlap")]
    OverlappingPatches { a: usize, b: usize },
    /// Region lies (partly) outside the storage box it is packed from or into.
    #[error("region {region:?} is not contained in {storage:?}")]
    RegionOutOfBounds { region: IndexBox, storage: IndexBox },
    /// A buffer handed to pack/unpack has the wrong length.
    #[error("buffer length mismatch: expected {expected}, found {found}")]
    BufferLengthMismatch { expected: usize, found: usize },
    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ---- protocol usage ------------------------------------------------
    /// `register_transfer` was called while the epoch was already underway.
    #[error("cannot register {direction} transfers mid-epoch ({observed} already completed)")]
    RegisterMidEpoch { direction: Direction, observed: usize },
    /// `register_transfer` with an expectation of zero.
    #[error("a descriptor must expect at least one {direction} transfer per epoch")]
    EmptyRegistration { direction: Direction },
    /// A completion arrived for a direction with no registered expectation.
    #[error("{direction} completed on a descriptor with no registered {direction} transfers")]
    NotRegistered { direction: Direction },
    /// More completions than registered for this epoch.
    #[error("{direction} completion exceeds the registered count of {expected}")]
    ExcessTransfer { direction: Direction, expected: usize },
    /// A completion arrived after the descriptor was drained this epoch.
    #[error("{direction} completed after the descriptor was drained")]
    CompleteAfterDrain { direction: Direction },
    /// The package payload does not match the descriptor's transfer size.
    #[error("package carries {found} values, descriptor transfers {expected}")]
    PackageSizeMismatch { expected: usize, found: usize },
    /// `drain` before every registered transfer has landed.
    #[error("not ready: {pending} of {total} required inputs still outstanding")]
    NotReady { pending: usize, total: usize },
    /// `drain` was called twice in one epoch.
    #[error("already drained in this epoch")]
    AlreadyDrained,
    /// Epoch reset before the packages of the epoch were drained.
    #[error("reset requested in phase {phase}, expected the epoch to be drained")]
    ResetBeforeDrain { phase: String },
    /// Completion reported to the connection after its firing rule was full.
    #[error("firing rule overflow: {count} of {total} inputs already counted")]
    FiringRuleOverflow { count: usize, total: usize },
    /// The connection has not been activated yet.
    #[error("connection is not active")]
    NotActive,
    /// A descriptor index out of range for one side of a connection.
    #[error("no {direction} descriptor at index {index} ({len} present)")]
    UnknownDescriptor {
        direction: Direction,
        index: usize,
        len: usize,
    },
    /// Internal bookkeeping disagrees with itself.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
    /// Another worker failed this epoch, or an earlier epoch was aborted.
    #[error("exchange epoch aborted")]
    EpochAborted,
    /// A worker's connections did not fire before the caller's deadline.
    #[error("epoch deadline expired with patches {patches:?} still waiting")]
    EpochDeadline { patches: Vec<usize> },
}

impl HaloError {
    /// Which side of the contract this error reports a defect in.
    pub fn kind(&self) -> ErrorKind {
        use HaloError::*;
        match self {
            GeometryMismatch { .. }
            | EmptyCopyRegion { .. }
            | DuplicateDescriptor { .. }
            | ConnectionSealed { .. }
            | AlreadyActivated
            | UnknownPatch { .. }
            | OverlappingPatches { .. }
            | RegionOutOfBounds { .. }
            | BufferLengthMismatch { .. }
            | InvalidConfig(_) => ErrorKind::Configuration,
            _ => ErrorKind::Protocol,
        }
    }

    /// Always `true`: the primitive has no I/O of its own that could fail
    /// independently of caller misuse.
    pub fn is_fatal(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_distinct() {
        let cfg = HaloError::EmptyCopyRegion { ns: Some(0), nd: Some(1) };
        let proto = HaloError::NotReady { pending: 1, total: 3 };
        assert_eq!(cfg.kind(), ErrorKind::Configuration);
        assert_eq!(proto.kind(), ErrorKind::Protocol);
        assert!(cfg.is_fatal() && proto.is_fatal());
    }

    #[test]
    fn messages_name_the_direction() {
        let e = HaloError::ExcessTransfer {
            direction: Direction::Receive,
            expected: 2,
        };
        assert_eq!(
            e.to_string(),
            "receive completion exceeds the registered count of 2"
        );
    }
}
