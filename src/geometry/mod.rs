//! Index-space geometry consumed by copy descriptors.
//!
//! Only what the exchange needs: boxes, their intersections, and cell
//! iteration. Level-set and embedded-boundary geometry live elsewhere.

pub mod index_box;

pub use index_box::{IndexBox, IntVect, SPACEDIM};
