//! Patch layout service: maps patch indices to their valid boxes.
//!
//! Connections are built from a layout and assume it stays unchanged for
//! their lifetime. A regrid produces a new layout and new connections.

use crate::geometry::IndexBox;
use crate::halo_error::HaloError;

/// Read-only access to the valid boxes of a level.
pub trait BoxLayout {
    /// Number of patches.
    fn len(&self) -> usize;

    /// Valid box of patch `i`, or `None` when out of range.
    fn patch_box(&self, i: usize) -> Option<IndexBox>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Valid box of patch `i`, as an error when out of range.
    fn try_patch_box(&self, i: usize) -> Result<IndexBox, HaloError> {
        self.patch_box(i).ok_or(HaloError::UnknownPatch {
            patch: i,
            len: self.len(),
        })
    }

    /// Reject layouts whose valid boxes are empty or overlap.
    fn validate(&self) -> Result<(), HaloError> {
        let boxes = (0..self.len())
            .map(|i| self.try_patch_box(i))
            .collect::<Result<Vec<_>, _>>()?;
        check_disjoint(&boxes)
    }
}

/// Every box non-empty and no two sharing a cell.
pub(crate) fn check_disjoint(boxes: &[IndexBox]) -> Result<(), HaloError> {
    for (a, ba) in boxes.iter().enumerate() {
        if ba.is_empty() {
            return Err(HaloError::EmptyCopyRegion {
                ns: Some(a),
                nd: None,
            });
        }
        for (b, bb) in boxes.iter().enumerate().skip(a + 1) {
            if !ba.intersect(bb).is_empty() {
                return Err(HaloError::OverlappingPatches { a, b });
            }
        }
    }
    Ok(())
}

/// `Vec`-backed layout.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct VecLayout {
    boxes: Vec<IndexBox>,
}

impl VecLayout {
    pub fn new(boxes: Vec<IndexBox>) -> Self {
        Self { boxes }
    }

    /// Split `domain` into tiles of at most `tile` cells per axis.
    pub fn tiled(domain: IndexBox, tile: [usize; 3]) -> Self {
        let mut boxes = Vec::new();
        if domain.is_empty() || tile.contains(&0) {
            return Self { boxes };
        }
        let (lo, hi) = (domain.lo(), domain.hi());
        let mut k = lo[2];
        while k <= hi[2] {
            let mut j = lo[1];
            while j <= hi[1] {
                let mut i = lo[0];
                while i <= hi[0] {
                    let t = IndexBox::from_size([i, j, k], tile);
                    boxes.push(t.intersect(&domain));
                    i += tile[0] as i32;
                }
                j += tile[1] as i32;
            }
            k += tile[2] as i32;
        }
        Self { boxes }
    }

    pub fn boxes(&self) -> &[IndexBox] {
        &self.boxes
    }
}

impl BoxLayout for VecLayout {
    fn len(&self) -> usize {
        self.boxes.len()
    }

    fn patch_box(&self, i: usize) -> Option<IndexBox> {
        self.boxes.get(i).copied()
    }
}
