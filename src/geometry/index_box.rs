//! `IndexBox`: an axis-aligned, cell-centered region of integer index space.
//!
//! Bounds are inclusive on both ends. A box whose `hi` is below its `lo` on
//! any axis is empty. Problems in fewer than [`SPACEDIM`] dimensions use a
//! unit extent (`lo == hi == 0`) on the trailing axes.

use std::fmt;

use itertools::iproduct;

/// Number of index-space dimensions.
pub const SPACEDIM: usize = 3;

/// Integer index vector.
pub type IntVect = [i32; SPACEDIM];

#[derive(Copy, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct IndexBox {
    lo: IntVect,
    hi: IntVect,
}

impl IndexBox {
    /// Box spanning `lo..=hi`.
    pub const fn new(lo: IntVect, hi: IntVect) -> Self {
        Self { lo, hi }
    }

    /// Box with corner `lo` and `size` cells per axis.
    pub fn from_size(lo: IntVect, size: [usize; SPACEDIM]) -> Self {
        let mut hi = lo;
        for d in 0..SPACEDIM {
            hi[d] = lo[d] + size[d] as i32 - 1;
        }
        Self { lo, hi }
    }

    /// A canonical empty box.
    pub const fn empty() -> Self {
        Self {
            lo: [0; SPACEDIM],
            hi: [-1; SPACEDIM],
        }
    }

    #[inline]
    pub const fn lo(&self) -> IntVect {
        self.lo
    }

    #[inline]
    pub const fn hi(&self) -> IntVect {
        self.hi
    }

    pub fn is_empty(&self) -> bool {
        (0..SPACEDIM).any(|d| self.hi[d] < self.lo[d])
    }

    /// Cells per axis (zero on every axis for an empty box).
    pub fn size(&self) -> [usize; SPACEDIM] {
        if self.is_empty() {
            return [0; SPACEDIM];
        }
        let mut s = [0usize; SPACEDIM];
        for d in 0..SPACEDIM {
            s[d] = (self.hi[d] - self.lo[d] + 1) as usize;
        }
        s
    }

    /// Total number of cells.
    pub fn num_cells(&self) -> usize {
        self.size().iter().product()
    }

    pub fn contains(&self, iv: IntVect) -> bool {
        (0..SPACEDIM).all(|d| self.lo[d] <= iv[d] && iv[d] <= self.hi[d])
    }

    /// `true` when every cell of `other` lies in `self`. Empty boxes are
    /// contained in everything.
    pub fn contains_box(&self, other: &IndexBox) -> bool {
        other.is_empty() || (self.contains(other.lo) && self.contains(other.hi))
    }

    /// Intersection, possibly empty.
    pub fn intersect(&self, other: &IndexBox) -> IndexBox {
        let mut lo = [0; SPACEDIM];
        let mut hi = [0; SPACEDIM];
        for d in 0..SPACEDIM {
            lo[d] = self.lo[d].max(other.lo[d]);
            hi[d] = self.hi[d].min(other.hi[d]);
        }
        let b = IndexBox { lo, hi };
        if b.is_empty() { IndexBox::empty() } else { b }
    }

    /// Grow by `n` cells on every face.
    pub fn grow(&self, n: i32) -> IndexBox {
        self.grow_by([n; SPACEDIM])
    }

    /// Grow by `n[d]` cells on both faces of axis `d`. Negative values shrink.
    pub fn grow_by(&self, n: IntVect) -> IndexBox {
        let mut b = *self;
        for d in 0..SPACEDIM {
            b.lo[d] -= n[d];
            b.hi[d] += n[d];
        }
        b
    }

    pub fn shift(&self, by: IntVect) -> IndexBox {
        let mut b = *self;
        for d in 0..SPACEDIM {
            b.lo[d] += by[d];
            b.hi[d] += by[d];
        }
        b
    }

    /// All cells of the box, x fastest.
    pub fn cells(&self) -> impl Iterator<Item = IntVect> + 'static {
        let (lo, hi) = (self.lo, self.hi);
        iproduct!(lo[2]..=hi[2], lo[1]..=hi[1], lo[0]..=hi[0]).map(|(k, j, i)| [i, j, k])
    }
}

impl fmt::Debug for IndexBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:?} {:?})", self.lo, self.hi)
    }
}

impl fmt::Display for IndexBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
