//! `Fab`: dense multi-component cell data over a patch and its ghost halo.
//!
//! Storage is component-major with x varying fastest, matching the order of
//! [`IndexBox::cells`]. Packing a region therefore writes `n_comp` contiguous
//! runs of `region.num_cells()` values each.

use crate::geometry::{IndexBox, IntVect, SPACEDIM};
use crate::halo_error::HaloError;

#[derive(Clone, Debug, PartialEq)]
pub struct Fab {
    valid: IndexBox,
    grown: IndexBox,
    n_comp: usize,
    data: Vec<f64>,
}

impl Fab {
    /// Zero-filled data over `valid` grown by `n_grow` ghost cells per axis.
    pub fn new(valid: IndexBox, n_grow: IntVect, n_comp: usize) -> Self {
        let grown = valid.grow_by(n_grow);
        Self {
            valid,
            grown,
            n_comp,
            data: vec![0.0; grown.num_cells() * n_comp],
        }
    }

    #[inline]
    pub fn valid_box(&self) -> IndexBox {
        self.valid
    }

    #[inline]
    pub fn grown_box(&self) -> IndexBox {
        self.grown
    }

    #[inline]
    pub fn n_comp(&self) -> usize {
        self.n_comp
    }

    /// Linear offset of `iv` within one component.
    fn offset(&self, iv: IntVect) -> usize {
        let size = self.grown.size();
        let lo = self.grown.lo();
        let mut off = 0usize;
        let mut stride = 1usize;
        for d in 0..SPACEDIM {
            off += (iv[d] - lo[d]) as usize * stride;
            stride *= size[d];
        }
        off
    }

    fn index(&self, iv: IntVect, comp: usize) -> Option<usize> {
        if comp >= self.n_comp || !self.grown.contains(iv) {
            return None;
        }
        Some(comp * self.grown.num_cells() + self.offset(iv))
    }

    pub fn get(&self, iv: IntVect, comp: usize) -> Option<f64> {
        self.index(iv, comp).map(|i| self.data[i])
    }

    pub fn set(&mut self, iv: IntVect, comp: usize, value: f64) -> Result<(), HaloError> {
        let i = self
            .index(iv, comp)
            .ok_or(HaloError::RegionOutOfBounds {
                region: IndexBox::new(iv, iv),
                storage: self.grown,
            })?;
        self.data[i] = value;
        Ok(())
    }

    /// Set every valid cell of every component from `f(cell, comp)`.
    pub fn fill_valid(&mut self, mut f: impl FnMut(IntVect, usize) -> f64) {
        let valid = self.valid;
        for comp in 0..self.n_comp {
            for iv in valid.cells() {
                let i = comp * self.grown.num_cells() + self.offset(iv);
                self.data[i] = f(iv, comp);
            }
        }
    }

    fn check_region(&self, region: &IndexBox, buf_len: usize) -> Result<(), HaloError> {
        if !self.grown.contains_box(region) {
            return Err(HaloError::RegionOutOfBounds {
                region: *region,
                storage: self.grown,
            });
        }
        let expected = region.num_cells() * self.n_comp;
        if buf_len != expected {
            return Err(HaloError::BufferLengthMismatch {
                expected,
                found: buf_len,
            });
        }
        Ok(())
    }

    /// Copy the values of `region` into `out`.
    pub fn pack(&self, region: &IndexBox, out: &mut [f64]) -> Result<(), HaloError> {
        self.check_region(region, out.len())?;
        let ncell = self.grown.num_cells();
        let mut k = 0;
        for comp in 0..self.n_comp {
            for iv in region.cells() {
                out[k] = self.data[comp * ncell + self.offset(iv)];
                k += 1;
            }
        }
        Ok(())
    }

    /// Write `src` into the cells of `region`.
    pub fn unpack(&mut self, region: &IndexBox, src: &[f64]) -> Result<(), HaloError> {
        self.check_region(region, src.len())?;
        let ncell = self.grown.num_cells();
        let mut k = 0;
        for comp in 0..self.n_comp {
            for iv in region.cells() {
                let i = comp * ncell + self.offset(iv);
                self.data[i] = src[k];
                k += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_region() {
        let valid = IndexBox::new([0, 0, 0], [3, 3, 0]);
        let mut a = Fab::new(valid, [1, 1, 0], 2);
        a.fill_valid(|iv, c| (iv[0] * 10 + iv[1]) as f64 + 100.0 * c as f64);

        let region = IndexBox::new([3, 0, 0], [3, 3, 0]);
        let mut buf = vec![0.0; region.num_cells() * 2];
        a.pack(&region, &mut buf).unwrap();
        assert_eq!(&buf[..4], &[30.0, 31.0, 32.0, 33.0]);
        assert_eq!(buf[4], 130.0);

        let mut b = Fab::new(IndexBox::new([4, 0, 0], [7, 3, 0]), [1, 1, 0], 2);
        b.unpack(&region, &buf).unwrap();
        assert_eq!(b.get([3, 2, 0], 0), Some(32.0));
        assert_eq!(b.get([3, 2, 0], 1), Some(132.0));
    }

    #[test]
    fn out_of_bounds_and_length_errors() {
        let f = Fab::new(IndexBox::new([0, 0, 0], [1, 1, 0]), [0, 0, 0], 1);
        let far = IndexBox::new([5, 5, 0], [5, 5, 0]);
        let mut buf = [0.0; 1];
        assert!(matches!(
            f.pack(&far, &mut buf),
            Err(HaloError::RegionOutOfBounds { .. })
        ));
        let mut short = [0.0; 1];
        assert_eq!(
            f.pack(&f.valid_box(), &mut short),
            Err(HaloError::BufferLengthMismatch {
                expected: 4,
                found: 1
            })
        );
    }
}
