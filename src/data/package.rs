//! `Package`: the unit of transfer between a producer task and a consumer task.
//!
//! A package carries the packed cell values of one copy region plus the
//! patch indices it travels between. Packages are recycled rather than freed,
//! so the payload buffer and the [`Package::id`] survive from one epoch to the
//! next.

use std::fmt;

/// Contiguous payload plus addressing metadata.
pub struct Package {
    id: u64,
    src_patch: Option<usize>,
    dst_patch: Option<usize>,
    payload: Vec<f64>,
}

impl Package {
    /// Fresh zero-filled package holding `len` values.
    pub fn new(id: u64, len: usize) -> Self {
        Self {
            id,
            src_patch: None,
            dst_patch: None,
            payload: vec![0.0; len],
        }
    }

    /// Identifier assigned at allocation; stable across recycling.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of values carried.
    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Payload size in bytes.
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.payload.len() * std::mem::size_of::<f64>()
    }

    /// Allocated capacity of the payload buffer, in values.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.payload.capacity()
    }

    /// Address of the payload buffer. Used to observe buffer reuse.
    #[inline]
    pub fn buffer_addr(&self) -> usize {
        self.payload.as_ptr() as usize
    }

    pub fn payload(&self) -> &[f64] {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut [f64] {
        &mut self.payload
    }

    pub fn src_patch(&self) -> Option<usize> {
        self.src_patch
    }

    pub fn dst_patch(&self) -> Option<usize> {
        self.dst_patch
    }

    /// Stamp the source and destination patch indices.
    pub fn set_route(&mut self, src: Option<usize>, dst: Option<usize>) {
        self.src_patch = src;
        self.dst_patch = dst;
    }

    /// Resize the payload to `len` values. Never shrinks the allocation.
    pub(crate) fn reshape(&mut self, len: usize) {
        self.payload.resize(len, 0.0);
    }
}

impl fmt::Debug for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Package")
            .field("id", &self.id)
            .field("src_patch", &self.src_patch)
            .field("dst_patch", &self.dst_patch)
            .field("len", &self.payload.len())
            .finish()
    }
}
