//! Per-descriptor buffer pool.
//!
//! Each copy descriptor owns one pool, which is its recycle queue plus the
//! bookkeeping needed to hand out buffers of the descriptor's transfer size.
//! No allocator state is shared between descriptors.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::data::package::Package;
use crate::data::package_queue::PackageQueue;

#[derive(Debug)]
pub struct PackagePool {
    free: PackageQueue,
    package_len: usize,
    next_id: AtomicU64,
    allocated: AtomicUsize,
}

impl PackagePool {
    /// Pool handing out packages of `package_len` values.
    pub fn new(package_len: usize) -> Self {
        Self {
            free: PackageQueue::new(),
            package_len,
            next_id: AtomicU64::new(0),
            allocated: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn package_len(&self) -> usize {
        self.package_len
    }

    /// A recycled package when one is available, otherwise a new one.
    pub fn acquire(&self) -> Package {
        match self.free.dequeue() {
            Some(mut pkg) => {
                pkg.reshape(self.package_len);
                pkg
            }
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                Package::new(id, self.package_len)
            }
        }
    }

    /// Return a consumed package for reuse.
    pub fn release(&self, mut pkg: Package) {
        pkg.set_route(None, None);
        self.free.enqueue(pkg);
    }

    /// Packages currently waiting for reuse.
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Packages this pool has allocated over its lifetime.
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }
}
