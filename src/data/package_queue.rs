//! Thread-safe FIFO of packages.
//!
//! The queue carries its own lock, independent of the descriptor lock that
//! usually wraps calls into it. None of its operations block on anything but
//! that internal lock, so holding a descriptor lock across a queue call cannot
//! deadlock.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::data::package::Package;

#[derive(Debug, Default)]
pub struct PackageQueue {
    inner: Mutex<VecDeque<Package>>,
}

impl PackageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the back.
    pub fn enqueue(&self, pkg: Package) {
        self.inner.lock().push_back(pkg);
    }

    /// Pop from the front, or `None` when empty.
    pub fn dequeue(&self) -> Option<Package> {
        self.inner.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Remove everything, preserving FIFO order.
    pub fn drain_all(&self) -> Vec<Package> {
        self.inner.lock().drain(..).collect()
    }
}
