#![allow(dead_code)]
use halo_sync::{
    geometry::IndexBox,
    sync::{CopyDescriptor, Direction, LocalConnection},
};

/// A `1 x len` strip at column `x` (2-D, unit z-extent).
pub fn strip(x: i32, len: usize) -> IndexBox {
    IndexBox::from_size([x, 0, 0], [1, len, 1])
}

/// Single-component copy `ns -> nd` over `strip(x, 2)`.
pub fn copy(ns: usize, nd: usize, x: i32) -> CopyDescriptor {
    CopyDescriptor::new(Some(ns), Some(nd), strip(x, 2), strip(x, 2), 1).unwrap()
}

/// Activated connection with `nscpy` send and `ndcpy` receive descriptors,
/// each expecting `per_copy` transfers per epoch.
pub fn connection(nscpy: usize, ndcpy: usize, per_copy: usize) -> LocalConnection {
    let c = LocalConnection::new();
    for i in 0..nscpy {
        c.add_copy(Direction::Send, copy(0, i + 1, i as i32).with_transfers_per_epoch(per_copy))
            .unwrap();
    }
    for i in 0..ndcpy {
        c.add_copy(Direction::Receive, copy(i + 1, 0, -(i as i32) - 1).with_transfers_per_epoch(per_copy))
            .unwrap();
    }
    c.activate().unwrap();
    c
}

/// Complete one transfer on descriptor `(dir, index)` with a pooled package
/// whose first value is `tag`.
pub fn push(c: &LocalConnection, dir: Direction, index: usize, tag: f64) -> bool {
    let mut p = c.acquire_package(dir, index).unwrap();
    p.payload_mut()[0] = tag;
    match dir {
        Direction::Send => c.complete_send(index, p).unwrap(),
        Direction::Receive => c.complete_receive(index, p).unwrap(),
    }
}

/// Drain, recycle, reset. Returns the tags of every drained package, sorted.
pub fn finish_epoch(c: &LocalConnection) -> Vec<f64> {
    let mut tags = Vec::new();
    c.consume(|_, _, p| {
        tags.push(p.payload()[0]);
        Ok(())
    })
    .unwrap();
    c.reset_for_next_epoch().unwrap();
    tags.sort_by(f64::total_cmp);
    tags
}
