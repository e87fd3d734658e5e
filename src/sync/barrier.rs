//! Reusable counting barrier with a fixed participant count.
//!
//! Each `wait` blocks until `participants` threads have arrived, then
//! releases all of them. Exactly one thread per generation is reported as the
//! leader so that work which must run once (a reset, an activation) can be
//! done by it while the others wait at the next generation.

use parking_lot::{Condvar, Mutex};

use crate::halo_error::HaloError;

#[derive(Debug, Default)]
struct BarrierState {
    arrived: usize,
    generation: u64,
}

#[derive(Debug)]
pub struct CohortBarrier {
    participants: usize,
    state: Mutex<BarrierState>,
    released: Condvar,
}

/// Outcome of [`CohortBarrier::wait`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BarrierWaitResult {
    leader: bool,
}

impl BarrierWaitResult {
    /// `true` for the last thread to arrive in a generation.
    pub fn is_leader(&self) -> bool {
        self.leader
    }
}

impl CohortBarrier {
    pub fn new(participants: usize) -> Result<Self, HaloError> {
        if participants == 0 {
            return Err(HaloError::InvalidConfig(
                "barrier needs at least one participant".into(),
            ));
        }
        Ok(Self {
            participants,
            state: Mutex::new(BarrierState::default()),
            released: Condvar::new(),
        })
    }

    #[inline]
    pub fn participants(&self) -> usize {
        self.participants
    }

    /// Block until every participant of the current generation has arrived.
    pub fn wait(&self) -> BarrierWaitResult {
        let mut st = self.state.lock();
        let generation = st.generation;
        st.arrived += 1;
        if st.arrived == self.participants {
            st.arrived = 0;
            st.generation = generation.wrapping_add(1);
            self.released.notify_all();
            return BarrierWaitResult { leader: true };
        }
        while st.generation == generation {
            self.released.wait(&mut st);
        }
        BarrierWaitResult { leader: false }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn zero_participants_rejected() {
        assert!(matches!(
            CohortBarrier::new(0),
            Err(HaloError::InvalidConfig(_))
        ));
    }

    #[test]
    fn single_participant_is_always_leader() {
        let b = CohortBarrier::new(1).unwrap();
        assert!(b.wait().is_leader());
        assert!(b.wait().is_leader());
    }

    #[test]
    fn one_leader_per_generation_and_reusable() {
        let n = 4;
        let b = Arc::new(CohortBarrier::new(n).unwrap());
        let leaders = Arc::new(AtomicUsize::new(0));
        let passed = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..n)
            .map(|_| {
                let (b, leaders, passed) = (b.clone(), leaders.clone(), passed.clone());
                std::thread::spawn(move || {
                    for round in 0..10 {
                        if b.wait().is_leader() {
                            leaders.fetch_add(1, Ordering::SeqCst);
                        }
                        passed.fetch_add(1, Ordering::SeqCst);
                        b.wait();
                        // nobody is more than one round ahead
                        assert!(passed.load(Ordering::SeqCst) >= (round + 1) * n);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(leaders.load(Ordering::SeqCst), 10);
    }
}
