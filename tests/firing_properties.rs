mod util;
use halo_sync::sync::{ConnectionPhase, Direction, Fire, FiringRule, LocalConnection};
use proptest::prelude::*;
use util::*;

/// Shuffle every `(direction, index)` completion the connection expects.
fn schedule(nscpy: usize, ndcpy: usize, per_copy: usize, seed: u64) -> Vec<(Direction, usize)> {
    use rand::rngs::SmallRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    let mut jobs = Vec::new();
    for _ in 0..per_copy {
        jobs.extend((0..nscpy).map(|i| (Direction::Send, i)));
        jobs.extend((0..ndcpy).map(|i| (Direction::Receive, i)));
    }
    jobs.shuffle(&mut SmallRng::seed_from_u64(seed));
    jobs
}

proptest! {
    #[test]
    fn counter_is_monotone_and_fires_once(
        nscpy in 0usize..4,
        ndcpy in 1usize..4,
        per_copy in 1usize..4,
        seed in any::<u64>(),
    ) {
        let c = connection(nscpy, ndcpy, per_copy);
        let jobs = schedule(nscpy, ndcpy, per_copy, seed);
        let total = nscpy + ndcpy;
        let mut last = 0;
        for (k, &(dir, i)) in jobs.iter().enumerate() {
            prop_assert_eq!(c.try_fire(), Fire::Pending);
            push(&c, dir, i, k as f64);
            let cnt = c.firing_rule_cnt();
            prop_assert!(cnt >= last && cnt <= total);
            last = cnt;
        }
        prop_assert_eq!(last, total);
        prop_assert_eq!(c.phase(), ConnectionPhase::Fireable);
        prop_assert_eq!(c.try_fire(), Fire::Ready);
        prop_assert_eq!(finish_epoch(&c).len(), jobs.len());
    }

    #[test]
    fn receive_only_ignores_sends(
        nscpy in 1usize..4,
        ndcpy in 1usize..4,
        seed in any::<u64>(),
    ) {
        let c = LocalConnection::with_rule(FiringRule::ReceiveOnly);
        for i in 0..nscpy {
            c.add_copy(Direction::Send, copy(0, i + 1, i as i32)).unwrap();
        }
        for i in 0..ndcpy {
            c.add_copy(Direction::Receive, copy(i + 1, 0, -(i as i32) - 1)).unwrap();
        }
        c.activate().unwrap();
        prop_assert_eq!(c.firing_total(), ndcpy);

        let mut recvs_left = ndcpy;
        for (dir, i) in schedule(nscpy, ndcpy, 1, seed) {
            push(&c, dir, i, 0.0);
            if dir == Direction::Receive {
                recvs_left -= 1;
            }
            prop_assert_eq!(c.is_fireable(), recvs_left == 0);
        }
    }
}
