use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use halo_sync::algs::{HaloConfig, HaloExchange};
use halo_sync::geometry::IndexBox;
use halo_sync::layout::VecLayout;
use halo_sync::sync::{CopyDescriptor, Direction, LocalConnection};

fn connection(copies: usize) -> LocalConnection {
    let c = LocalConnection::new();
    for i in 0..copies {
        let b = IndexBox::from_size([i as i32, 0, 0], [1, 8, 1]);
        c.add_copy(
            Direction::Send,
            CopyDescriptor::new(Some(0), Some(i + 1), b, b, 1).unwrap(),
        )
        .unwrap();
        c.add_copy(
            Direction::Receive,
            CopyDescriptor::new(Some(i + 1), Some(0), b, b, 1).unwrap(),
        )
        .unwrap();
    }
    c.activate().unwrap();
    c
}

fn bench_epoch(c: &mut Criterion) {
    let mut group = c.benchmark_group("connection_epoch");
    for &copies in &[4usize, 26, 64] {
        let conn = connection(copies);
        let mut order: Vec<(Direction, usize)> = Direction::BOTH
            .iter()
            .flat_map(|&d| (0..copies).map(move |i| (d, i)))
            .collect();
        order.shuffle(&mut SmallRng::seed_from_u64(42));
        group.bench_with_input(BenchmarkId::from_parameter(copies), &order, |b, order| {
            b.iter(|| {
                for &(dir, i) in order {
                    let p = conn.acquire_package(dir, i).unwrap();
                    match dir {
                        Direction::Send => conn.complete_send(i, p).unwrap(),
                        Direction::Receive => conn.complete_receive(i, p).unwrap(),
                    };
                }
                conn.consume(|_, _, _| Ok(())).unwrap();
                conn.reset_for_next_epoch().unwrap();
            })
        });
    }
    group.finish();
}

fn bench_fill_boundary(c: &mut Criterion) {
    let layout = VecLayout::tiled(IndexBox::new([0, 0, 0], [63, 63, 0]), [16, 16, 1]);
    let cfg = HaloConfig {
        n_grow: [2, 2, 0],
        ..HaloConfig::default()
    };
    let ex = HaloExchange::new(&layout, cfg).unwrap();
    let mut fabs: Vec<_> = (0..ex.num_patches())
        .map(|p| {
            let mut f = ex.make_fab(p).unwrap();
            f.fill_valid(|iv, _| (iv[0] + iv[1]) as f64);
            f
        })
        .collect();
    c.bench_function("fill_boundary_16_patches", |b| {
        b.iter(|| {
            let mut owned: Vec<_> = fabs.iter_mut().enumerate().collect();
            ex.fill_boundary(&mut owned).unwrap();
        })
    });
}

criterion_group!(benches, bench_epoch, bench_fill_boundary);
criterion_main!(benches);
