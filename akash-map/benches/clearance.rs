//! Clearance pass benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use akash_map::core::{RegionKey, VoxelCoord, WorldPoint};
use akash_map::{ClearanceProcess, MapConfig, OccupancyMap, QueryFlags};

fn populated_map(region_dim: i32) -> OccupancyMap {
    let config = MapConfig {
        region_voxel_dimensions: VoxelCoord::splat(region_dim),
        ..Default::default()
    };
    let mut map = OccupancyMap::new(config).unwrap();
    // Scatter obstacles through the first region.
    let extent = region_dim as f64 * 0.1;
    let mut x = 0.05;
    while x < extent {
        map.integrate_hit(WorldPoint::new(x, x * 0.7 % extent, x * 0.3 % extent));
        x += 0.35;
    }
    map
}

fn bench_region_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("clearance_region_update");

    for &region_dim in &[16i32, 32] {
        group.bench_function(format!("region_{0}x{0}x{0}", region_dim), |b| {
            let mut map = populated_map(region_dim);
            let mut process = ClearanceProcess::new(0.3, QueryFlags::empty());
            b.iter(|| {
                process.update_region(&mut map, RegionKey::new(0, 0, 0), true);
                black_box(&map);
            });
        });
    }
    group.finish();
}

fn bench_sequential_vs_parallel(c: &mut Criterion) {
    let mut group = c.benchmark_group("clearance_tiling");

    for &parallel in &[false, true] {
        let name = if parallel { "parallel" } else { "sequential" };
        group.bench_function(name, |b| {
            let mut map = populated_map(32);
            let mut process = ClearanceProcess::new(0.3, QueryFlags::empty());
            process.set_parallel(parallel);
            b.iter(|| {
                process.update_region(&mut map, RegionKey::new(0, 0, 0), true);
                black_box(&map);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_region_update, bench_sequential_vs_parallel);
criterion_main!(benches);
