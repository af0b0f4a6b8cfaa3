//! Build a small synthetic map, run the clearance process and print stats.
//!
//! Run with: cargo run --example generate_map

use akash_map::core::WorldPoint;
use akash_map::{ClearanceProcess, MapConfig, OccupancyMap, QueryFlags, UpdateResult};

fn main() {
    env_logger::init();

    let mut map = OccupancyMap::new(MapConfig::default()).unwrap();

    // A 4m x 4m room: walls sampled every half voxel, rays from the centre.
    let origin = WorldPoint::new(2.0, 2.0, 0.5);
    let mut s = 0.0f64;
    while s < 4.0 {
        for (x, y) in [(s, 0.0), (s, 4.0), (0.0, s), (4.0, s)] {
            map.integrate_ray(origin, WorldPoint::new(x, y, 0.5));
        }
        s += 0.05;
    }

    let mut clearance = ClearanceProcess::new(0.5, QueryFlags::empty());
    let mut passes = 0;
    while clearance.update(&mut map, 0.01) == UpdateResult::Progressing {
        passes += 1;
    }

    let extents = map.extents().unwrap();
    println!(
        "map: {} chunks, stamp {}, extents ({:.1}, {:.1}, {:.1}) .. ({:.1}, {:.1}, {:.1})",
        map.store().len(),
        map.stamp(),
        extents.min.x,
        extents.min.y,
        extents.min.z,
        extents.max.x,
        extents.max.y,
        extents.max.z,
    );
    println!("clearance converged after {} update passes", passes);

    // Clearance at the room centre: nothing within 0.5m.
    let key = map.voxel_key(origin);
    let centre_clearance: f32 = map
        .voxel(map.clearance_layer(), key)
        .value()
        .unwrap_or(-1.0);
    println!("clearance at room centre: {:.2}m", centre_clearance);

    // Clearance next to a wall.
    let key = map.voxel_key(WorldPoint::new(0.15, 2.0, 0.5));
    let wall_clearance: f32 = map
        .voxel(map.clearance_layer(), key)
        .value()
        .unwrap_or(-1.0);
    println!("clearance 0.1m from a wall: {:.2}m", wall_clearance);
}
