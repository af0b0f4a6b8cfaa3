//! Region query driver: walk regions overlapping a world box, with
//! optional data-parallel tiling inside a region.

use rayon::prelude::*;

use crate::core::{RegionKey, VoxelCoord, WorldPoint};
use crate::map::OccupancyMap;

/// Visit every region whose AABB intersects the world box `[min, max]`,
/// calling `worker(map, region_key)`. The worker returns the number of
/// voxels it visited; the total is returned.
///
/// Regions are visited in row-major key order regardless of residency;
/// workers decide whether a non-resident region is worth instantiating.
pub fn query_regions<F>(
    map: &OccupancyMap,
    min: WorldPoint,
    max: WorldPoint,
    mut worker: F,
) -> usize
where
    F: FnMut(&OccupancyMap, RegionKey) -> usize,
{
    let min_region = map.region_key(min);
    let max_region = map.region_key(max);
    let mut visited = 0usize;
    for z in min_region.z..=max_region.z {
        for y in min_region.y..=max_region.y {
            for x in min_region.x..=max_region.x {
                visited += worker(map, RegionKey::new(x, y, z));
            }
        }
    }
    visited
}

/// Inclusive-exclusive block of local voxel coordinates within a region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tile {
    /// First voxel of the block
    pub min: VoxelCoord,
    /// One past the last voxel of the block
    pub max: VoxelCoord,
}

impl Tile {
    /// Number of voxels covered
    pub fn volume(&self) -> usize {
        ((self.max.x - self.min.x) as usize)
            * ((self.max.y - self.min.y) as usize)
            * ((self.max.z - self.min.z) as usize)
    }
}

/// Subdivide a region's voxel grid into 3D blocks of at most `tile_shape`
/// voxels, in row-major order.
pub fn split_tiles(dims: VoxelCoord, tile_shape: VoxelCoord) -> Vec<Tile> {
    let shape = VoxelCoord::new(
        tile_shape.x.clamp(1, dims.x),
        tile_shape.y.clamp(1, dims.y),
        tile_shape.z.clamp(1, dims.z),
    );
    let mut tiles = Vec::new();
    let mut z = 0;
    while z < dims.z {
        let mut y = 0;
        while y < dims.y {
            let mut x = 0;
            while x < dims.x {
                tiles.push(Tile {
                    min: VoxelCoord::new(x, y, z),
                    max: VoxelCoord::new(
                        (x + shape.x).min(dims.x),
                        (y + shape.y).min(dims.y),
                        (z + shape.z).min(dims.z),
                    ),
                });
                x += shape.x;
            }
            y += shape.y;
        }
        z += shape.z;
    }
    tiles
}

/// Run `work` over each tile, optionally in parallel.
///
/// Results come back in tile order either way, so parallel execution is
/// indistinguishable from sequential traversal for associative workers.
pub fn run_tiles<R, F>(tiles: &[Tile], parallel: bool, work: F) -> Vec<R>
where
    R: Send,
    F: Fn(&Tile) -> R + Sync,
{
    if parallel {
        tiles.par_iter().map(&work).collect()
    } else {
        tiles.iter().map(&work).collect()
    }
}
