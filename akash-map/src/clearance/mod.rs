//! Incremental obstacle clearance fields.
//!
//! For every voxel of a region, the clearance process records the scaled
//! metric distance to the nearest obstacle within a search radius. The
//! computation is incremental: occupancy touch stamps mark regions stale,
//! a time-sliced scheduler drains them oldest-first, and each region is
//! recomputed with a data-parallel brute-force neighbourhood search (or
//! handed to the GPU delegate when one is available).
//!
//! A region is stale when its clearance stamp trails the maximum occupancy
//! stamp of its 3×3×3 neighbourhood; occupancy writes next to a region
//! boundary therefore re-dirty the neighbours as well.

mod nearest;

pub(crate) use nearest::{voxel_search_half_extents, NearestParams};

use std::collections::VecDeque;
use std::time::Instant;

use bitflags::bitflags;
use log::warn;

use crate::core::{LocalKey, RegionKey, VoxelKey, WorldPoint};
use crate::gpu::{gpu_device, RangeFill};
use crate::map::occupancy::UNKNOWN_CLEARANCE;
use crate::map::OccupancyMap;
use crate::query::{query_regions, run_tiles, split_tiles};

use nearest::{nearest_obstacle, sanitise_axis_scaling};

bitflags! {
    /// Clearance query behaviour flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct QueryFlags: u32 {
        /// Evaluate regions on the GPU when a program is available.
        const GPU_EVALUATE = 1 << 0;
        /// Treat unobserved voxels as obstacles.
        const UNKNOWN_AS_OCCUPIED = 1 << 1;
        /// Report unscaled distances. Obstacle selection still uses the
        /// scaled metric.
        const REPORT_UNSCALED_RESULTS = 1 << 2;
        /// Instantiate chunks for regions that have none.
        const INSTANTIATE_UNKNOWN = 1 << 3;
    }
}

/// Outcome of one scheduler step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateResult {
    /// Every touched region is up to date.
    UpToDate,
    /// Work was done, or work remains queued.
    Progressing,
}

/// Tile shape for data-parallel traversal within a region.
const CLEARANCE_TILE: crate::core::VoxelCoord = crate::core::VoxelCoord::splat(8);

/// Incremental nearest-obstacle clearance process.
pub struct ClearanceProcess {
    search_radius: f32,
    query_flags: QueryFlags,
    axis_scaling: [f32; 3],
    parallel: bool,
    queue: VecDeque<RegionKey>,
    gpu_fill: Option<RangeFill>,
    gpu_fill_failed: bool,
    gpu_warned: bool,
}

impl ClearanceProcess {
    /// Create a process with the given search radius and flags.
    pub fn new(search_radius: f32, query_flags: QueryFlags) -> Self {
        Self {
            search_radius,
            query_flags,
            axis_scaling: [1.0, 1.0, 1.0],
            parallel: true,
            queue: VecDeque::new(),
            gpu_fill: None,
            gpu_fill_failed: false,
            gpu_warned: false,
        }
    }

    /// Search radius in meters
    #[inline]
    pub fn search_radius(&self) -> f32 {
        self.search_radius
    }

    /// Change the search radius for subsequent passes.
    pub fn set_search_radius(&mut self, radius: f32) {
        self.search_radius = radius;
    }

    /// Current flags
    #[inline]
    pub fn query_flags(&self) -> QueryFlags {
        self.query_flags
    }

    /// Change the flags for subsequent passes.
    pub fn set_query_flags(&mut self, flags: QueryFlags) {
        self.query_flags = flags;
    }

    /// Per-axis metric weights
    #[inline]
    pub fn axis_scaling(&self) -> [f32; 3] {
        self.axis_scaling
    }

    /// Change the per-axis metric weights.
    ///
    /// Components must be positive; zero or non-finite components are
    /// treated as 1 when the metric is evaluated.
    pub fn set_axis_scaling(&mut self, scaling: [f32; 3]) {
        self.axis_scaling = scaling;
    }

    /// Enable or disable data-parallel tiling within a region.
    ///
    /// Parallel and sequential traversal produce identical results.
    pub fn set_parallel(&mut self, parallel: bool) {
        self.parallel = parallel;
    }

    /// Drop queued work and any pending GPU results.
    pub fn reset(&mut self) {
        self.queue.clear();
        if let Some(fill) = self.gpu_fill.as_mut() {
            fill.clear();
        }
    }

    /// Run the time-sliced scheduler.
    ///
    /// Drains stale regions oldest-first until the queue empties or
    /// `time_slice` seconds elapse (`time_slice <= 0` disables the
    /// budget). Returns [`UpdateResult::Progressing`] while any work was
    /// done or remains.
    pub fn update(&mut self, map: &mut OccupancyMap, time_slice: f64) -> UpdateResult {
        let start = Instant::now();
        self.gpu_warned = false;
        self.flush_gpu(map);

        if self.queue.is_empty() {
            self.get_work(map);
        }

        let mut total_processed = 0usize;
        while !self.queue.is_empty()
            && (time_slice <= 0.0 || start.elapsed().as_secs_f64() < time_slice)
        {
            let Some(key) = self.queue.pop_front() else {
                break;
            };
            if self.update_region(map, key, false) {
                total_processed += 1;
            }
            if self.queue.is_empty() {
                self.get_work(map);
            }
        }

        self.flush_gpu(map);

        if total_processed != 0 || !self.queue.is_empty() {
            UpdateResult::Progressing
        } else {
            UpdateResult::UpToDate
        }
    }

    /// Recompute every region overlapping the world box `[min, max]`.
    ///
    /// With `force`, regions are recomputed regardless of staleness.
    /// Returns the number of regions updated.
    pub fn calculate_for_extents(
        &mut self,
        map: &mut OccupancyMap,
        min: WorldPoint,
        max: WorldPoint,
        force: bool,
    ) -> usize {
        self.gpu_warned = false;
        self.flush_gpu(map);

        let min_region = map.region_key(min);
        let max_region = map.region_key(max);
        let mut updated = 0usize;
        for z in min_region.z..=max_region.z {
            for y in min_region.y..=max_region.y {
                for x in min_region.x..=max_region.x {
                    if self.update_region(map, RegionKey::new(x, y, z), force) {
                        updated += 1;
                    }
                }
            }
        }

        self.flush_gpu(map);
        updated
    }

    /// Bring one region's clearance layer up to date.
    ///
    /// Returns false when the region was skipped: chunk absent and not
    /// instantiated, or already fresh without `force`. A skipped region
    /// keeps its stamp and stays dirty.
    pub fn update_region(&mut self, map: &mut OccupancyMap, region_key: RegionKey, force: bool) -> bool {
        let instantiate = self.query_flags.contains(QueryFlags::INSTANTIATE_UNKNOWN);
        if map.store_mut().region_mut(region_key, instantiate).is_none() {
            return false;
        }

        let clearance_layer = map.clearance_layer();
        // Capture the target stamp before the work: a concurrent occupancy
        // write afterwards re-dirties the region.
        let target_stamp = neighbourhood_occupancy_stamp(map, region_key);
        let current_stamp = map
            .store()
            .find_region(region_key)
            .map(|chunk| chunk.touched_stamp(clearance_layer))
            .unwrap_or(0);
        if !force && current_stamp >= target_stamp {
            return false;
        }

        let params = NearestParams {
            search_radius: self.search_radius,
            axis_scaling: sanitise_axis_scaling(self.axis_scaling),
            unknown_as_occupied: self.query_flags.contains(QueryFlags::UNKNOWN_AS_OCCUPIED),
            report_unscaled: self
                .query_flags
                .contains(QueryFlags::REPORT_UNSCALED_RESULTS),
        };

        let mut evaluated = false;
        if self.query_flags.contains(QueryFlags::GPU_EVALUATE) {
            if let Some(fill) = self.ensure_gpu_fill() {
                evaluated = fill.calculate_for_region(map, region_key, &params);
            }
            if !evaluated && !self.gpu_warned {
                warn!("clearance GPU evaluate unavailable, using CPU");
                self.gpu_warned = true;
            }
        }
        if !evaluated {
            self.cpu_update_region(map, region_key, &params);
        }

        if let Some(chunk) = map.store().find_region(region_key) {
            chunk.touch_layer(clearance_layer, target_stamp);
        }
        true
    }

    /// Scan touched regions and queue the stale ones, oldest occupancy
    /// stamp first. Repeats are allowed; the staleness check filters them
    /// cheaply when reached.
    fn get_work(&mut self, map: &OccupancyMap) {
        let occupancy_layer = map.occupancy_layer();
        let clearance_layer = map.clearance_layer();
        let mut stale: Vec<(u64, RegionKey)> = Vec::new();
        for (key, chunk) in map.store().iterate() {
            let target = neighbourhood_occupancy_stamp(map, key);
            if chunk.touched_stamp(clearance_layer) < target {
                stale.push((chunk.touched_stamp(occupancy_layer), key));
            }
        }
        stale.sort_by_key(|&(stamp, _)| stamp);
        self.queue.extend(stale.into_iter().map(|(_, key)| key));
    }

    /// Brute-force CPU pass over one region, driven through the region
    /// query walker. Results are computed into a region-sized buffer and
    /// written back afterwards, so voxel writes of this pass are never
    /// observed by its own reads.
    fn cpu_update_region(
        &self,
        map: &mut OccupancyMap,
        region_key: RegionKey,
        params: &NearestParams,
    ) -> usize {
        let min = map.region_spatial_min(region_key);
        let size = map.store().region_spatial_size();
        let half_voxel = map.resolution() * 0.5;
        let max = WorldPoint::new(
            min.x + size.x - half_voxel,
            min.y + size.y - half_voxel,
            min.z + size.z - half_voxel,
        );

        let mut values: Vec<f32> = Vec::new();
        let parallel = self.parallel;
        let visited = query_regions(map, min, max, |map, key| {
            if key != region_key {
                return 0;
            }
            values = region_clearance_values(map, key, params, parallel);
            values.len()
        });

        if !values.is_empty() {
            let layer = map.clearance_layer();
            map.write_layer_block(region_key, layer, bytemuck::cast_slice(&values));
        }
        visited
    }

    fn ensure_gpu_fill(&mut self) -> Option<&mut RangeFill> {
        if self.gpu_fill.is_none() && !self.gpu_fill_failed {
            match gpu_device() {
                Some(device) => {
                    let fill = RangeFill::new(device);
                    if fill.is_valid() {
                        self.gpu_fill = Some(fill);
                    } else {
                        self.gpu_fill_failed = true;
                        warn!("clearance GPU program build failed, falling back to CPU");
                    }
                }
                None => self.gpu_fill_failed = true,
            }
        }
        self.gpu_fill.as_mut()
    }

    fn flush_gpu(&mut self, map: &mut OccupancyMap) {
        if let Some(fill) = self.gpu_fill.as_mut() {
            fill.sync_to_main_memory(map);
            fill.clear();
        }
    }
}

/// Maximum occupancy stamp over a region and its 26 neighbours.
fn neighbourhood_occupancy_stamp(map: &OccupancyMap, region_key: RegionKey) -> u64 {
    let occupancy_layer = map.occupancy_layer();
    let mut target = 0u64;
    for dz in -1i16..=1 {
        for dy in -1i16..=1 {
            for dx in -1i16..=1 {
                if let Some(chunk) = map.store().find_region(region_key.neighbour(dx, dy, dz)) {
                    target = target.max(chunk.touched_stamp(occupancy_layer));
                }
            }
        }
    }
    target
}

/// Compute the clearance values of every voxel in a region, row-major.
fn region_clearance_values(
    map: &OccupancyMap,
    region_key: RegionKey,
    params: &NearestParams,
    parallel: bool,
) -> Vec<f32> {
    let dims = map.region_voxel_dimensions();
    let half_extents = voxel_search_half_extents(map.resolution(), params);
    let tiles = split_tiles(dims, CLEARANCE_TILE);

    let tile_results = run_tiles(&tiles, parallel, |tile| {
        let mut out = Vec::with_capacity(tile.volume());
        for z in tile.min.z..tile.max.z {
            for y in tile.min.y..tile.max.y {
                for x in tile.min.x..tile.max.x {
                    let key = VoxelKey::new(
                        region_key,
                        LocalKey::new(x as u8, y as u8, z as u8),
                    );
                    out.push(nearest_obstacle(map, key, half_extents, params));
                }
            }
        }
        out
    });

    let mut values = vec![UNKNOWN_CLEARANCE; dims.volume()];
    for (tile, result) in tiles.iter().zip(tile_results) {
        let mut i = 0;
        for z in tile.min.z..tile.max.z {
            for y in tile.min.y..tile.max.y {
                for x in tile.min.x..tile.max.x {
                    let index =
                        (z as usize * dims.y as usize + y as usize) * dims.x as usize + x as usize;
                    values[index] = result[i];
                    i += 1;
                }
            }
        }
    }
    values
}
