//! The occupancy map: chunked voxel storage with a layered data model.
//!
//! An [`OccupancyMap`] owns a sparse set of region chunks, a frozen layer
//! layout and a monotonic write-stamp counter. Sensor integration writes
//! the occupancy (and mean) layers through typed accessors; derived
//! processes such as [`crate::clearance::ClearanceProcess`] read the touch
//! stamps to find work.

pub mod chunk;
pub mod covariance;
pub mod heightmap;
pub mod occupancy;
pub mod store;
mod voxel;

pub use chunk::MapChunk;
pub use covariance::CovarianceVoxel;
pub use heightmap::{add_heightmap_layers, HeightmapVoxel};
pub use occupancy::{OccupancyType, VoxelMean};
pub use store::{ChunkStore, RegionIter};
pub use voxel::{Voxel, VoxelMut};

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use bytemuck::Pod;

use crate::config::MapConfig;
use crate::core::{Aabb, RegionKey, VoxelCoord, VoxelKey, WorldPoint};
use crate::error::{MapError, Result};
use crate::layout::{
    LayerIndex, MapLayout, CLEARANCE_LAYER, COVARIANCE_LAYER, MEAN_LAYER, OCCUPANCY_LAYER,
};

use occupancy::{integrate_value, is_occupied_value, UNKNOWN_CLEARANCE, UNOBSERVED_VALUE};

/// Probabilistic 3D occupancy map.
pub struct OccupancyMap {
    config: MapConfig,
    layout: MapLayout,
    store: ChunkStore,
    stamp: AtomicU64,

    // Layer indices and occupancy values resolved once at map-open time.
    occupancy_layer: LayerIndex,
    clearance_layer: LayerIndex,
    mean_layer: Option<LayerIndex>,
    covariance_layer: Option<LayerIndex>,
    hit_value: f32,
    miss_value: f32,
    min_value: f32,
    max_value: f32,
    occupancy_threshold_value: f32,
}

impl OccupancyMap {
    /// Open a map with the standard layers for `config`.
    pub fn new(config: MapConfig) -> Result<Self> {
        config.validate()?;

        let mut layout = MapLayout::new();
        layout.add_layer(OCCUPANCY_LAYER, 4, 4, &UNOBSERVED_VALUE.to_le_bytes())?;
        if config.enable_mean {
            let size = std::mem::size_of::<VoxelMean>();
            layout.add_layer(MEAN_LAYER, size, 4, &[0u8; 8])?;
        }
        if config.enable_covariance {
            let size = std::mem::size_of::<CovarianceVoxel>();
            layout.add_layer(COVARIANCE_LAYER, size, 4, &[0u8; 24])?;
        }
        layout.add_layer(CLEARANCE_LAYER, 4, 4, &UNKNOWN_CLEARANCE.to_le_bytes())?;

        Self::from_parts(config, layout, 0)
    }

    /// Assemble a map from an existing layout (deserialisation).
    ///
    /// The layout must carry at least the occupancy and clearance layers.
    pub(crate) fn from_parts(config: MapConfig, layout: MapLayout, stamp: u64) -> Result<Self> {
        config.validate()?;
        let occupancy_layer = layout.layer_index(OCCUPANCY_LAYER).ok_or_else(|| {
            MapError::InvalidLayer(format!("missing '{}' layer", OCCUPANCY_LAYER))
        })?;
        let clearance_layer = layout.layer_index(CLEARANCE_LAYER).ok_or_else(|| {
            MapError::InvalidLayer(format!("missing '{}' layer", CLEARANCE_LAYER))
        })?;
        let mean_layer = layout.layer_index(MEAN_LAYER);
        let covariance_layer = layout.layer_index(COVARIANCE_LAYER);

        let occ = &config.occupancy;
        let store = ChunkStore::new(
            config.region_voxel_dimensions,
            config.resolution,
            layout.layer_count(),
        );
        Ok(Self {
            hit_value: occupancy::probability_to_value(occ.hit_probability),
            miss_value: occupancy::probability_to_value(occ.miss_probability),
            min_value: occupancy::probability_to_value(occ.min_probability),
            max_value: occupancy::probability_to_value(occ.max_probability),
            occupancy_threshold_value: occupancy::probability_to_value(occ.occupancy_threshold),
            config,
            layout,
            store,
            stamp: AtomicU64::new(stamp),
            occupancy_layer,
            clearance_layer,
            mean_layer,
            covariance_layer,
        })
    }

    // ── Configuration and layout ────────────────────────────────────────

    /// Map configuration
    #[inline]
    pub fn config(&self) -> &MapConfig {
        &self.config
    }

    /// Voxel edge length in meters
    #[inline]
    pub fn resolution(&self) -> f64 {
        self.config.resolution
    }

    /// Voxels per region along each axis
    #[inline]
    pub fn region_voxel_dimensions(&self) -> VoxelCoord {
        self.config.region_voxel_dimensions
    }

    /// Voxels per region
    #[inline]
    pub fn region_voxel_count(&self) -> usize {
        self.config.region_voxel_dimensions.volume()
    }

    /// The layer layout
    #[inline]
    pub fn layout(&self) -> &MapLayout {
        &self.layout
    }

    /// Append a layer to the layout.
    ///
    /// Fails once any chunk exists: resident chunks would miss the block.
    pub fn add_layer(
        &mut self,
        name: &str,
        element_size: usize,
        alignment: usize,
        default_bytes: &[u8],
    ) -> Result<LayerIndex> {
        if !self.store.is_empty() {
            return Err(MapError::LayoutFrozen(format!(
                "cannot add layer '{}' with {} chunk(s) resident",
                name,
                self.store.len()
            )));
        }
        let index = self
            .layout
            .add_layer(name, element_size, alignment, default_bytes)?;
        self.store.set_layer_count(self.layout.layer_count());
        Ok(index)
    }

    /// Index of the occupancy layer
    #[inline]
    pub fn occupancy_layer(&self) -> LayerIndex {
        self.occupancy_layer
    }

    /// Index of the clearance layer
    #[inline]
    pub fn clearance_layer(&self) -> LayerIndex {
        self.clearance_layer
    }

    /// Index of the sub-voxel mean layer, when enabled
    #[inline]
    pub fn mean_layer(&self) -> Option<LayerIndex> {
        self.mean_layer
    }

    /// Index of the covariance layer, when enabled
    #[inline]
    pub fn covariance_layer(&self) -> Option<LayerIndex> {
        self.covariance_layer
    }

    /// Log-odds increment applied by a hit
    #[inline]
    pub fn hit_value(&self) -> f32 {
        self.hit_value
    }

    /// Log-odds increment applied by a miss
    #[inline]
    pub fn miss_value(&self) -> f32 {
        self.miss_value
    }

    /// Log-odds value at and above which a voxel reads as occupied
    #[inline]
    pub fn occupancy_threshold_value(&self) -> f32 {
        self.occupancy_threshold_value
    }

    // ── Stamps ──────────────────────────────────────────────────────────

    /// Current map write generation
    #[inline]
    pub fn stamp(&self) -> u64 {
        self.stamp.load(Ordering::Acquire)
    }

    // ── Coordinate algebra ──────────────────────────────────────────────

    /// Global voxel coordinate containing `p` (floor semantics).
    #[inline]
    pub fn voxel_coord_of(&self, p: WorldPoint) -> VoxelCoord {
        let res = self.config.resolution;
        VoxelCoord::new(
            (p.x / res).floor() as i32,
            (p.y / res).floor() as i32,
            (p.z / res).floor() as i32,
        )
    }

    /// Key of the voxel containing `p`.
    #[inline]
    pub fn voxel_key(&self, p: WorldPoint) -> VoxelKey {
        self.key_from_voxel_coord(self.voxel_coord_of(p))
    }

    /// Key addressing a global voxel coordinate.
    #[inline]
    pub fn key_from_voxel_coord(&self, coord: VoxelCoord) -> VoxelKey {
        VoxelKey::from_voxel_coord(coord, self.config.region_voxel_dimensions)
    }

    /// Global voxel coordinate addressed by `key`.
    #[inline]
    pub fn voxel_coord(&self, key: VoxelKey) -> VoxelCoord {
        key.voxel_coord(self.config.region_voxel_dimensions)
    }

    /// World coordinates of a voxel's centre.
    #[inline]
    pub fn voxel_centre(&self, key: VoxelKey) -> WorldPoint {
        let coord = self.voxel_coord(key);
        let res = self.config.resolution;
        WorldPoint::new(
            (f64::from(coord.x) + 0.5) * res,
            (f64::from(coord.y) + 0.5) * res,
            (f64::from(coord.z) + 0.5) * res,
        )
    }

    /// Region containing `p`.
    #[inline]
    pub fn region_key(&self, p: WorldPoint) -> RegionKey {
        self.voxel_key(p).region
    }

    /// World coordinates of a region's minimum corner.
    #[inline]
    pub fn region_spatial_min(&self, region: RegionKey) -> WorldPoint {
        self.store.region_spatial_min(region)
    }

    /// Key offset by voxel deltas, carrying between local and region parts.
    #[inline]
    pub fn move_key(&self, key: VoxelKey, dx: i32, dy: i32, dz: i32) -> VoxelKey {
        key.moved(dx, dy, dz, self.config.region_voxel_dimensions)
    }

    /// Row-major index of a local key within a chunk block.
    #[inline]
    pub fn voxel_index(&self, local: crate::core::LocalKey) -> usize {
        let dims = self.config.region_voxel_dimensions;
        (local.z as usize * dims.y as usize + local.y as usize) * dims.x as usize
            + local.x as usize
    }

    /// Union of resident chunk bounds, `None` for an empty map.
    pub fn extents(&self) -> Option<Aabb> {
        let size = self.store.region_spatial_size();
        let mut bounds: Option<Aabb> = None;
        for (_, chunk) in self.store.iterate() {
            let min = chunk.region_spatial_min();
            let max = min + size;
            match &mut bounds {
                Some(aabb) => {
                    aabb.expand_to_include(min);
                    aabb.expand_to_include(max);
                }
                None => bounds = Some(Aabb::new(min, max)),
            }
        }
        bounds
    }

    // ── Chunk store ─────────────────────────────────────────────────────

    /// Shared access to the chunk store
    #[inline]
    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    /// Exclusive access to the chunk store
    #[inline]
    pub fn store_mut(&mut self) -> &mut ChunkStore {
        &mut self.store
    }

    /// Replace a chunk's entire block for `layer` with `data`.
    ///
    /// The chunk must be resident and `data` must be one full block. Used
    /// by bulk writers (clearance pass, GPU readback, deserialisation);
    /// the caller is responsible for advancing the layer's touch stamp.
    pub(crate) fn write_layer_block(
        &mut self,
        region: RegionKey,
        layer: LayerIndex,
        data: &[u8],
    ) -> bool {
        let voxel_count = self.region_voxel_count();
        if data.len() != self.layout.chunk_byte_size(layer, voxel_count) {
            debug_assert!(false, "layer block size mismatch");
            return false;
        }
        let Some(chunk) = self.store.region_mut(region, false) else {
            return false;
        };
        chunk
            .layer_bytes_mut(&self.layout, layer, voxel_count)
            .copy_from_slice(data);
        true
    }

    // ── Voxel accessors ─────────────────────────────────────────────────

    /// Read-only typed view over `layer` at `key`.
    pub fn voxel<T: Pod>(&self, layer: LayerIndex, key: VoxelKey) -> Voxel<'_, T> {
        Voxel::new(self, layer, key)
    }

    /// Mutable typed view over `layer` at `key`.
    pub fn voxel_mut<T: Pod>(
        &mut self,
        layer: LayerIndex,
        key: VoxelKey,
        instantiate: bool,
    ) -> VoxelMut<'_, T> {
        VoxelMut::new(self, layer, key, instantiate)
    }

    // ── Occupancy integration ───────────────────────────────────────────

    /// Stored occupancy value at `key`, `None` for non-resident chunks.
    pub fn occupancy_value(&self, key: VoxelKey) -> Option<f32> {
        self.voxel::<f32>(self.occupancy_layer, key).value()
    }

    /// True when the voxel at `key` reads as occupied.
    pub fn is_occupied(&self, key: VoxelKey) -> bool {
        self.occupancy_value(key)
            .is_some_and(|v| is_occupied_value(v, self.occupancy_threshold_value))
    }

    /// Occupancy classification at `key`; non-resident reads as unobserved.
    pub fn occupancy_type(&self, key: VoxelKey) -> OccupancyType {
        match self.occupancy_value(key) {
            Some(v) => occupancy::occupancy_type(v, self.occupancy_threshold_value),
            None => OccupancyType::Unobserved,
        }
    }

    fn update_occupancy(&mut self, key: VoxelKey, observation: f32) {
        let (min_value, max_value) = (self.min_value, self.max_value);
        let layer = self.occupancy_layer;
        let mut voxel = self.voxel_mut::<f32>(layer, key, true);
        let mut value = UNOBSERVED_VALUE;
        voxel.read(&mut value);
        voxel.write(integrate_value(value, observation, min_value, max_value));
    }

    /// Integrate a hit observation at `p`.
    ///
    /// Updates the occupancy layer and, when present, the sub-voxel mean.
    /// Returns the key of the updated voxel.
    pub fn integrate_hit(&mut self, p: WorldPoint) -> VoxelKey {
        let key = self.voxel_key(p);
        let hit = self.hit_value;
        self.update_occupancy(key, hit);

        if let Some(mean_layer) = self.mean_layer {
            let centre = self.voxel_centre(key);
            let res = self.config.resolution;
            let offset = [
                ((p.x - centre.x) / res) as f32,
                ((p.y - centre.y) / res) as f32,
                ((p.z - centre.z) / res) as f32,
            ];
            let max_samples = self.config.occupancy.max_mean_samples;
            let mut voxel = self.voxel_mut::<VoxelMean>(mean_layer, key, true);
            let mut mean = VoxelMean::default();
            voxel.read(&mut mean);
            mean.update(offset, max_samples);
            voxel.write(mean);
        }
        key
    }

    /// Integrate a miss observation at `p`. Returns the voxel key.
    pub fn integrate_miss(&mut self, p: WorldPoint) -> VoxelKey {
        let key = self.voxel_key(p);
        let miss = self.miss_value;
        self.update_occupancy(key, miss);
        key
    }

    /// Integrate a full ranging observation: misses along the segment from
    /// `origin` to `sample`, then a hit at `sample`.
    ///
    /// Voxel traversal follows the standard 3D DDA; the sample voxel itself
    /// only receives the hit.
    pub fn integrate_ray(&mut self, origin: WorldPoint, sample: WorldPoint) -> VoxelKey {
        let res = self.config.resolution;
        let start = self.voxel_coord_of(origin);
        let end = self.voxel_coord_of(sample);
        let miss = self.miss_value;

        let mut key = self.key_from_voxel_coord(start);
        let end_key = self.key_from_voxel_coord(end);

        let dir = sample - origin;
        let mut step = [0i32; 3];
        let mut t_max = [f64::INFINITY; 3];
        let mut t_delta = [f64::INFINITY; 3];
        for axis in 0..3 {
            let d = dir.axis(axis);
            if d > 0.0 {
                step[axis] = 1;
                let boundary = (f64::from(start.axis(axis)) + 1.0) * res;
                t_max[axis] = (boundary - origin.axis(axis)) / d;
                t_delta[axis] = res / d;
            } else if d < 0.0 {
                step[axis] = -1;
                let boundary = f64::from(start.axis(axis)) * res;
                t_max[axis] = (boundary - origin.axis(axis)) / d;
                t_delta[axis] = -res / d;
            }
        }

        let max_steps = ((end.x - start.x).abs()
            + (end.y - start.y).abs()
            + (end.z - start.z).abs()) as usize
            + 3;
        for _ in 0..max_steps {
            if key == end_key {
                break;
            }
            self.update_occupancy(key, miss);
            let axis = if t_max[0] <= t_max[1] && t_max[0] <= t_max[2] {
                0
            } else if t_max[1] <= t_max[2] {
                1
            } else {
                2
            };
            t_max[axis] += t_delta[axis];
            key = match axis {
                0 => self.move_key(key, step[0], 0, 0),
                1 => self.move_key(key, 0, step[1], 0),
                _ => self.move_key(key, 0, 0, step[2]),
            };
        }

        self.integrate_hit(sample)
    }

    // ── Serialisation ───────────────────────────────────────────────────

    /// Save the map to a binary file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        crate::io::save_map(self, path)
    }

    /// Load a map from a binary file.
    ///
    /// Geometry and layout come from the file; occupancy parameters come
    /// from `config`.
    pub fn load<P: AsRef<Path>>(path: P, config: MapConfig) -> Result<Self> {
        crate::io::load_map(path, config)
    }
}

impl std::fmt::Debug for OccupancyMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OccupancyMap")
            .field("resolution", &self.config.resolution)
            .field("region_voxel_dimensions", &self.config.region_voxel_dimensions)
            .field("layers", &self.layout.layer_count())
            .field("chunks", &self.store.len())
            .field("stamp", &self.stamp())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn test_map() -> OccupancyMap {
        OccupancyMap::new(MapConfig::default()).unwrap()
    }

    #[test]
    fn test_voxel_key_floor_semantics() {
        let map = test_map();
        // Negative coordinates floor toward negative infinity.
        let key = map.voxel_key(WorldPoint::new(-0.05, 0.05, -3.21));
        assert_eq!(map.voxel_coord(key), VoxelCoord::new(-1, 0, -33));
    }

    #[test]
    fn test_voxel_centre() {
        let map = test_map();
        let key = map.voxel_key(WorldPoint::new(0.0, 0.0, 0.0));
        let centre = map.voxel_centre(key);
        assert_relative_eq!(centre.x, 0.05, epsilon = 1e-9);
        assert_relative_eq!(centre.y, 0.05, epsilon = 1e-9);
        assert_relative_eq!(centre.z, 0.05, epsilon = 1e-9);
    }

    #[test]
    fn test_integrate_hit_marks_occupied() {
        let mut map = test_map();
        let key = map.integrate_hit(WorldPoint::ZERO);
        assert!(map.is_occupied(key));
        assert_eq!(map.occupancy_type(key), OccupancyType::Occupied);
        assert_relative_eq!(
            map.occupancy_value(key).unwrap(),
            map.hit_value(),
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_integrate_miss_marks_free() {
        let mut map = test_map();
        let key = map.integrate_miss(WorldPoint::ZERO);
        assert_eq!(map.occupancy_type(key), OccupancyType::Free);
        assert!(!map.is_occupied(key));
    }

    #[test]
    fn test_integrate_hit_updates_mean() {
        let mut map = test_map();
        let p = WorldPoint::new(0.07, 0.02, 0.05);
        let key = map.integrate_hit(p);
        let mean_layer = map.mean_layer().unwrap();
        let mean: VoxelMean = map.voxel(mean_layer, key).value().unwrap();
        assert_eq!(mean.count, 1);
        let offset = mean.unpack();
        // Voxel centre is (0.05, 0.05, 0.05); offsets are fractions of 0.1m.
        assert_relative_eq!(offset[0], 0.2, epsilon = 2e-2);
        assert_relative_eq!(offset[1], -0.3, epsilon = 2e-2);
        assert_relative_eq!(offset[2], 0.0, epsilon = 2e-2);
    }

    #[test]
    fn test_integrate_ray_frees_intermediate_voxels() {
        let mut map = test_map();
        let hit_key = map.integrate_ray(WorldPoint::ZERO, WorldPoint::new(0.45, 0.0, 0.0));

        assert!(map.is_occupied(hit_key));
        for x in 0..4 {
            let key = map.key_from_voxel_coord(VoxelCoord::new(x, 0, 0));
            assert_eq!(map.occupancy_type(key), OccupancyType::Free, "voxel {}", x);
        }
    }

    #[test]
    fn test_add_layer_fails_after_first_chunk() {
        let mut map = test_map();
        assert!(map.add_layer("intensity", 4, 4, &[0; 4]).is_ok());
        map.integrate_hit(WorldPoint::ZERO);
        assert!(matches!(
            map.add_layer("late", 4, 4, &[0; 4]),
            Err(MapError::LayoutFrozen(_))
        ));
    }

    #[test]
    fn test_extents_cover_chunks() {
        let mut map = test_map();
        assert!(map.extents().is_none());
        map.integrate_hit(WorldPoint::ZERO);
        map.integrate_hit(WorldPoint::new(5.0, 0.0, 0.0));
        let aabb = map.extents().unwrap();
        assert!(aabb.contains(WorldPoint::new(5.0, 0.1, 0.1)));
        assert_relative_eq!(aabb.min.x, 0.0, epsilon = 1e-9);
        assert_relative_eq!(aabb.max.x, 6.4, epsilon = 1e-9);
    }
}
