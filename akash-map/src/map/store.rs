//! Sparse chunk storage indexed by region key.

use fnv::FnvHashMap;

use crate::core::{RegionKey, VoxelCoord, WorldPoint};

use super::chunk::MapChunk;

/// Owns the map's region chunks.
///
/// Single-writer / many-reader: mutation goes through `&mut self`, while
/// touch stamps remain observable through shared chunk references.
#[derive(Debug)]
pub struct ChunkStore {
    chunks: FnvHashMap<RegionKey, MapChunk>,
    region_dims: VoxelCoord,
    region_spatial_size: WorldPoint,
    layer_count: usize,
}

impl ChunkStore {
    pub(crate) fn new(region_dims: VoxelCoord, resolution: f64, layer_count: usize) -> Self {
        Self {
            chunks: FnvHashMap::default(),
            region_dims,
            region_spatial_size: WorldPoint::new(
                region_dims.x as f64 * resolution,
                region_dims.y as f64 * resolution,
                region_dims.z as f64 * resolution,
            ),
            layer_count,
        }
    }

    /// Voxels per region along each axis
    #[inline]
    pub fn region_dims(&self) -> VoxelCoord {
        self.region_dims
    }

    /// World extent of one region along each axis
    #[inline]
    pub fn region_spatial_size(&self) -> WorldPoint {
        self.region_spatial_size
    }

    /// World coordinates of a region's minimum corner
    #[inline]
    pub fn region_spatial_min(&self, key: RegionKey) -> WorldPoint {
        WorldPoint::new(
            f64::from(key.x) * self.region_spatial_size.x,
            f64::from(key.y) * self.region_spatial_size.y,
            f64::from(key.z) * self.region_spatial_size.z,
        )
    }

    /// Track a layout change; only legal while no chunk exists.
    pub(crate) fn set_layer_count(&mut self, layer_count: usize) {
        debug_assert!(self.chunks.is_empty());
        self.layer_count = layer_count;
    }

    /// Number of resident chunks
    #[inline]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// True when no chunk is resident
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Look up a chunk, optionally creating it.
    pub fn region_mut(&mut self, key: RegionKey, instantiate: bool) -> Option<&mut MapChunk> {
        if instantiate {
            let spatial_min = self.region_spatial_min(key);
            let layer_count = self.layer_count;
            Some(
                self.chunks
                    .entry(key)
                    .or_insert_with(|| MapChunk::new(key, spatial_min, layer_count)),
            )
        } else {
            self.chunks.get_mut(&key)
        }
    }

    /// Look up a resident chunk
    #[inline]
    pub fn find_region(&self, key: RegionKey) -> Option<&MapChunk> {
        self.chunks.get(&key)
    }

    /// Remove a chunk. Returns true when one was resident.
    pub fn remove_region(&mut self, key: RegionKey) -> bool {
        self.chunks.remove(&key).is_some()
    }

    /// Remove chunks whose most recent touch predates `before_stamp`.
    ///
    /// Returns the number of chunks removed.
    pub fn expire_regions(&mut self, before_stamp: u64) -> usize {
        let before = self.chunks.len();
        self.chunks
            .retain(|_, chunk| chunk.max_touched_stamp() >= before_stamp);
        before - self.chunks.len()
    }

    /// Remove chunks whose nearest corner to `pivot` exceeds `radius`.
    ///
    /// Surviving chunks keep their stamps and layer blocks untouched.
    /// Returns the number of chunks removed.
    pub fn cull_distance(&mut self, pivot: WorldPoint, radius: f64) -> usize {
        let before = self.chunks.len();
        let size = self.region_spatial_size;
        self.chunks.retain(|_, chunk| {
            let min = chunk.region_spatial_min();
            let max = min + size;
            let mut dist_sq = 0.0f64;
            for axis in 0..3 {
                let lo = min.axis(axis);
                let hi = max.axis(axis);
                let p = pivot.axis(axis);
                // Nearest box vertex along this axis.
                let corner = if (lo - p).abs() <= (hi - p).abs() { lo } else { hi };
                let d = corner - p;
                dist_sq += d * d;
            }
            dist_sq.sqrt() <= radius
        });
        before - self.chunks.len()
    }

    /// Iterate resident chunks over a snapshot of the region-key set.
    ///
    /// Keys are visited in sorted (region-major) order. Chunks inserted
    /// after the iterator is created are not visited; chunks removed in the
    /// meantime are skipped.
    pub fn iterate(&self) -> RegionIter<'_> {
        let mut keys: Vec<RegionKey> = self.chunks.keys().copied().collect();
        keys.sort_unstable();
        RegionIter {
            store: self,
            keys,
            next: 0,
        }
    }

    /// Sorted snapshot of resident region keys.
    pub fn region_keys(&self) -> Vec<RegionKey> {
        let mut keys: Vec<RegionKey> = self.chunks.keys().copied().collect();
        keys.sort_unstable();
        keys
    }
}

/// Restartable iterator over `(region_key, &chunk)` pairs.
pub struct RegionIter<'a> {
    store: &'a ChunkStore,
    keys: Vec<RegionKey>,
    next: usize,
}

impl<'a> RegionIter<'a> {
    /// Rewind to the first snapshot key.
    pub fn reset(&mut self) {
        self.next = 0;
    }
}

impl<'a> Iterator for RegionIter<'a> {
    type Item = (RegionKey, &'a MapChunk);

    fn next(&mut self) -> Option<Self::Item> {
        while self.next < self.keys.len() {
            let key = self.keys[self.next];
            self.next += 1;
            if let Some(chunk) = self.store.find_region(key) {
                return Some((key, chunk));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> ChunkStore {
        ChunkStore::new(VoxelCoord::splat(32), 0.1, 2)
    }

    #[test]
    fn test_instantiate_and_find() {
        let mut store = test_store();
        let key = RegionKey::new(1, -2, 0);

        assert!(store.region_mut(key, false).is_none());
        assert!(store.find_region(key).is_none());

        let chunk = store.region_mut(key, true).unwrap();
        assert_eq!(chunk.region_key(), key);
        assert_eq!(store.len(), 1);
        assert!(store.find_region(key).is_some());
    }

    #[test]
    fn test_region_spatial_min() {
        let store = test_store();
        let min = store.region_spatial_min(RegionKey::new(1, -1, 0));
        assert_eq!(min, WorldPoint::new(3.2, -3.2, 0.0));
    }

    #[test]
    fn test_remove_region() {
        let mut store = test_store();
        let key = RegionKey::new(0, 0, 0);
        store.region_mut(key, true);
        assert!(store.remove_region(key));
        assert!(!store.remove_region(key));
        assert!(store.is_empty());
    }

    #[test]
    fn test_expire_regions_by_stamp() {
        let mut store = test_store();
        let old = RegionKey::new(0, 0, 0);
        let fresh = RegionKey::new(1, 0, 0);
        store.region_mut(old, true).unwrap().set_touched_stamp(crate::layout::LayerIndex(0), 3);
        store
            .region_mut(fresh, true)
            .unwrap()
            .set_touched_stamp(crate::layout::LayerIndex(0), 9);

        assert_eq!(store.expire_regions(5), 1);
        assert!(store.find_region(old).is_none());
        assert!(store.find_region(fresh).is_some());
    }

    #[test]
    fn test_cull_distance_uses_nearest_corner() {
        let mut store = test_store();
        // Region (0,0,0) spans [0, 3.2]^3: nearest corner to origin is 0.
        store.region_mut(RegionKey::new(0, 0, 0), true);
        // Region (3,0,0) spans [9.6, 12.8] on x: nearest corner at 9.6m.
        store.region_mut(RegionKey::new(3, 0, 0), true);

        assert_eq!(store.cull_distance(WorldPoint::ZERO, 5.0), 1);
        assert!(store.find_region(RegionKey::new(0, 0, 0)).is_some());
        assert!(store.find_region(RegionKey::new(3, 0, 0)).is_none());
    }

    #[test]
    fn test_iterate_sorted_and_restartable() {
        let mut store = test_store();
        for key in [
            RegionKey::new(1, 0, 0),
            RegionKey::new(-1, 5, 2),
            RegionKey::new(0, 0, 0),
        ] {
            store.region_mut(key, true);
        }

        let mut iter = store.iterate();
        let first: Vec<RegionKey> = iter.by_ref().map(|(k, _)| k).collect();
        assert_eq!(
            first,
            vec![
                RegionKey::new(-1, 5, 2),
                RegionKey::new(0, 0, 0),
                RegionKey::new(1, 0, 0),
            ]
        );

        iter.reset();
        let second: Vec<RegionKey> = iter.map(|(k, _)| k).collect();
        assert_eq!(first, second);
        assert_eq!(store.region_keys(), first);
    }
}
