//! Typed voxel accessors.
//!
//! An accessor binds a map, a layer index and a current key. Resolving the
//! key locates the owning chunk and the voxel's byte offset within the
//! layer block. Crossing a region boundary with `set_key` rebinds the
//! chunk; callers are not required to batch accesses by chunk.

use std::marker::PhantomData;
use std::sync::atomic::Ordering;

use bytemuck::{Pod, Zeroable};

use crate::core::VoxelKey;
use crate::layout::LayerIndex;

use super::chunk::MapChunk;
use super::OccupancyMap;

/// Read-only typed view over one layer of one voxel.
pub struct Voxel<'a, T> {
    map: &'a OccupancyMap,
    layer: LayerIndex,
    element_size: usize,
    key: VoxelKey,
    chunk: Option<&'a MapChunk>,
    _marker: PhantomData<T>,
}

impl<'a, T: Pod> Voxel<'a, T> {
    pub(crate) fn new(map: &'a OccupancyMap, layer: LayerIndex, key: VoxelKey) -> Self {
        let element_size = map.layout.voxel_byte_size(layer);
        assert_eq!(
            std::mem::size_of::<T>(),
            element_size,
            "accessor type does not match layer '{}' element size",
            map.layout.layer(layer).name()
        );
        Self {
            map,
            layer,
            element_size,
            key,
            chunk: map.store.find_region(key.region),
            _marker: PhantomData,
        }
    }

    /// Re-target the accessor, rebinding the chunk when the region changes.
    #[inline]
    pub fn set_key(&mut self, key: VoxelKey) {
        if key.region != self.key.region || self.chunk.is_none() {
            self.chunk = self.map.store.find_region(key.region);
        }
        self.key = key;
    }

    /// Current key
    #[inline]
    pub fn key(&self) -> VoxelKey {
        self.key
    }

    /// True when the key resolves to a resident chunk
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.chunk.is_some()
    }

    /// Read the voxel value into `value`.
    ///
    /// Returns false and leaves `value` untouched when the accessor is
    /// invalid. A resident chunk whose layer block was never touched reads
    /// as the layer default without allocating.
    pub fn read(&self, value: &mut T) -> bool {
        let Some(chunk) = self.chunk else {
            return false;
        };
        let index = self.map.voxel_index(self.key.local);
        match chunk.voxel_bytes(self.layer, index, self.element_size) {
            Some(bytes) => *value = bytemuck::pod_read_unaligned(bytes),
            None => *value = bytemuck::pod_read_unaligned(self.map.layout.default_bytes(self.layer)),
        }
        true
    }

    /// Read the voxel value, `None` when the accessor is invalid.
    pub fn value(&self) -> Option<T> {
        let mut value = T::zeroed();
        self.read(&mut value).then_some(value)
    }
}

/// Mutable typed view over one layer of one voxel.
///
/// With `instantiate` set, the first write creates the owning chunk;
/// otherwise writes to a non-resident chunk are silent no-ops.
pub struct VoxelMut<'a, T> {
    map: &'a mut OccupancyMap,
    layer: LayerIndex,
    element_size: usize,
    key: VoxelKey,
    instantiate: bool,
    _marker: PhantomData<T>,
}

impl<'a, T: Pod> VoxelMut<'a, T> {
    pub(crate) fn new(
        map: &'a mut OccupancyMap,
        layer: LayerIndex,
        key: VoxelKey,
        instantiate: bool,
    ) -> Self {
        let element_size = map.layout.voxel_byte_size(layer);
        assert_eq!(
            std::mem::size_of::<T>(),
            element_size,
            "accessor type does not match layer '{}' element size",
            map.layout.layer(layer).name()
        );
        Self {
            map,
            layer,
            element_size,
            key,
            instantiate,
            _marker: PhantomData,
        }
    }

    /// Re-target the accessor.
    #[inline]
    pub fn set_key(&mut self, key: VoxelKey) {
        self.key = key;
    }

    /// Current key
    #[inline]
    pub fn key(&self) -> VoxelKey {
        self.key
    }

    /// True when a write would land in a chunk: either one is resident or
    /// this accessor instantiates on demand.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.instantiate || self.map.store.find_region(self.key.region).is_some()
    }

    /// Read the current value; false leaves `value` untouched.
    pub fn read(&self, value: &mut T) -> bool {
        let Some(chunk) = self.map.store.find_region(self.key.region) else {
            return false;
        };
        let index = self.map.voxel_index(self.key.local);
        match chunk.voxel_bytes(self.layer, index, self.element_size) {
            Some(bytes) => *value = bytemuck::pod_read_unaligned(bytes),
            None => *value = bytemuck::pod_read_unaligned(self.map.layout.default_bytes(self.layer)),
        }
        true
    }

    /// Write `value`, allocating the layer block (and optionally the chunk)
    /// on first touch. Returns false when the chunk is not resident and
    /// instantiation was not requested.
    pub fn write(&mut self, value: T) -> bool {
        let index = self.map.voxel_index(self.key.local);
        let voxel_count = self.map.region_voxel_count();
        let map = &mut *self.map;
        let Some(chunk) = map.store.region_mut(self.key.region, self.instantiate) else {
            return false;
        };
        let stamp = map.stamp.fetch_add(1, Ordering::AcqRel) + 1;
        let bytes = chunk.layer_bytes_mut(&map.layout, self.layer, voxel_count);
        let start = index * self.element_size;
        bytes[start..start + self.element_size].copy_from_slice(bytemuck::bytes_of(&value));
        chunk.touch_layer(self.layer, stamp);
        true
    }
}
