//! Region chunks: dense per-layer voxel blocks plus touch stamps.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::{RegionKey, WorldPoint};
use crate::layout::{AlignedBuf, LayerIndex, MapLayout};

/// A dense grid of voxels sharing one region key.
///
/// Layer blocks are allocated lazily on the first touch of each layer and
/// initialised from the layout's default bytes. Touch stamps are atomic so
/// shared readers can observe write generations while the store owner
/// mutates voxel data.
#[derive(Debug)]
pub struct MapChunk {
    region_key: RegionKey,
    region_spatial_min: WorldPoint,
    blocks: Vec<Option<AlignedBuf>>,
    touched_stamps: Vec<AtomicU64>,
}

impl MapChunk {
    pub(crate) fn new(region_key: RegionKey, region_spatial_min: WorldPoint, layer_count: usize) -> Self {
        let mut blocks = Vec::with_capacity(layer_count);
        let mut touched_stamps = Vec::with_capacity(layer_count);
        for _ in 0..layer_count {
            blocks.push(None);
            touched_stamps.push(AtomicU64::new(0));
        }
        Self {
            region_key,
            region_spatial_min,
            blocks,
            touched_stamps,
        }
    }

    /// Region key owning this chunk
    #[inline]
    pub fn region_key(&self) -> RegionKey {
        self.region_key
    }

    /// World coordinates of the chunk's minimum corner
    #[inline]
    pub fn region_spatial_min(&self) -> WorldPoint {
        self.region_spatial_min
    }

    /// Last write generation of `layer`
    #[inline]
    pub fn touched_stamp(&self, layer: LayerIndex) -> u64 {
        self.touched_stamps[layer.0].load(Ordering::Acquire)
    }

    /// Highest write generation across all layers
    pub fn max_touched_stamp(&self) -> u64 {
        self.touched_stamps
            .iter()
            .map(|s| s.load(Ordering::Acquire))
            .max()
            .unwrap_or(0)
    }

    /// Advance a layer's stamp to `stamp`, keeping it monotonic.
    pub(crate) fn touch_layer(&self, layer: LayerIndex, stamp: u64) {
        self.touched_stamps[layer.0].fetch_max(stamp, Ordering::AcqRel);
    }

    /// Overwrite a layer's stamp (deserialisation only).
    pub(crate) fn set_touched_stamp(&mut self, layer: LayerIndex, stamp: u64) {
        self.touched_stamps[layer.0] = AtomicU64::new(stamp);
    }

    /// Raw bytes of a layer's block, `None` if the layer was never touched
    #[inline]
    pub fn layer_bytes(&self, layer: LayerIndex) -> Option<&[u8]> {
        self.blocks[layer.0].as_ref().map(AlignedBuf::as_slice)
    }

    /// Raw bytes of a layer's block, allocating it on first touch.
    pub(crate) fn layer_bytes_mut(
        &mut self,
        layout: &MapLayout,
        layer: LayerIndex,
        voxel_count: usize,
    ) -> &mut [u8] {
        let block = self.blocks[layer.0].get_or_insert_with(|| {
            AlignedBuf::new_filled(
                layout.chunk_byte_size(layer, voxel_count),
                layout.layer(layer).alignment(),
                layout.default_bytes(layer),
            )
        });
        block.as_mut_slice()
    }

    /// Bytes of one voxel's element, `None` if the layer block is absent
    #[inline]
    pub(crate) fn voxel_bytes(
        &self,
        layer: LayerIndex,
        voxel_index: usize,
        element_size: usize,
    ) -> Option<&[u8]> {
        let block = self.blocks[layer.0].as_ref()?;
        let start = voxel_index * element_size;
        Some(&block.as_slice()[start..start + element_size])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{CLEARANCE_LAYER, OCCUPANCY_LAYER};

    fn test_layout() -> MapLayout {
        let mut layout = MapLayout::new();
        layout
            .add_layer(OCCUPANCY_LAYER, 4, 4, &f32::INFINITY.to_le_bytes())
            .unwrap();
        layout
            .add_layer(CLEARANCE_LAYER, 4, 4, &(-1.0f32).to_le_bytes())
            .unwrap();
        layout
    }

    #[test]
    fn test_blocks_allocate_lazily_with_defaults() {
        let layout = test_layout();
        let occ = layout.layer_index(OCCUPANCY_LAYER).unwrap();
        let mut chunk = MapChunk::new(RegionKey::default(), WorldPoint::ZERO, 2);

        assert!(chunk.layer_bytes(occ).is_none());
        let bytes = chunk.layer_bytes_mut(&layout, occ, 8);
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[0..4], &f32::INFINITY.to_le_bytes());
        assert!(chunk.layer_bytes(occ).is_some());
    }

    #[test]
    fn test_layers_never_alias() {
        let layout = test_layout();
        let occ = layout.layer_index(OCCUPANCY_LAYER).unwrap();
        let clearance = layout.layer_index(CLEARANCE_LAYER).unwrap();
        let mut chunk = MapChunk::new(RegionKey::default(), WorldPoint::ZERO, 2);
        chunk.layer_bytes_mut(&layout, occ, 8);
        chunk.layer_bytes_mut(&layout, clearance, 8);

        let a = chunk.layer_bytes(occ).unwrap().as_ptr() as usize;
        let b = chunk.layer_bytes(clearance).unwrap().as_ptr() as usize;
        let len = chunk.layer_bytes(occ).unwrap().len();
        assert!(a + len <= b || b + len <= a);
    }

    #[test]
    fn test_touch_stamps_monotonic() {
        let layout = test_layout();
        let occ = layout.layer_index(OCCUPANCY_LAYER).unwrap();
        let chunk = MapChunk::new(RegionKey::default(), WorldPoint::ZERO, 2);
        assert_eq!(chunk.touched_stamp(occ), 0);
        chunk.touch_layer(occ, 5);
        chunk.touch_layer(occ, 3);
        assert_eq!(chunk.touched_stamp(occ), 5);
        assert_eq!(chunk.max_touched_stamp(), 5);
    }
}
