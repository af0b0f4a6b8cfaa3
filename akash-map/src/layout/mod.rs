//! Per-voxel layer descriptors.
//!
//! A map carries an ordered list of named layers. Each layer stores one
//! fixed-size element per voxel in a dense block per chunk. The layout is
//! built before the first chunk exists and is immutable for the life of the
//! map; layer indices are resolved once at map-open time and cached.

mod block;

pub(crate) use block::AlignedBuf;

use crate::error::{MapError, Result};

/// Name of the log-odds occupancy layer.
pub const OCCUPANCY_LAYER: &str = "occupancy";
/// Name of the sub-voxel mean layer.
pub const MEAN_LAYER: &str = "mean";
/// Name of the NDT covariance layer.
pub const COVARIANCE_LAYER: &str = "covariance";
/// Name of the obstacle clearance layer.
pub const CLEARANCE_LAYER: &str = "clearance";

/// Largest supported layer alignment in bytes.
pub const MAX_LAYER_ALIGNMENT: usize = 16;

/// Index of a layer within a [`MapLayout`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LayerIndex(pub(crate) usize);

impl LayerIndex {
    /// Position of the layer in the layout's ordered list
    #[inline]
    pub fn as_usize(&self) -> usize {
        self.0
    }
}

/// Describes one named per-voxel channel.
#[derive(Clone, Debug)]
pub struct LayerDescriptor {
    name: String,
    element_size: usize,
    alignment: usize,
    default_bytes: Vec<u8>,
}

impl LayerDescriptor {
    /// Layer name
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bytes per voxel
    #[inline]
    pub fn element_size(&self) -> usize {
        self.element_size
    }

    /// Required block alignment
    #[inline]
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Byte pattern a voxel reads as before its first write
    #[inline]
    pub fn default_bytes(&self) -> &[u8] {
        &self.default_bytes
    }
}

/// Ordered list of per-voxel layers.
#[derive(Clone, Debug, Default)]
pub struct MapLayout {
    layers: Vec<LayerDescriptor>,
}

impl MapLayout {
    /// Create an empty layout
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a layer.
    ///
    /// `element_size` must be ≥ 1 and a multiple of `alignment`;
    /// `alignment` must be a power of two ≤ 16; `default_bytes` must be
    /// exactly one element. Layer names are unique.
    pub fn add_layer(
        &mut self,
        name: &str,
        element_size: usize,
        alignment: usize,
        default_bytes: &[u8],
    ) -> Result<LayerIndex> {
        if name.is_empty() {
            return Err(MapError::InvalidLayer("layer name is empty".to_string()));
        }
        if self.layer_index(name).is_some() {
            return Err(MapError::InvalidLayer(format!(
                "duplicate layer name '{}'",
                name
            )));
        }
        if element_size == 0 {
            return Err(MapError::InvalidLayer(format!(
                "layer '{}' element size must be >= 1",
                name
            )));
        }
        if !alignment.is_power_of_two() || alignment > MAX_LAYER_ALIGNMENT {
            return Err(MapError::InvalidLayer(format!(
                "layer '{}' alignment must be a power of two <= {}, got {}",
                name, MAX_LAYER_ALIGNMENT, alignment
            )));
        }
        if element_size % alignment != 0 {
            return Err(MapError::InvalidLayer(format!(
                "layer '{}' element size {} must be a multiple of alignment {}",
                name, element_size, alignment
            )));
        }
        if default_bytes.len() != element_size {
            return Err(MapError::InvalidLayer(format!(
                "layer '{}' default pattern is {} bytes, element size is {}",
                name,
                default_bytes.len(),
                element_size
            )));
        }
        self.layers.push(LayerDescriptor {
            name: name.to_string(),
            element_size,
            alignment,
            default_bytes: default_bytes.to_vec(),
        });
        Ok(LayerIndex(self.layers.len() - 1))
    }

    /// Resolve a layer by name
    pub fn layer_index(&self, name: &str) -> Option<LayerIndex> {
        self.layers
            .iter()
            .position(|l| l.name == name)
            .map(LayerIndex)
    }

    /// Descriptor for `index`
    #[inline]
    pub fn layer(&self, index: LayerIndex) -> &LayerDescriptor {
        &self.layers[index.0]
    }

    /// Number of layers
    #[inline]
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Bytes per voxel in `index`
    #[inline]
    pub fn voxel_byte_size(&self, index: LayerIndex) -> usize {
        self.layers[index.0].element_size
    }

    /// Default element bytes for `index`
    #[inline]
    pub fn default_bytes(&self, index: LayerIndex) -> &[u8] {
        &self.layers[index.0].default_bytes
    }

    /// Size in bytes of one chunk's block for `index`
    #[inline]
    pub fn chunk_byte_size(&self, index: LayerIndex, voxel_count: usize) -> usize {
        self.layers[index.0].element_size * voxel_count
    }

    /// Iterate layers in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (LayerIndex, &LayerDescriptor)> {
        self.layers
            .iter()
            .enumerate()
            .map(|(i, l)| (LayerIndex(i), l))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_resolve_layers() {
        let mut layout = MapLayout::new();
        let occ = layout
            .add_layer(OCCUPANCY_LAYER, 4, 4, &f32::INFINITY.to_le_bytes())
            .unwrap();
        let clearance = layout
            .add_layer(CLEARANCE_LAYER, 4, 4, &(-1.0f32).to_le_bytes())
            .unwrap();
        assert_eq!(layout.layer_count(), 2);
        assert_eq!(layout.layer_index(OCCUPANCY_LAYER), Some(occ));
        assert_eq!(layout.layer_index(CLEARANCE_LAYER), Some(clearance));
        assert_eq!(layout.layer_index("missing"), None);
        assert_eq!(layout.voxel_byte_size(occ), 4);
        assert_eq!(layout.chunk_byte_size(clearance, 32 * 32 * 32), 4 * 32768);
    }

    #[test]
    fn test_rejects_invalid_geometry() {
        let mut layout = MapLayout::new();
        assert!(layout.add_layer("zero", 0, 1, &[]).is_err());
        assert!(layout.add_layer("align3", 3, 3, &[0; 3]).is_err());
        assert!(layout.add_layer("align32", 32, 32, &[0; 32]).is_err());
        // element size must be a multiple of alignment
        assert!(layout.add_layer("stride", 6, 4, &[0; 6]).is_err());
        // default pattern must match element size
        assert!(layout.add_layer("short", 4, 4, &[0; 2]).is_err());
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let mut layout = MapLayout::new();
        layout.add_layer("a", 4, 4, &[0; 4]).unwrap();
        assert!(layout.add_layer("a", 4, 4, &[0; 4]).is_err());
    }
}
