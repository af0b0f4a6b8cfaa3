//! 2.5D heightmap layer types.
//!
//! The core map only holds these layers; surface extraction and meshing are
//! external. Both layers share the element format.

use bytemuck::{Pod, Zeroable};

use crate::error::Result;
use crate::layout::LayerIndex;

use super::OccupancyMap;

/// Name of the finalised heightmap layer.
pub const HEIGHTMAP_LAYER: &str = "heightmap";
/// Name of the in-progress heightmap construction layer.
pub const HEIGHTMAP_BUILD_LAYER: &str = "heightmap_build";

/// One 2.5D surface cell: height of the supporting surface and the
/// clearance above it.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct HeightmapVoxel {
    /// Surface height in meters
    pub height: f32,
    /// Vertical clearance above the surface in meters
    pub clearance: f32,
}

/// Register the heightmap layers on a map.
///
/// Fails once any chunk exists, like any other layout mutation. Returns
/// the (heightmap, heightmap_build) layer indices.
pub fn add_heightmap_layers(map: &mut OccupancyMap) -> Result<(LayerIndex, LayerIndex)> {
    let size = std::mem::size_of::<HeightmapVoxel>();
    let default = [0u8; 8];
    let heightmap = map.add_layer(HEIGHTMAP_LAYER, size, 4, &default)?;
    let build = map.add_layer(HEIGHTMAP_BUILD_LAYER, size, 4, &default)?;
    Ok((heightmap, build))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapConfig;
    use crate::core::WorldPoint;

    #[test]
    fn test_register_heightmap_layers() {
        let mut map = OccupancyMap::new(MapConfig::default()).unwrap();
        let (heightmap, build) = add_heightmap_layers(&mut map).unwrap();
        assert_eq!(map.layout().layer_index(HEIGHTMAP_LAYER), Some(heightmap));
        assert_eq!(map.layout().layer_index(HEIGHTMAP_BUILD_LAYER), Some(build));
    }

    #[test]
    fn test_registration_fails_after_first_chunk() {
        let mut map = OccupancyMap::new(MapConfig::default()).unwrap();
        map.integrate_hit(WorldPoint::ZERO);
        assert!(add_heightmap_layers(&mut map).is_err());
    }
}
