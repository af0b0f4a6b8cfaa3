//! Voxel addressing: split region/local keys and the key algebra.
//!
//! A voxel address is the pair of a signed region key (which chunk) and an
//! unsigned local key (which voxel within the chunk). Keys are plain value
//! types; they never own storage and carry no reference to a map. Operations
//! that depend on the region dimensions take them as a parameter; the
//! convenience wrappers on `OccupancyMap` fill them in.

use serde::{Deserialize, Serialize};

use super::VoxelCoord;

/// Region portion of a voxel address (signed 16-bit per axis).
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct RegionKey {
    /// Region index along X
    pub x: i16,
    /// Region index along Y
    pub y: i16,
    /// Region index along Z
    pub z: i16,
}

impl RegionKey {
    /// Create a new region key
    #[inline]
    pub const fn new(x: i16, y: i16, z: i16) -> Self {
        Self { x, y, z }
    }

    /// Component along `axis` (0 = x, 1 = y, 2 = z)
    #[inline]
    pub fn axis(&self, axis: usize) -> i16 {
        match axis {
            0 => self.x,
            1 => self.y,
            _ => self.z,
        }
    }

    /// Neighbouring region key offset by `(dx, dy, dz)` regions.
    ///
    /// Saturates at the i16 range rather than wrapping around to a far
    /// region on the opposite side of the map.
    #[inline]
    pub fn neighbour(&self, dx: i16, dy: i16, dz: i16) -> RegionKey {
        RegionKey::new(
            self.x.saturating_add(dx),
            self.y.saturating_add(dy),
            self.z.saturating_add(dz),
        )
    }
}

/// Local voxel offset within a region (unsigned, `< region_voxel_dimensions`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct LocalKey {
    /// Local offset along X
    pub x: u8,
    /// Local offset along Y
    pub y: u8,
    /// Local offset along Z
    pub z: u8,
}

impl LocalKey {
    /// Create a new local key
    #[inline]
    pub const fn new(x: u8, y: u8, z: u8) -> Self {
        Self { x, y, z }
    }

    /// Component along `axis` (0 = x, 1 = y, 2 = z)
    #[inline]
    pub fn axis(&self, axis: usize) -> u8 {
        match axis {
            0 => self.x,
            1 => self.y,
            _ => self.z,
        }
    }
}

/// Full voxel address: region key plus local offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct VoxelKey {
    /// Which chunk the voxel belongs to
    pub region: RegionKey,
    /// Which voxel within that chunk
    pub local: LocalKey,
}

/// Floor division (rounds toward negative infinity, unlike `/`).
#[inline]
fn floor_div(a: i64, b: i64) -> i64 {
    let d = a / b;
    if a % b != 0 && (a < 0) != (b < 0) {
        d - 1
    } else {
        d
    }
}

impl VoxelKey {
    /// Create a key from its parts
    #[inline]
    pub const fn new(region: RegionKey, local: LocalKey) -> Self {
        Self { region, local }
    }

    /// Split a global voxel coordinate into region and local parts.
    ///
    /// Floor semantics apply symmetrically for negative coordinates: voxel
    /// -1 belongs to region -1, never to region 0. Region indices saturate
    /// at the i16 range.
    pub fn from_voxel_coord(coord: VoxelCoord, region_dims: VoxelCoord) -> Self {
        let mut region = RegionKey::default();
        let mut local = LocalKey::default();
        for axis in 0..3 {
            let dim = i64::from(region_dims.axis(axis));
            let g = i64::from(coord.axis(axis));
            let r = floor_div(g, dim).clamp(i64::from(i16::MIN), i64::from(i16::MAX));
            let l = (g - r * dim).clamp(0, dim - 1);
            match axis {
                0 => {
                    region.x = r as i16;
                    local.x = l as u8;
                }
                1 => {
                    region.y = r as i16;
                    local.y = l as u8;
                }
                _ => {
                    region.z = r as i16;
                    local.z = l as u8;
                }
            }
        }
        Self { region, local }
    }

    /// Global voxel coordinate addressed by this key.
    #[inline]
    pub fn voxel_coord(&self, region_dims: VoxelCoord) -> VoxelCoord {
        VoxelCoord::new(
            i32::from(self.region.x) * region_dims.x + i32::from(self.local.x),
            i32::from(self.region.y) * region_dims.y + i32::from(self.local.y),
            i32::from(self.region.z) * region_dims.z + i32::from(self.local.z),
        )
    }

    /// Key offset by `(dx, dy, dz)` voxels, carrying overflow between the
    /// local and region parts. Region indices saturate at the i16 range.
    pub fn moved(&self, dx: i32, dy: i32, dz: i32, region_dims: VoxelCoord) -> VoxelKey {
        let mut region = self.region;
        let mut local = self.local;
        let deltas = [dx, dy, dz];
        for axis in 0..3 {
            let dim = i64::from(region_dims.axis(axis));
            let g = i64::from(local.axis(axis)) + i64::from(deltas[axis]);
            let carry = floor_div(g, dim);
            let l = (g - carry * dim) as u8;
            let clamp_region = |r: i64| -> i16 {
                r.clamp(i64::from(i16::MIN), i64::from(i16::MAX)) as i16
            };
            match axis {
                0 => {
                    region.x = clamp_region(i64::from(region.x) + carry);
                    local.x = l;
                }
                1 => {
                    region.y = clamp_region(i64::from(region.y) + carry);
                    local.y = l;
                }
                _ => {
                    region.z = clamp_region(i64::from(region.z) + carry);
                    local.z = l;
                }
            }
        }
        VoxelKey { region, local }
    }

    /// True when this key lies within `[min, max]` along `axis`.
    ///
    /// Ordering per axis is lexicographic on (region, local), which matches
    /// the global voxel coordinate ordering without needing the region
    /// dimensions.
    #[inline]
    pub fn is_bounded_on_axis(&self, axis: usize, min: &VoxelKey, max: &VoxelKey) -> bool {
        let value = (self.region.axis(axis), self.local.axis(axis));
        let lo = (min.region.axis(axis), min.local.axis(axis));
        let hi = (max.region.axis(axis), max.local.axis(axis));
        lo <= value && value <= hi
    }

    /// True when this key lies within `[min, max]` on every axis.
    #[inline]
    pub fn is_bounded(&self, min: &VoxelKey, max: &VoxelKey) -> bool {
        self.is_bounded_on_axis(0, min, max)
            && self.is_bounded_on_axis(1, min, max)
            && self.is_bounded_on_axis(2, min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIMS: VoxelCoord = VoxelCoord::new(32, 32, 32);

    #[test]
    fn test_from_voxel_coord_positive() {
        let key = VoxelKey::from_voxel_coord(VoxelCoord::new(0, 31, 33), DIMS);
        assert_eq!(key.region, RegionKey::new(0, 0, 1));
        assert_eq!(key.local, LocalKey::new(0, 31, 1));
    }

    #[test]
    fn test_from_voxel_coord_negative_uses_floor() {
        // Voxel -1 belongs to region -1 at local 31, never region 0.
        let key = VoxelKey::from_voxel_coord(VoxelCoord::new(-1, -32, -33), DIMS);
        assert_eq!(key.region, RegionKey::new(-1, -1, -2));
        assert_eq!(key.local, LocalKey::new(31, 0, 31));
    }

    #[test]
    fn test_voxel_coord_round_trip() {
        for coord in [
            VoxelCoord::new(0, 0, 0),
            VoxelCoord::new(5, 100, -77),
            VoxelCoord::new(-1, -32, 1023),
        ] {
            let key = VoxelKey::from_voxel_coord(coord, DIMS);
            assert_eq!(key.voxel_coord(DIMS), coord);
        }
    }

    #[test]
    fn test_moved_carries_into_next_region() {
        let key = VoxelKey::from_voxel_coord(VoxelCoord::new(31, 0, 0), DIMS);
        let moved = key.moved(1, 0, 0, DIMS);
        assert_eq!(moved.region, RegionKey::new(1, 0, 0));
        assert_eq!(moved.local, LocalKey::new(0, 0, 0));
    }

    #[test]
    fn test_moved_borrows_from_previous_region() {
        let key = VoxelKey::from_voxel_coord(VoxelCoord::new(0, 0, 0), DIMS);
        let moved = key.moved(-1, -33, 0, DIMS);
        assert_eq!(moved.region, RegionKey::new(-1, -2, 0));
        assert_eq!(moved.local, LocalKey::new(31, 31, 0));
    }

    #[test]
    fn test_moved_matches_coord_arithmetic() {
        let start = VoxelCoord::new(-5, 17, 40);
        let key = VoxelKey::from_voxel_coord(start, DIMS);
        let moved = key.moved(-40, 3, 129, DIMS);
        assert_eq!(
            moved.voxel_coord(DIMS),
            VoxelCoord::new(-45, 20, 169),
        );
    }

    #[test]
    fn test_is_bounded() {
        let min = VoxelKey::from_voxel_coord(VoxelCoord::new(-4, -4, -4), DIMS);
        let max = VoxelKey::from_voxel_coord(VoxelCoord::new(4, 4, 4), DIMS);
        let inside = VoxelKey::from_voxel_coord(VoxelCoord::new(0, -4, 4), DIMS);
        let outside = VoxelKey::from_voxel_coord(VoxelCoord::new(0, 0, 5), DIMS);
        assert!(inside.is_bounded(&min, &max));
        assert!(!outside.is_bounded(&min, &max));
        assert!(outside.is_bounded_on_axis(0, &min, &max));
        assert!(!outside.is_bounded_on_axis(2, &min, &max));
    }

    #[test]
    fn test_neighbour_saturates() {
        let key = RegionKey::new(i16::MAX, 0, i16::MIN);
        let n = key.neighbour(1, 0, -1);
        assert_eq!(n, RegionKey::new(i16::MAX, 0, i16::MIN));
    }
}
