//! Axis-aligned bounding boxes in world coordinates.

use serde::{Deserialize, Serialize};

use super::WorldPoint;

/// World-space axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    /// Minimum corner
    pub min: WorldPoint,
    /// Maximum corner
    pub max: WorldPoint,
}

impl Aabb {
    /// Create a bounding box from its corners
    #[inline]
    pub fn new(min: WorldPoint, max: WorldPoint) -> Self {
        Self { min, max }
    }

    /// Degenerate box containing a single point
    #[inline]
    pub fn from_point(p: WorldPoint) -> Self {
        Self { min: p, max: p }
    }

    /// Grow the box to include `p`
    pub fn expand_to_include(&mut self, p: WorldPoint) {
        self.min.x = self.min.x.min(p.x);
        self.min.y = self.min.y.min(p.y);
        self.min.z = self.min.z.min(p.z);
        self.max.x = self.max.x.max(p.x);
        self.max.y = self.max.y.max(p.y);
        self.max.z = self.max.z.max(p.z);
    }

    /// True when `p` lies within the box (inclusive)
    #[inline]
    pub fn contains(&self, p: WorldPoint) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    /// True when the boxes overlap (inclusive of touching faces)
    #[inline]
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }
}
