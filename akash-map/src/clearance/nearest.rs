//! Brute-force nearest-obstacle search around a single voxel.

use crate::core::{VoxelCoord, VoxelKey};
use crate::map::occupancy::UNOBSERVED_VALUE;
use crate::map::OccupancyMap;

/// Resolved search parameters for one region pass.
#[derive(Clone, Copy, Debug)]
pub(crate) struct NearestParams {
    pub search_radius: f32,
    pub axis_scaling: [f32; 3],
    pub unknown_as_occupied: bool,
    pub report_unscaled: bool,
}

impl NearestParams {
    /// Smallest axis scale; bounds the unscaled distance reachable under
    /// the scaled search radius.
    #[inline]
    pub fn min_scale(&self) -> f32 {
        self.axis_scaling[0]
            .min(self.axis_scaling[1])
            .min(self.axis_scaling[2])
    }

    /// Clearance reported when no obstacle lies within range.
    #[inline]
    pub fn not_found_value(&self) -> f32 {
        if self.report_unscaled {
            self.search_radius / self.min_scale()
        } else {
            self.search_radius
        }
    }
}

/// Replace non-positive or non-finite scaling components with 1.
pub(crate) fn sanitise_axis_scaling(scaling: [f32; 3]) -> [f32; 3] {
    let mut out = scaling;
    for s in &mut out {
        if !(s.is_finite() && *s > 0.0) {
            *s = 1.0;
        }
    }
    out
}

/// Per-axis voxel half extents of the search box: `ceil(R / res / scale)`.
pub(crate) fn voxel_search_half_extents(resolution: f64, params: &NearestParams) -> VoxelCoord {
    let mut half = VoxelCoord::splat(0);
    for axis in 0..3 {
        let reach = f64::from(params.search_radius)
            / (resolution * f64::from(params.axis_scaling[axis]));
        half.set_axis(axis, reach.ceil().max(0.0) as i32);
    }
    half
}

// Relative slack so an obstacle exactly at the search radius stays in range
// despite the quantised voxel distances.
const RADIUS_EPSILON: f64 = 1e-9;

/// Scaled distance from `base_key` to the nearest obstacle within the
/// search box, or the not-found value.
///
/// An obstacle is an occupied voxel, or an unobserved one when
/// `unknown_as_occupied` is set. Voxels outside any resident chunk are
/// clipped from the search. Selection always uses the scaled metric; the
/// unscaled report only changes the returned magnitude.
pub(crate) fn nearest_obstacle(
    map: &OccupancyMap,
    base_key: VoxelKey,
    half_extents: VoxelCoord,
    params: &NearestParams,
) -> f32 {
    let threshold = map.occupancy_threshold_value();
    let is_obstacle = |value: f32| -> bool {
        if value == UNOBSERVED_VALUE {
            params.unknown_as_occupied
        } else {
            value >= threshold
        }
    };

    let mut occ = map.voxel::<f32>(map.occupancy_layer(), base_key);
    if let Some(value) = occ.value() {
        if is_obstacle(value) {
            return 0.0;
        }
    }

    let res = map.resolution();
    let res_sq = res * res;
    let scale = [
        f64::from(params.axis_scaling[0]),
        f64::from(params.axis_scaling[1]),
        f64::from(params.axis_scaling[2]),
    ];
    let radius = f64::from(params.search_radius);
    let radius_sq = radius * radius * (1.0 + RADIUS_EPSILON);

    let mut best_scaled_sq = f64::INFINITY;
    let mut best_unscaled_sq = f64::INFINITY;

    for dz in -half_extents.z..=half_extents.z {
        for dy in -half_extents.y..=half_extents.y {
            for dx in -half_extents.x..=half_extents.x {
                if dx == 0 && dy == 0 && dz == 0 {
                    continue;
                }
                let sx = f64::from(dx) * scale[0];
                let sy = f64::from(dy) * scale[1];
                let sz = f64::from(dz) * scale[2];
                let scaled_sq = (sx * sx + sy * sy + sz * sz) * res_sq;
                if scaled_sq > radius_sq || scaled_sq >= best_scaled_sq {
                    continue;
                }
                occ.set_key(map.move_key(base_key, dx, dy, dz));
                let Some(value) = occ.value() else {
                    continue;
                };
                if is_obstacle(value) {
                    best_scaled_sq = scaled_sq;
                    let d = (f64::from(dx) * f64::from(dx)
                        + f64::from(dy) * f64::from(dy)
                        + f64::from(dz) * f64::from(dz))
                        * res_sq;
                    best_unscaled_sq = d;
                }
            }
        }
    }

    if best_scaled_sq.is_infinite() {
        params.not_found_value()
    } else if params.report_unscaled {
        best_unscaled_sq.sqrt() as f32
    } else {
        best_scaled_sq.sqrt() as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapConfig;
    use crate::core::WorldPoint;
    use approx::assert_relative_eq;

    fn params(radius: f32) -> NearestParams {
        NearestParams {
            search_radius: radius,
            axis_scaling: [1.0, 1.0, 1.0],
            unknown_as_occupied: false,
            report_unscaled: false,
        }
    }

    #[test]
    fn test_sanitise_axis_scaling() {
        assert_eq!(
            sanitise_axis_scaling([0.0, -2.0, f32::NAN]),
            [1.0, 1.0, 1.0]
        );
        assert_eq!(sanitise_axis_scaling([2.0, 0.5, 1.0]), [2.0, 0.5, 1.0]);
    }

    #[test]
    fn test_half_extents() {
        let p = params(0.3);
        assert_eq!(voxel_search_half_extents(0.1, &p), VoxelCoord::splat(3));

        let mut scaled = p;
        scaled.axis_scaling = [1.0, 2.0, 3.0];
        assert_eq!(
            voxel_search_half_extents(0.1, &scaled),
            VoxelCoord::new(3, 2, 1)
        );
    }

    #[test]
    fn test_obstacle_voxel_has_zero_clearance() {
        let mut map = OccupancyMap::new(MapConfig::default()).unwrap();
        let key = map.integrate_hit(WorldPoint::ZERO);
        let p = params(0.3);
        let half = voxel_search_half_extents(map.resolution(), &p);
        assert_eq!(nearest_obstacle(&map, key, half, &p), 0.0);
    }

    #[test]
    fn test_distance_to_neighbour_obstacle() {
        let mut map = OccupancyMap::new(MapConfig::default()).unwrap();
        map.integrate_hit(WorldPoint::ZERO);
        let p = params(0.3);
        let half = voxel_search_half_extents(map.resolution(), &p);

        let key = map.voxel_key(WorldPoint::new(0.2, 0.0, 0.0));
        let d = nearest_obstacle(&map, key, half, &p);
        assert_relative_eq!(d, 0.2, epsilon = 1e-6);
    }

    #[test]
    fn test_not_found_reports_radius() {
        let mut map = OccupancyMap::new(MapConfig::default()).unwrap();
        map.integrate_miss(WorldPoint::ZERO);
        let p = params(0.3);
        let half = voxel_search_half_extents(map.resolution(), &p);
        let key = map.voxel_key(WorldPoint::ZERO);
        assert_relative_eq!(nearest_obstacle(&map, key, half, &p), 0.3, epsilon = 1e-6);
    }

    #[test]
    fn test_unknown_as_occupied() {
        let mut map = OccupancyMap::new(MapConfig::default()).unwrap();
        // Free voxel next to an unobserved one in a resident chunk.
        let free = map.integrate_miss(WorldPoint::new(0.0, 0.0, 0.0));
        let mut p = params(0.3);
        let half = voxel_search_half_extents(map.resolution(), &p);

        // Default flags: unobserved neighbours are not obstacles.
        assert_relative_eq!(nearest_obstacle(&map, free, half, &p), 0.3, epsilon = 1e-6);

        p.unknown_as_occupied = true;
        let d = nearest_obstacle(&map, free, half, &p);
        assert_relative_eq!(d, 0.1, epsilon = 1e-6);
    }

    #[test]
    fn test_axis_scaling_weights_metric() {
        let mut map = OccupancyMap::new(MapConfig::default()).unwrap();
        // Obstacles two voxels away on x and one on y.
        map.integrate_hit(WorldPoint::new(0.25, 0.05, 0.05));
        map.integrate_hit(WorldPoint::new(0.05, 0.15, 0.05));
        let base = map.integrate_miss(WorldPoint::new(0.05, 0.05, 0.05));

        // Unscaled: y obstacle at 0.1 wins.
        let p = params(0.5);
        let half = voxel_search_half_extents(map.resolution(), &p);
        assert_relative_eq!(nearest_obstacle(&map, base, half, &p), 0.1, epsilon = 1e-6);

        // Weighting y by 3 makes the x obstacle nearer: 0.2 vs 0.3.
        let mut scaled = p;
        scaled.axis_scaling = [1.0, 3.0, 1.0];
        let half = voxel_search_half_extents(map.resolution(), &scaled);
        assert_relative_eq!(
            nearest_obstacle(&map, base, half, &scaled),
            0.2,
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_report_unscaled_magnitude() {
        let mut map = OccupancyMap::new(MapConfig::default()).unwrap();
        map.integrate_hit(WorldPoint::new(0.05, 0.25, 0.05));
        let base = map.integrate_miss(WorldPoint::new(0.05, 0.05, 0.05));

        let mut p = params(0.5);
        p.axis_scaling = [1.0, 2.0, 1.0];
        p.report_unscaled = true;
        let half = voxel_search_half_extents(map.resolution(), &p);
        // Obstacle two voxels up: scaled 0.4 selects it, report is 0.2.
        assert_relative_eq!(nearest_obstacle(&map, base, half, &p), 0.2, epsilon = 1e-6);

        // Not found reports R / min_scale.
        let empty = map.integrate_miss(WorldPoint::new(3.0, 3.0, 3.0));
        let mut lonely = p;
        lonely.search_radius = 0.2;
        let half = voxel_search_half_extents(map.resolution(), &lonely);
        assert_relative_eq!(
            nearest_obstacle(&map, empty, half, &lonely),
            0.2,
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_obstacle_exactly_at_radius_counts() {
        let mut map = OccupancyMap::new(MapConfig::default()).unwrap();
        map.integrate_hit(WorldPoint::new(0.35, 0.05, 0.05));
        let base = map.integrate_miss(WorldPoint::new(0.05, 0.05, 0.05));

        let p = params(0.3);
        let half = voxel_search_half_extents(map.resolution(), &p);
        let d = nearest_obstacle(&map, base, half, &p);
        assert_relative_eq!(d, 0.3, epsilon = 1e-6);
    }
}
