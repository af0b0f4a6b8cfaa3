//! Log-odds occupancy semantics and the sub-voxel mean.
//!
//! Occupancy is stored per voxel as a log-odds value:
//!
//! ```text
//! P(occupied) = 1 - 1 / (1 + exp(value))
//!
//! value = log(P(occupied) / P(free))
//!
//! Update: value_new = clamp(value_old + observation_value)
//! ```
//!
//! A voxel that has never been observed holds [`UNOBSERVED_VALUE`], a
//! sentinel outside the clamp range. The first observation replaces the
//! sentinel instead of accumulating into it.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Sentinel log-odds value marking a voxel as never observed.
///
/// Non-finite, so it can never result from a clamped Bayesian update.
pub const UNOBSERVED_VALUE: f32 = f32::INFINITY;

/// Clearance value marking "not yet computed / no obstacle found".
pub const UNKNOWN_CLEARANCE: f32 = -1.0;

/// Occupancy classification of a voxel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OccupancyType {
    /// Never observed
    Unobserved,
    /// Observed and below the occupancy threshold
    Free,
    /// Observed and at or above the occupancy threshold
    Occupied,
}

/// Convert a log-odds value to a probability in `[0, 1]`.
///
/// Negative infinity explicitly yields zero; not every platform respects
/// the sign of an infinity through `exp`.
#[inline]
pub fn value_to_probability(value: f32) -> f32 {
    if value == f32::NEG_INFINITY {
        0.0
    } else {
        1.0 - 1.0 / (1.0 + value.exp())
    }
}

/// Convert a probability to its log-odds value. Inverse of
/// [`value_to_probability`].
#[inline]
pub fn probability_to_value(probability: f32) -> f32 {
    (probability / (1.0 - probability)).ln()
}

/// Classify a log-odds value against an occupancy threshold value.
#[inline]
pub fn occupancy_type(value: f32, threshold_value: f32) -> OccupancyType {
    if value == UNOBSERVED_VALUE {
        OccupancyType::Unobserved
    } else if value >= threshold_value {
        OccupancyType::Occupied
    } else {
        OccupancyType::Free
    }
}

/// True when the value reads as an occupied voxel.
#[inline]
pub fn is_occupied_value(value: f32, threshold_value: f32) -> bool {
    occupancy_type(value, threshold_value) == OccupancyType::Occupied
}

/// Apply one observation to a stored occupancy value.
///
/// The first observation replaces the unobserved sentinel; later
/// observations accumulate and clamp.
#[inline]
pub fn integrate_value(current: f32, observation: f32, min_value: f32, max_value: f32) -> f32 {
    if current == UNOBSERVED_VALUE {
        observation.clamp(min_value, max_value)
    } else {
        (current + observation).clamp(min_value, max_value)
    }
}

const MEAN_AXIS_BITS: u32 = 10;
const MEAN_AXIS_MAX: u32 = (1 << MEAN_AXIS_BITS) - 1;

/// Sub-voxel mean position with sample count.
///
/// The running mean of hit positions is quantised to a 10-bit fixed-point
/// offset per axis from the voxel centre, packed into one `u32`. The count
/// saturates at the configured sample limit so the mean keeps adapting
/// with a fixed minimum weight instead of freezing.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct VoxelMean {
    /// Packed per-axis offsets from the voxel centre
    pub packed: u32,
    /// Saturating sample count
    pub count: u32,
}

impl VoxelMean {
    /// Quantise and pack an offset expressed as a fraction of the voxel
    /// edge, one component per axis in `[-0.5, 0.5]`.
    pub fn pack(offset: [f32; 3]) -> u32 {
        let mut packed = 0u32;
        for (axis, &o) in offset.iter().enumerate() {
            let clamped = o.clamp(-0.5, 0.5) + 0.5;
            let q = (clamped * MEAN_AXIS_MAX as f32).round() as u32;
            packed |= q.min(MEAN_AXIS_MAX) << (MEAN_AXIS_BITS * axis as u32);
        }
        packed
    }

    /// Unpack the per-axis offsets as fractions of the voxel edge.
    pub fn unpack(&self) -> [f32; 3] {
        let mut offset = [0.0f32; 3];
        for (axis, o) in offset.iter_mut().enumerate() {
            let q = (self.packed >> (MEAN_AXIS_BITS * axis as u32)) & MEAN_AXIS_MAX;
            *o = q as f32 / MEAN_AXIS_MAX as f32 - 0.5;
        }
        offset
    }

    /// Fold one sample offset into the running mean.
    ///
    /// `max_samples` bounds the effective count: once reached, each new
    /// sample keeps a weight of `1 / (max_samples + 1)`.
    pub fn update(&mut self, sample_offset: [f32; 3], max_samples: u32) {
        let n = self.count.min(max_samples);
        let current = self.unpack();
        let mut next = [0.0f32; 3];
        for axis in 0..3 {
            next[axis] = current[axis]
                + (sample_offset[axis].clamp(-0.5, 0.5) - current[axis]) / (n + 1) as f32;
        }
        self.packed = Self::pack(next);
        self.count = (self.count + 1).min(max_samples);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_probability_round_trip() {
        for p in [0.01f32, 0.25, 0.5, 0.7, 0.99] {
            let v = probability_to_value(p);
            assert_relative_eq!(value_to_probability(v), p, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_negative_infinity_is_zero_probability() {
        assert_eq!(value_to_probability(f32::NEG_INFINITY), 0.0);
        assert_relative_eq!(value_to_probability(0.0), 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_default_hit_miss_magnitudes() {
        // Default observation model: hit p=0.7 -> ~+0.85, miss p=0.4 -> ~-0.41
        assert_relative_eq!(probability_to_value(0.7), 0.847, epsilon = 1e-3);
        assert_relative_eq!(probability_to_value(0.4), -0.405, epsilon = 1e-3);
    }

    #[test]
    fn test_occupancy_classification() {
        assert_eq!(
            occupancy_type(UNOBSERVED_VALUE, 0.0),
            OccupancyType::Unobserved
        );
        assert_eq!(occupancy_type(0.5, 0.0), OccupancyType::Occupied);
        assert_eq!(occupancy_type(0.0, 0.0), OccupancyType::Occupied);
        assert_eq!(occupancy_type(-0.2, 0.0), OccupancyType::Free);
    }

    #[test]
    fn test_integrate_replaces_sentinel_then_accumulates() {
        let hit = probability_to_value(0.7);
        let first = integrate_value(UNOBSERVED_VALUE, hit, -10.0, 10.0);
        assert_relative_eq!(first, hit, epsilon = 1e-6);
        let second = integrate_value(first, hit, -10.0, 10.0);
        assert_relative_eq!(second, 2.0 * hit, epsilon = 1e-6);
    }

    #[test]
    fn test_integrate_clamps() {
        let v = integrate_value(9.9, 5.0, -10.0, 10.0);
        assert_eq!(v, 10.0);
        let v = integrate_value(-9.9, -5.0, -10.0, 10.0);
        assert_eq!(v, -10.0);
    }

    #[test]
    fn test_mean_packing_bounds() {
        let packed = VoxelMean::pack([0.5, -0.5, 0.0]);
        let mean = VoxelMean { packed, count: 1 };
        let offset = mean.unpack();
        assert_relative_eq!(offset[0], 0.5, epsilon = 1e-3);
        assert_relative_eq!(offset[1], -0.5, epsilon = 1e-3);
        assert_relative_eq!(offset[2], 0.0, epsilon = 1e-3);
    }

    #[test]
    fn test_mean_update_converges() {
        let mut mean = VoxelMean::default();
        for _ in 0..50 {
            mean.update([0.25, -0.25, 0.1], 255);
        }
        let offset = mean.unpack();
        assert_relative_eq!(offset[0], 0.25, epsilon = 2e-2);
        assert_relative_eq!(offset[1], -0.25, epsilon = 2e-2);
        assert_relative_eq!(offset[2], 0.1, epsilon = 2e-2);
        assert_eq!(mean.count, 50);
    }

    #[test]
    fn test_mean_count_saturates_without_forgetting() {
        let mut mean = VoxelMean::default();
        for _ in 0..10 {
            mean.update([-0.4, 0.0, 0.0], 4);
        }
        assert_eq!(mean.count, 4);
        // Still adapts: a run of opposite samples moves the mean.
        for _ in 0..20 {
            mean.update([0.4, 0.0, 0.0], 4);
        }
        assert!(mean.unpack()[0] > 0.2);
    }
}
