//! Map configuration types.

use serde::{Deserialize, Serialize};

use crate::core::VoxelCoord;
use crate::error::{MapError, Result};

/// Occupancy update parameters.
///
/// Probabilities are converted to log-odds increments when the map is
/// opened; see [`crate::map::occupancy`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OccupancyConfig {
    /// Probability applied by a hit observation.
    ///
    /// Must be > 0.5. Typical: 0.7 (log-odds +0.85)
    pub hit_probability: f32,

    /// Probability applied by a miss observation.
    ///
    /// Must be < 0.5. Typical: 0.4 (log-odds -0.41)
    pub miss_probability: f32,

    /// Probability above which a voxel reads as occupied.
    pub occupancy_threshold: f32,

    /// Lower probability clamp applied after every update.
    ///
    /// Prevents overconfidence in free space.
    pub min_probability: f32,

    /// Upper probability clamp applied after every update.
    ///
    /// Prevents overconfidence in obstacles.
    pub max_probability: f32,

    /// Sample count at which the sub-voxel mean saturates.
    ///
    /// Beyond this many samples the running mean keeps adapting with a
    /// fixed minimum weight instead of freezing.
    pub max_mean_samples: u32,
}

impl Default for OccupancyConfig {
    fn default() -> Self {
        Self {
            hit_probability: 0.7,
            miss_probability: 0.4,
            occupancy_threshold: 0.5,
            min_probability: 0.001,
            max_probability: 0.999,
            max_mean_samples: 255,
        }
    }
}

/// Top-level map configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapConfig {
    /// Voxel edge length in meters.
    pub resolution: f64,

    /// Voxels per region along each axis.
    ///
    /// Each component must be in `1..=255`; the local key is a byte triplet.
    pub region_voxel_dimensions: VoxelCoord,

    /// Occupancy update parameters.
    pub occupancy: OccupancyConfig,

    /// Carry a sub-voxel mean layer.
    pub enable_mean: bool,

    /// Carry an NDT observation covariance layer.
    pub enable_covariance: bool,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            resolution: 0.1, // 10cm voxels
            region_voxel_dimensions: VoxelCoord::splat(32),
            occupancy: OccupancyConfig::default(),
            enable_mean: true,
            enable_covariance: false,
        }
    }
}

impl MapConfig {
    /// Validate the configuration, returning it for chaining.
    pub fn validate(&self) -> Result<()> {
        if !(self.resolution.is_finite() && self.resolution > 0.0) {
            return Err(MapError::InvalidConfig(format!(
                "resolution must be positive, got {}",
                self.resolution
            )));
        }
        let dims = self.region_voxel_dimensions;
        for (axis, d) in [(0, dims.x), (1, dims.y), (2, dims.z)] {
            if !(1..=255).contains(&d) {
                return Err(MapError::InvalidConfig(format!(
                    "region voxel dimension {} must be in 1..=255, got {}",
                    axis, d
                )));
            }
        }
        let occ = &self.occupancy;
        let probability = |name: &str, p: f32| -> Result<()> {
            if !(p.is_finite() && p > 0.0 && p < 1.0) {
                return Err(MapError::InvalidConfig(format!(
                    "{} must be in (0, 1), got {}",
                    name, p
                )));
            }
            Ok(())
        };
        probability("hit_probability", occ.hit_probability)?;
        probability("miss_probability", occ.miss_probability)?;
        probability("occupancy_threshold", occ.occupancy_threshold)?;
        probability("min_probability", occ.min_probability)?;
        probability("max_probability", occ.max_probability)?;
        if occ.min_probability >= occ.max_probability {
            return Err(MapError::InvalidConfig(
                "min_probability must be below max_probability".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(MapConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_non_positive_resolution() {
        let mut config = MapConfig::default();
        config.resolution = 0.0;
        assert!(config.validate().is_err());
        config.resolution = -0.1;
        assert!(config.validate().is_err());
        config.resolution = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_region_dimensions() {
        let mut config = MapConfig::default();
        config.region_voxel_dimensions = VoxelCoord::new(0, 32, 32);
        assert!(config.validate().is_err());
        config.region_voxel_dimensions = VoxelCoord::new(32, 256, 32);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_inverted_probability_clamp() {
        let mut config = MapConfig::default();
        config.occupancy.min_probability = 0.9;
        config.occupancy.max_probability = 0.1;
        assert!(config.validate().is_err());
    }
}
