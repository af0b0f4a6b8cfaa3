//! NDT observation covariance layer type.
//!
//! The map only carries this layer; the NDT fusion math that would fill it
//! lives with the sensor integrator.

use bytemuck::{Pod, Zeroable};

/// Packed per-voxel observation covariance.
///
/// Upper-triangular square root of the 3×3 covariance matrix, row by row:
/// `[xx, xy, yy, xz, yz, zz]`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct CovarianceVoxel {
    /// Packed triangular entries
    pub tri: [f32; 6],
}

impl CovarianceVoxel {
    /// True when no observation has been folded in yet
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tri.iter().all(|&v| v == 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_empty() {
        assert!(CovarianceVoxel::default().is_empty());
        let cov = CovarianceVoxel {
            tri: [0.1, 0.0, 0.1, 0.0, 0.0, 0.1],
        };
        assert!(!cov.is_empty());
    }
}
