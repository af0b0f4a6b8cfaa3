//! # Akash-Map: Probabilistic 3D Occupancy Mapping
//!
//! A voxel mapping engine for mobile robots: ranging observations go in,
//! log-odds occupancy beliefs and derived layers (sub-voxel means, NDT
//! covariance, obstacle clearance) come out.
//!
//! ## Features
//!
//! - **Chunked Sparse Storage**: space is split into fixed-size regions,
//!   allocated on first write and evicted by age or distance
//! - **Layered Voxel Model**: each voxel carries named, typed channels
//!   described by an immutable layout with per-layer alignment and
//!   default-initialisation
//! - **Incremental Clearance Fields**: a time-sliced process keeps the
//!   distance-to-nearest-obstacle layer consistent with occupancy as the
//!   map mutates, on the CPU or a GPU delegate
//! - **Deterministic Persistence**: a binary format that round-trips
//!   voxel contents and write stamps bit-identically
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use akash_map::{ClearanceProcess, MapConfig, OccupancyMap, QueryFlags};
//! use akash_map::core::WorldPoint;
//!
//! let mut map = OccupancyMap::new(MapConfig::default()).unwrap();
//!
//! // Integrate ranging observations.
//! map.integrate_ray(WorldPoint::ZERO, WorldPoint::new(1.2, 0.4, 0.0));
//!
//! // Keep the clearance layer up to date, 5ms at a time.
//! let mut clearance = ClearanceProcess::new(1.0, QueryFlags::empty());
//! clearance.update(&mut map, 0.005);
//!
//! let key = map.voxel_key(WorldPoint::new(1.0, 0.4, 0.0));
//! let distance: Option<f32> = map.voxel(map.clearance_layer(), key).value();
//! println!("clearance: {:?}", distance);
//! ```
//!
//! ## Coordinate Frame
//!
//! World coordinates follow the ROS REP-103 convention (X-forward,
//! Y-left, Z-up, meters). Voxel addressing uses floor semantics
//! symmetric around the origin: world point -0.01 lies in voxel -1.
//!
//! ## Architecture
//!
//! - [`core`]: value types (points, voxel keys, bounds)
//! - [`config`]: map configuration
//! - [`layout`]: per-voxel layer descriptors
//! - [`map`]: chunk store, typed voxel accessors, occupancy integration
//! - [`query`]: region walking and in-region tiling
//! - [`clearance`]: the incremental clearance process
//! - [`gpu`]: device handle, program references, GPU range fill
//! - [`io`]: binary persistence

pub mod clearance;
pub mod config;
pub mod core;
pub mod error;
pub mod gpu;
pub mod io;
pub mod layout;
pub mod map;
pub mod query;

// Re-export main types at crate root
pub use clearance::{ClearanceProcess, QueryFlags, UpdateResult};
pub use config::{MapConfig, OccupancyConfig};
pub use error::{MapError, Result};
pub use layout::{LayerIndex, MapLayout};
pub use map::{OccupancyMap, OccupancyType, Voxel, VoxelMut};
