//! GPU delegate for the clearance range fill.
//!
//! One dispatch computes a whole region: the CPU gathers the padded
//! obstacle neighbourhood into a mask buffer, the kernel runs the same
//! brute-force scaled-metric search as the CPU path, and the result is
//! queued for an asynchronous readback. Queued results form the GPU
//! clearance cache; the scheduler drains it with [`RangeFill::sync_to_main_memory`]
//! before CPU reads and drops it with [`RangeFill::clear`].

use std::sync::mpsc;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use log::warn;
use wgpu::util::DeviceExt;

use crate::clearance::NearestParams;
use crate::core::{LocalKey, RegionKey, VoxelKey};
use crate::map::occupancy::UNOBSERVED_VALUE;
use crate::map::OccupancyMap;

use super::program::{GpuProgramRef, ProgramSource};
use super::GpuDevice;

/// Brute-force clearance kernel. Mirrors the CPU search exactly: scaled
/// metric selects the obstacle, flag bit 0 switches the reported
/// magnitude to the unscaled distance.
const RANGE_FILL_KERNEL: &str = r#"
struct Params {
    dims: vec4<u32>,
    half: vec4<i32>,
    axis_scaling: vec4<f32>,
    search_radius: f32,
    resolution: f32,
    min_scale: f32,
    flags: u32,
};

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read> obstacles: array<u32>;
@group(0) @binding(2) var<storage, read_write> clearance: array<f32>;

fn obstacle_at(p: vec3<i32>) -> bool {
    let ext = vec3<i32>(params.dims.xyz) + 2 * params.half.xyz;
    let idx = (p.z * ext.y + p.y) * ext.x + p.x;
    return obstacles[u32(idx)] != 0u;
}

@compute @workgroup_size(4, 4, 4)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x >= params.dims.x || gid.y >= params.dims.y || gid.z >= params.dims.z) {
        return;
    }
    let base = vec3<i32>(gid) + params.half.xyz;
    let radius_sq = params.search_radius * params.search_radius * 1.000001;
    var best_scaled_sq = -1.0;
    var best_unscaled_sq = -1.0;

    if (obstacle_at(base)) {
        best_scaled_sq = 0.0;
        best_unscaled_sq = 0.0;
    } else {
        for (var dz = -params.half.z; dz <= params.half.z; dz++) {
            for (var dy = -params.half.y; dy <= params.half.y; dy++) {
                for (var dx = -params.half.x; dx <= params.half.x; dx++) {
                    let d = vec3<f32>(f32(dx), f32(dy), f32(dz)) * params.resolution;
                    let s = d * params.axis_scaling.xyz;
                    let scaled_sq = dot(s, s);
                    if (scaled_sq > radius_sq) {
                        continue;
                    }
                    if (best_scaled_sq >= 0.0 && scaled_sq >= best_scaled_sq) {
                        continue;
                    }
                    if (!obstacle_at(base + vec3<i32>(dx, dy, dz))) {
                        continue;
                    }
                    best_scaled_sq = scaled_sq;
                    best_unscaled_sq = dot(d, d);
                }
            }
        }
    }

    let out_idx = (gid.z * params.dims.y + gid.y) * params.dims.x + gid.x;
    let unscaled = (params.flags & 1u) != 0u;
    if (best_scaled_sq < 0.0) {
        if (unscaled) {
            clearance[out_idx] = params.search_radius / params.min_scale;
        } else {
            clearance[out_idx] = params.search_radius;
        }
    } else if (unscaled) {
        clearance[out_idx] = sqrt(best_unscaled_sq);
    } else {
        clearance[out_idx] = sqrt(best_scaled_sq);
    }
}
"#;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct FillParams {
    dims: [u32; 4],
    half: [i32; 4],
    axis_scaling: [f32; 4],
    search_radius: f32,
    resolution: f32,
    min_scale: f32,
    flags: u32,
}

struct PendingRegion {
    region_key: RegionKey,
    readback: wgpu::Buffer,
}

/// GPU clearance evaluator with a pending-result cache.
pub(crate) struct RangeFill {
    gpu: Arc<GpuDevice>,
    program: GpuProgramRef,
    valid: bool,
    pending: Vec<PendingRegion>,
}

impl RangeFill {
    pub fn new(gpu: Arc<GpuDevice>) -> Self {
        let program = GpuProgramRef::new(
            "clearance_range_fill",
            ProgramSource::Embedded(RANGE_FILL_KERNEL),
        );
        let valid = program.add_reference(&gpu);
        Self {
            gpu,
            program,
            valid,
            pending: Vec::new(),
        }
    }

    /// True when the kernel built successfully
    pub fn is_valid(&self) -> bool {
        self.valid && self.program.is_valid()
    }

    /// Dispatch the clearance kernel for one region.
    ///
    /// The result is queued; it reaches the clearance layer on the next
    /// [`sync_to_main_memory`]. Returns false when the chunk is absent or
    /// the program is invalid, leaving the caller to run the CPU path.
    ///
    /// [`sync_to_main_memory`]: RangeFill::sync_to_main_memory
    pub fn calculate_for_region(
        &mut self,
        map: &OccupancyMap,
        region_key: RegionKey,
        params: &NearestParams,
    ) -> bool {
        let Some(pipeline) = self.program.pipeline() else {
            return false;
        };
        if map.store().find_region(region_key).is_none() {
            return false;
        }

        let dims = map.region_voxel_dimensions();
        let half = crate::clearance::voxel_search_half_extents(map.resolution(), params);
        let mask = gather_obstacle_mask(map, region_key, half, params);
        let voxel_count = dims.volume();

        let fill_params = FillParams {
            dims: [dims.x as u32, dims.y as u32, dims.z as u32, 0],
            half: [half.x, half.y, half.z, 0],
            axis_scaling: [
                params.axis_scaling[0],
                params.axis_scaling[1],
                params.axis_scaling[2],
                0.0,
            ],
            search_radius: params.search_radius,
            resolution: map.resolution() as f32,
            min_scale: params.min_scale(),
            flags: u32::from(params.report_unscaled),
        };

        let device = &self.gpu.device;
        let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("clearance params"),
            contents: bytemuck::bytes_of(&fill_params),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let mask_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("clearance obstacle mask"),
            contents: bytemuck::cast_slice(&mask),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let out_size = (voxel_count * std::mem::size_of::<f32>()) as wgpu::BufferAddress;
        let out_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("clearance out"),
            size: out_size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("clearance readback"),
            size: out_size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("clearance bind group"),
            layout: &pipeline.get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: mask_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: out_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("clearance range fill"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("clearance range fill"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(
                (dims.x as u32).div_ceil(4),
                (dims.y as u32).div_ceil(4),
                (dims.z as u32).div_ceil(4),
            );
        }
        encoder.copy_buffer_to_buffer(&out_buffer, 0, &readback, 0, out_size);
        self.gpu.queue.submit(Some(encoder.finish()));

        self.pending.push(PendingRegion {
            region_key,
            readback,
        });
        true
    }

    /// Drain queued results into the clearance layer.
    ///
    /// Regions evicted since dispatch are dropped silently.
    pub fn sync_to_main_memory(&mut self, map: &mut OccupancyMap) {
        let clearance_layer = map.clearance_layer();
        for pending in self.pending.drain(..) {
            let slice = pending.readback.slice(..);
            let (tx, rx) = mpsc::channel();
            slice.map_async(wgpu::MapMode::Read, move |result| {
                let _ = tx.send(result);
            });
            self.gpu.device.poll(wgpu::Maintain::Wait);
            match rx.recv() {
                Ok(Ok(())) => {
                    let data = slice.get_mapped_range();
                    map.write_layer_block(pending.region_key, clearance_layer, &data);
                    drop(data);
                    pending.readback.unmap();
                }
                _ => warn!(
                    "clearance readback failed for region ({}, {}, {})",
                    pending.region_key.x, pending.region_key.y, pending.region_key.z
                ),
            }
        }
    }

    /// Drop queued results without writing them back.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

impl Drop for RangeFill {
    fn drop(&mut self) {
        if self.valid {
            self.program.release_reference();
        }
    }
}

/// Gather the padded obstacle mask around a region.
///
/// Voxels outside any resident chunk are clipped (never obstacles), the
/// same as the CPU search.
fn gather_obstacle_mask(
    map: &OccupancyMap,
    region_key: RegionKey,
    half: crate::core::VoxelCoord,
    params: &NearestParams,
) -> Vec<u32> {
    let dims = map.region_voxel_dimensions();
    let ext = crate::core::VoxelCoord::new(
        dims.x + 2 * half.x,
        dims.y + 2 * half.y,
        dims.z + 2 * half.z,
    );
    let threshold = map.occupancy_threshold_value();
    let base = VoxelKey::new(region_key, LocalKey::new(0, 0, 0));
    let mut occ = map.voxel::<f32>(map.occupancy_layer(), base);

    let mut mask = Vec::with_capacity(ext.volume());
    for pz in 0..ext.z {
        for py in 0..ext.y {
            for px in 0..ext.x {
                occ.set_key(map.move_key(base, px - half.x, py - half.y, pz - half.z));
                let obstacle = match occ.value() {
                    Some(value) => {
                        if value == UNOBSERVED_VALUE {
                            params.unknown_as_occupied
                        } else {
                            value >= threshold
                        }
                    }
                    None => false,
                };
                mask.push(u32::from(obstacle));
            }
        }
    }
    mask
}
