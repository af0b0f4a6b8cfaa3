//! Native binary map format.
//!
//! Layout (all values little-endian):
//! - Header:
//!   - Magic: u32
//!   - Version: u32
//!   - Resolution: f64
//!   - Region voxel dimensions: 3 × i32
//! - Layout descriptor, layer count then per layer:
//!   - Name length: u32, name bytes (UTF-8)
//!   - Element size: u32
//!   - Alignment: u32
//!   - Default bytes: element-size bytes
//! - Map stamp: u64
//! - Chunk count: u64, then per chunk in region-key order:
//!   - Region key: 3 × i16
//!   - Touch stamps: layer-count × u64
//!   - Per layer: presence byte, then the block bytes verbatim
//!
//! Readers reject unknown magic, unsupported versions and essential
//! layers whose element sizes do not match this build.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::config::MapConfig;
use crate::core::{RegionKey, VoxelCoord};
use crate::error::{MapError, Result};
use crate::layout::{
    LayerIndex, MapLayout, CLEARANCE_LAYER, COVARIANCE_LAYER, MEAN_LAYER, OCCUPANCY_LAYER,
};
use crate::map::heightmap::{HEIGHTMAP_BUILD_LAYER, HEIGHTMAP_LAYER};
use crate::map::OccupancyMap;

const MAP_MAGIC: u32 = 0x414B_4D50; // "AKMP" for Akash Map
const MAP_VERSION: u32 = 1;

// Sanity bounds for corrupt inputs.
const MAX_LAYERS: u32 = 1024;
const MAX_LAYER_NAME: u32 = 256;

/// Element size this build expects for well-known layers.
fn essential_layer_size(name: &str) -> Option<usize> {
    match name {
        OCCUPANCY_LAYER | CLEARANCE_LAYER => Some(4),
        MEAN_LAYER | HEIGHTMAP_LAYER | HEIGHTMAP_BUILD_LAYER => Some(8),
        COVARIANCE_LAYER => Some(24),
        _ => None,
    }
}

/// Save a map to a binary file.
pub fn save_map<P: AsRef<Path>>(map: &OccupancyMap, path: P) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    write_map(map, &mut writer)?;
    writer.flush()?;
    Ok(())
}

/// Load a map from a binary file.
///
/// Geometry and layout come from the file; occupancy parameters come from
/// `config`.
pub fn load_map<P: AsRef<Path>>(path: P, config: MapConfig) -> Result<OccupancyMap> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    read_map(&mut reader, config)
}

/// Write a map to `writer` in the native binary format.
pub fn write_map<W: Write>(map: &OccupancyMap, writer: &mut W) -> Result<()> {
    writer.write_all(&MAP_MAGIC.to_le_bytes())?;
    writer.write_all(&MAP_VERSION.to_le_bytes())?;
    writer.write_all(&map.resolution().to_le_bytes())?;
    let dims = map.region_voxel_dimensions();
    for d in [dims.x, dims.y, dims.z] {
        writer.write_all(&d.to_le_bytes())?;
    }

    // Layout descriptor first: a reader reconstructs addressing before it
    // sees any chunk payload.
    let layout = map.layout();
    writer.write_all(&(layout.layer_count() as u32).to_le_bytes())?;
    for (_, layer) in layout.iter() {
        let name = layer.name().as_bytes();
        writer.write_all(&(name.len() as u32).to_le_bytes())?;
        writer.write_all(name)?;
        writer.write_all(&(layer.element_size() as u32).to_le_bytes())?;
        writer.write_all(&(layer.alignment() as u32).to_le_bytes())?;
        writer.write_all(layer.default_bytes())?;
    }

    writer.write_all(&map.stamp().to_le_bytes())?;

    writer.write_all(&(map.store().len() as u64).to_le_bytes())?;
    for (key, chunk) in map.store().iterate() {
        for k in [key.x, key.y, key.z] {
            writer.write_all(&k.to_le_bytes())?;
        }
        for (index, _) in layout.iter() {
            writer.write_all(&chunk.touched_stamp(index).to_le_bytes())?;
        }
        for (index, _) in layout.iter() {
            match chunk.layer_bytes(index) {
                Some(bytes) => {
                    writer.write_all(&[1u8])?;
                    writer.write_all(bytes)?;
                }
                None => writer.write_all(&[0u8])?,
            }
        }
    }
    Ok(())
}

/// Read a map from `reader` in the native binary format.
pub fn read_map<R: Read>(reader: &mut R, mut config: MapConfig) -> Result<OccupancyMap> {
    let magic = read_u32(reader)?;
    if magic != MAP_MAGIC {
        return Err(MapError::Format("bad magic number".to_string()));
    }
    let version = read_u32(reader)?;
    if version != MAP_VERSION {
        return Err(MapError::VersionMismatch {
            expected: MAP_VERSION,
            found: version,
        });
    }

    config.resolution = read_f64(reader)?;
    config.region_voxel_dimensions =
        VoxelCoord::new(read_i32(reader)?, read_i32(reader)?, read_i32(reader)?);

    let layer_count = read_u32(reader)?;
    if layer_count > MAX_LAYERS {
        return Err(MapError::Format(format!(
            "implausible layer count {}",
            layer_count
        )));
    }
    let mut layout = MapLayout::new();
    for _ in 0..layer_count {
        let name_len = read_u32(reader)?;
        if name_len > MAX_LAYER_NAME {
            return Err(MapError::Format(format!(
                "implausible layer name length {}",
                name_len
            )));
        }
        let mut name_bytes = vec![0u8; name_len as usize];
        reader.read_exact(&mut name_bytes)?;
        let name = String::from_utf8(name_bytes)
            .map_err(|_| MapError::Format("layer name is not UTF-8".to_string()))?;
        let element_size = read_u32(reader)? as usize;
        let alignment = read_u32(reader)? as usize;
        let mut default_bytes = vec![0u8; element_size];
        reader.read_exact(&mut default_bytes)?;

        if let Some(expected) = essential_layer_size(&name) {
            if element_size != expected {
                return Err(MapError::Format(format!(
                    "layer '{}' element size {} does not match expected {}",
                    name, element_size, expected
                )));
            }
        }
        layout
            .add_layer(&name, element_size, alignment, &default_bytes)
            .map_err(|err| MapError::Format(format!("bad layer descriptor: {}", err)))?;
    }

    let stamp = read_u64(reader)?;
    let mut map = OccupancyMap::from_parts(config, layout, stamp)?;

    let voxel_count = map.region_voxel_count();
    let chunk_count = read_u64(reader)?;
    for _ in 0..chunk_count {
        let key = RegionKey::new(read_i16(reader)?, read_i16(reader)?, read_i16(reader)?);

        let layer_total = map.layout().layer_count();
        let mut stamps = Vec::with_capacity(layer_total);
        for _ in 0..layer_total {
            stamps.push(read_u64(reader)?);
        }

        {
            let chunk = map
                .store_mut()
                .region_mut(key, true)
                .ok_or_else(|| MapError::Format("cannot instantiate chunk".to_string()))?;
            for (index, stamp) in stamps.iter().enumerate() {
                chunk.set_touched_stamp(LayerIndex(index), *stamp);
            }
        }

        for index in 0..layer_total {
            let mut present = [0u8; 1];
            reader.read_exact(&mut present)?;
            if present[0] == 0 {
                continue;
            }
            let layer = LayerIndex(index);
            let mut bytes = vec![0u8; map.layout().chunk_byte_size(layer, voxel_count)];
            reader.read_exact(&mut bytes)?;
            if !map.write_layer_block(key, layer, &bytes) {
                return Err(MapError::Format("cannot restore layer block".to_string()));
            }
        }
    }

    Ok(map)
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

fn read_i32<R: Read>(reader: &mut R) -> Result<i32> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(i32::from_le_bytes(bytes))
}

fn read_i16<R: Read>(reader: &mut R) -> Result<i16> {
    let mut bytes = [0u8; 2];
    reader.read_exact(&mut bytes)?;
    Ok(i16::from_le_bytes(bytes))
}

fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes)?;
    Ok(u64::from_le_bytes(bytes))
}

fn read_f64<R: Read>(reader: &mut R) -> Result<f64> {
    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes)?;
    Ok(f64::from_le_bytes(bytes))
}
