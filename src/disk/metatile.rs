//! Metatile reader: extracts one tile from a packed 8x8 archive (§4.4, §6).

use image::RgbaImage;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Tiles packed per side in a metatile (8x8 = 64).
pub const METATILE_DIM: i32 = 8;
pub const METATILE_COUNT: u32 = (METATILE_DIM * METATILE_DIM) as u32;

/// Header size: 4-byte magic + 4-byte count + 3 * 4-byte (x,y,z) + count *
/// 8-byte (offset, size) index entries.
const FIXED_HEADER_BYTES: u64 = 16;
const INDEX_ENTRY_BYTES: u64 = 8;

/// Bound on a single sub-tile's declared size, guarding against a
/// corrupt/malicious header causing an unbounded read.
const MAX_TILE_BYTES: u32 = 16 * 1024 * 1024;

const MAGIC_UNCOMPRESSED: &[u8; 4] = b"META";
const MAGIC_COMPRESSED: &[u8; 4] = b"METZ";

#[derive(Debug, Error)]
pub enum MetatileError {
    #[error("metatile {path} has bad magic bytes")]
    BadMagic { path: String },

    #[error("compressed (METZ) metatiles are not supported: {path}")]
    CompressedUnsupported { path: String },

    #[error("metatile {path} has count {count}, expected {expected}")]
    BadCount {
        path: String,
        count: u32,
        expected: u32,
    },

    #[error("metatile {path} declares sub-tile size {size} exceeding the {max} byte bound")]
    TileTooLarge { path: String, size: u32, max: u32 },

    #[error("metatile sub-tile ({x}, {y}) decode failed: {source}")]
    Decode {
        x: i32,
        y: i32,
        #[source]
        source: image::ImageError,
    },

    #[error("io error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Computes the 5-level hash path `<dir>/<z>/<h4>/<h3>/<h2>/<h1>/<h0>.meta`
/// for the metatile containing `(x, y)` at OSM zoom `z`, matching the
/// original's `osm_metatile.cpp` hash scheme: the metatile's hash is
/// derived from `x`/`y` with the low 3 bits (one metatile row/col) masked
/// off, then each of 5 bytes of that combined hash becomes one path
/// segment.
pub fn hash_path(dir: &Path, osm_zoom: i32, x: i32, y: i32) -> PathBuf {
    let mask = METATILE_DIM - 1;
    let mut bx = x & !mask;
    let mut by = y & !mask;

    let mut hash = [0u8; 5];
    for slot in hash.iter_mut() {
        *slot = (((bx & 0x0f) << 4) | (by & 0x0f)) as u8;
        bx >>= 4;
        by >>= 4;
    }

    dir.join(osm_zoom.to_string())
        .join(format!("{}", hash[4]))
        .join(format!("{}", hash[3]))
        .join(format!("{}", hash[2]))
        .join(format!("{}", hash[1]))
        .join(format!("{}.meta", hash[0]))
}

struct IndexEntry {
    offset: u32,
    size: u32,
}

/// Reads sub-tile `(x, y)` out of the metatile covering it under `dir`,
/// decoding the embedded PNG payload.
pub fn read_metatile(dir: &Path, osm_zoom: i32, x: i32, y: i32) -> Result<RgbaImage, MetatileError> {
    let path = hash_path(dir, osm_zoom, x, y);
    let bytes = read_sub_tile_bytes(&path, x, y)?;
    image::load_from_memory(&bytes)
        .map(|img| img.to_rgba8())
        .map_err(|source| MetatileError::Decode { x, y, source })
}

/// Reads the raw (PNG) bytes for sub-tile `(x, y)` without decoding, used
/// by tests and by callers that just want to pass bytes through.
pub fn read_sub_tile_bytes(path: &Path, x: i32, y: i32) -> Result<Vec<u8>, MetatileError> {
    let path_str = path.display().to_string();
    let mut file = std::fs::File::open(path).map_err(|source| MetatileError::Io {
        path: path_str.clone(),
        source,
    })?;

    let mut magic = [0u8; 4];
    file.read_exact(&mut magic).map_err(|source| MetatileError::Io {
        path: path_str.clone(),
        source,
    })?;

    if &magic == MAGIC_COMPRESSED {
        return Err(MetatileError::CompressedUnsupported { path: path_str });
    }
    if &magic != MAGIC_UNCOMPRESSED {
        return Err(MetatileError::BadMagic { path: path_str });
    }

    let mut header_rest = [0u8; 12];
    file.read_exact(&mut header_rest).map_err(|source| MetatileError::Io {
        path: path_str.clone(),
        source,
    })?;
    let count = u32::from_le_bytes(header_rest[0..4].try_into().unwrap());
    if count != METATILE_COUNT {
        return Err(MetatileError::BadCount {
            path: path_str,
            count,
            expected: METATILE_COUNT,
        });
    }
    // header_rest[4..8] = base x, [8..12] = base y (unused here; the hash
    // path already selects the right metatile).

    let sub_index = ((x.rem_euclid(METATILE_DIM)) * METATILE_DIM + y.rem_euclid(METATILE_DIM)) as u64;
    let entry_offset = FIXED_HEADER_BYTES + sub_index * INDEX_ENTRY_BYTES;

    file.seek(SeekFrom::Start(entry_offset))
        .map_err(|source| MetatileError::Io {
            path: path_str.clone(),
            source,
        })?;
    let mut entry_bytes = [0u8; 8];
    file.read_exact(&mut entry_bytes).map_err(|source| MetatileError::Io {
        path: path_str.clone(),
        source,
    })?;
    let entry = IndexEntry {
        offset: u32::from_le_bytes(entry_bytes[0..4].try_into().unwrap()),
        size: u32::from_le_bytes(entry_bytes[4..8].try_into().unwrap()),
    };

    if entry.size > MAX_TILE_BYTES {
        return Err(MetatileError::TileTooLarge {
            path: path_str,
            size: entry.size,
            max: MAX_TILE_BYTES,
        });
    }

    file.seek(SeekFrom::Start(entry.offset as u64))
        .map_err(|source| MetatileError::Io {
            path: path_str.clone(),
            source,
        })?;
    let mut buf = vec![0u8; entry.size as usize];
    file.read_exact(&mut buf).map_err(|source| MetatileError::Io {
        path: path_str,
        source,
    })?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_test_metatile(path: &Path, base_x: i32, base_y: i32, payloads: &[(u8, u8, Vec<u8>)]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut file = std::fs::File::create(path).unwrap();
        file.write_all(MAGIC_UNCOMPRESSED).unwrap();
        file.write_all(&METATILE_COUNT.to_le_bytes()).unwrap();
        file.write_all(&base_x.to_le_bytes()).unwrap();
        file.write_all(&base_y.to_le_bytes()).unwrap();

        let mut offset = FIXED_HEADER_BYTES + (METATILE_COUNT as u64) * INDEX_ENTRY_BYTES;
        let mut index = vec![(0u32, 0u32); METATILE_COUNT as usize];
        for (sx, sy, data) in payloads {
            let idx = (*sx as usize) * METATILE_DIM as usize + *sy as usize;
            index[idx] = (offset as u32, data.len() as u32);
            offset += data.len() as u64;
        }
        for (o, s) in &index {
            file.write_all(&o.to_le_bytes()).unwrap();
            file.write_all(&s.to_le_bytes()).unwrap();
        }
        for (_, _, data) in payloads {
            file.write_all(data).unwrap();
        }
    }

    #[test]
    fn reads_correct_sub_tile_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.meta");
        let known_payload = vec![0xAB; 1024];
        write_test_metatile(
            &path,
            0,
            0,
            &[(3, 4, known_payload.clone()), (0, 0, vec![0x01, 0x02])],
        );

        let bytes = read_sub_tile_bytes(&path, 3, 4).unwrap();
        assert_eq!(bytes, known_payload);
    }

    #[test]
    fn bad_count_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.meta");
        std::fs::create_dir_all(dir.path()).unwrap();
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(MAGIC_UNCOMPRESSED).unwrap();
        file.write_all(&16u32.to_le_bytes()).unwrap(); // wrong count
        file.write_all(&0i32.to_le_bytes()).unwrap();
        file.write_all(&0i32.to_le_bytes()).unwrap();
        drop(file);

        let err = read_sub_tile_bytes(&path, 0, 0).unwrap_err();
        assert!(matches!(err, MetatileError::BadCount { count: 16, .. }));
    }

    #[test]
    fn compressed_magic_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("z.meta");
        std::fs::write(&path, MAGIC_COMPRESSED).unwrap();
        let err = read_sub_tile_bytes(&path, 0, 0).unwrap_err();
        assert!(matches!(err, MetatileError::CompressedUnsupported { .. }));
    }

    #[test]
    fn hash_path_has_five_nested_segments_under_zoom() {
        let dir = Path::new("/cache");
        let path = hash_path(dir, 12, 100, 200);
        let rel = path.strip_prefix(dir).unwrap();
        let components: Vec<_> = rel.components().collect();
        // zoom + 5 hash segments (last one carries .meta extension)
        assert_eq!(components.len(), 6);
    }
}
