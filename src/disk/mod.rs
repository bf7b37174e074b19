//! On-disk tile storage: file layout schemes, metatile and MBTiles
//! readers, and the `DiskStore` that ties them together (§4.4, §6).

pub mod metatile;
pub mod sqlite;

use crate::coord::TileCoord;
use image::RgbaImage;
use std::path::{Path, PathBuf};

use crate::config::CacheLayout;

/// Builds the on-disk path for a tile under one of the two supported
/// layouts, bit-exact per §6:
///
/// - Viking: `<cache>/t<type>s<scale>z<z>/<x>/<y>`, extension-less.
/// - OSM: `<cache>[/<name>]/<osm_zoom>/<x>/<y>.<ext>`, `<name>` included
///   only when `cache_dir` equals the process-wide default cache dir.
pub fn file_path_for(
    cache_dir: &Path,
    layout: CacheLayout,
    tile: TileCoord,
    map_type_id: i32,
    name: &str,
    ext: &str,
    is_default_cache_dir: bool,
) -> PathBuf {
    match layout {
        CacheLayout::Viking => cache_dir
            .join(format!("t{map_type_id}s{}z{}", tile.zoom, tile.osm_zoom()))
            .join(tile.x.to_string())
            .join(tile.y.to_string()),
        CacheLayout::Osm => {
            let mut path = cache_dir.to_path_buf();
            if is_default_cache_dir {
                path = path.join(name);
            }
            path.join(tile.osm_zoom().to_string())
                .join(tile.x.to_string())
                .join(format!("{}.{}", tile.y, ext))
        }
    }
}

/// Loads and decodes whatever raw tile bytes a source scheme hands back.
/// Decode failures are surfaced (for a status message) but never delete
/// the underlying file -- that only happens in explicit redownload modes
/// (§4.4, §7).
pub fn decode_image(bytes: &[u8]) -> crate::error::Result<RgbaImage> {
    let img = image::load_from_memory(bytes).map_err(|_| crate::error::TileCacheError::CorruptImage {
        path: String::new(),
    })?;
    Ok(img.to_rgba8())
}

/// Reads a plain tile file from disk (direct-file / post-download layouts).
/// Returns `Ok(None)` when the file does not exist; corrupt files are
/// reported via `Err` rather than silently treated as absent, so the
/// caller can log a status message per §4.4/§7.
pub fn load_plain_file(path: &Path) -> crate::error::Result<Option<RgbaImage>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(path)?;
    let img = image::load_from_memory(&bytes).map_err(|_| crate::error::TileCacheError::CorruptImage {
        path: path.display().to_string(),
    })?;
    Ok(Some(img.to_rgba8()))
}

/// Writes tile bytes via a temporary file followed by an atomic rename, so
/// concurrent readers never observe a torn file (§4.5 step 3).
pub fn write_atomic(path: &Path, bytes: &[u8]) -> crate::error::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| {
            crate::error::TileCacheError::CacheDirUnavailable {
                path: parent.display().to_string(),
                source,
            }
        })?;
    }
    let tmp_path = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or("part")
    ));
    std::fs::write(&tmp_path, bytes).map_err(|source| crate::error::TileCacheError::Write {
        path: tmp_path.display().to_string(),
        source,
    })?;
    std::fs::rename(&tmp_path, path).map_err(|source| crate::error::TileCacheError::Write {
        path: path.display().to_string(),
        source,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viking_layout_path() {
        // scale (internal zoom) 12 corresponds to osm_zoom 17-12=5: the
        // `s<scale>` and `z<osm_zoom>` segments must differ.
        let tile = TileCoord::from_osm(10, 20, 5, 0).unwrap();
        assert_eq!(tile.zoom, 12);
        let path = file_path_for(
            Path::new("/cache"),
            CacheLayout::Viking,
            tile,
            13,
            "osm",
            "png",
            true,
        );
        assert_eq!(path, PathBuf::from("/cache/t13s12z5/10/20"));
    }

    #[test]
    fn osm_layout_path_with_name_when_default_dir() {
        let tile = TileCoord::from_osm(10, 20, 5, 0).unwrap();
        let path = file_path_for(
            Path::new("/cache"),
            CacheLayout::Osm,
            tile,
            13,
            "osm",
            "png",
            true,
        );
        assert_eq!(path, PathBuf::from("/cache/osm/5/10/20.png"));
    }

    #[test]
    fn osm_layout_path_without_name_for_custom_dir() {
        let tile = TileCoord::from_osm(10, 20, 5, 0).unwrap();
        let path = file_path_for(
            Path::new("/custom/cache"),
            CacheLayout::Osm,
            tile,
            13,
            "osm",
            "jpg",
            false,
        );
        assert_eq!(path, PathBuf::from("/custom/cache/5/10/20.jpg"));
    }

    #[test]
    fn write_then_read_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("tile.bin");
        let bytes = b"not actually a png but bytes are bytes".to_vec();
        write_atomic(&path, &bytes).unwrap();
        let read_back = std::fs::read(&path).unwrap();
        assert_eq!(read_back, bytes);
    }

    #[test]
    fn load_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.png");
        assert!(load_plain_file(&path).unwrap().is_none());
    }
}
