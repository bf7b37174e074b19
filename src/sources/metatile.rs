//! `MetatileSource`: tiles served from packed 8x8 metatile archives
//! (§4.2, §4.4).

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::coord::TileCoord;
use crate::disk::metatile;
use crate::error::Result;
use crate::projection::{BBox, Projection};
use crate::sources::{Copyright, DownloadOutcome, MapSource};

pub struct MetatileSource {
    map_type_id: i32,
    label: String,
    root_dir: PathBuf,
    tilesize: (u32, u32),
    zoom_min: i32,
    zoom_max: i32,
    copyright_text: String,
}

impl MetatileSource {
    pub fn new(map_type_id: i32, label: impl Into<String>, root_dir: PathBuf, copyright_text: impl Into<String>) -> Self {
        Self {
            map_type_id,
            label: label.into(),
            root_dir,
            tilesize: (256, 256),
            zoom_min: 0,
            zoom_max: 18,
            copyright_text: copyright_text.into(),
        }
    }

    pub fn read_tile_bytes(&self, tile: TileCoord) -> std::result::Result<Vec<u8>, metatile::MetatileError> {
        let path = metatile::hash_path(&self.root_dir, tile.osm_zoom(), tile.x, tile.y);
        metatile::read_sub_tile_bytes(&path, tile.x, tile.y)
    }
}

#[async_trait]
impl MapSource for MetatileSource {
    fn map_type_id(&self) -> i32 {
        self.map_type_id
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn tilesize(&self) -> (u32, u32) {
        self.tilesize
    }

    fn zoom_range(&self) -> (i32, i32) {
        (self.zoom_min, self.zoom_max)
    }

    fn projection(&self) -> Projection {
        Projection::Mercator
    }

    fn file_extension(&self) -> &str {
        "png"
    }

    fn is_metatiles(&self) -> bool {
        true
    }

    /// Metatiles are a pre-rendered local archive: nothing to download,
    /// reads happen straight from the packed file via `read_tile_bytes`.
    async fn download(
        &self,
        tile: TileCoord,
        _dest: &Path,
        _etag: Option<&str>,
        _last_modified: Option<&str>,
    ) -> Result<DownloadOutcome> {
        match self.read_tile_bytes(tile) {
            Ok(_) => Ok(DownloadOutcome::NotModified),
            Err(_) => Ok(DownloadOutcome::NotFound),
        }
    }

    async fn get_copyright(&self, _bbox: BBox, _zoom: i32) -> Vec<Copyright> {
        vec![Copyright {
            text: self.copyright_text.clone(),
        }]
    }

    fn read_local_bytes(
        &self,
        _cache_dir: &Path,
        _layout: crate::config::CacheLayout,
        tile: TileCoord,
        _is_default_cache_dir: bool,
    ) -> Result<Option<Vec<u8>>> {
        match self.read_tile_bytes(tile) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(metatile::MetatileError::Io { ref source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }
}
