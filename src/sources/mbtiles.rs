//! `MbTilesSource`: tiles served from a single SQLite archive (§4.2, §4.4).

use async_trait::async_trait;
use std::path::Path;

use crate::coord::TileCoord;
use crate::disk::sqlite::SqliteTileReader;
use crate::error::Result;
use crate::projection::{BBox, Projection};
use crate::sources::{Copyright, DownloadOutcome, MapSource};

pub struct MbTilesSource {
    map_type_id: i32,
    label: String,
    reader: SqliteTileReader,
    tilesize: (u32, u32),
    zoom_min: i32,
    zoom_max: i32,
}

impl MbTilesSource {
    pub fn open(map_type_id: i32, label: impl Into<String>, path: &Path) -> Result<Self> {
        let reader = SqliteTileReader::open(path)?;
        let zoom_min = reader
            .metadata_value("minzoom")?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let zoom_max = reader
            .metadata_value("maxzoom")?
            .and_then(|v| v.parse().ok())
            .unwrap_or(20);
        Ok(Self {
            map_type_id,
            label: label.into(),
            reader,
            tilesize: (256, 256),
            zoom_min,
            zoom_max,
        })
    }

    /// Reads the raw tile bytes for `tile` directly, bypassing the
    /// download path -- this is how `DiskStore` consults an mbtiles
    /// source on a cache miss (§2's data flow, §4.4).
    pub fn read_tile_bytes(&self, tile: TileCoord) -> Result<Option<Vec<u8>>> {
        self.reader.get_tile(tile.osm_zoom(), tile.x, tile.y)
    }
}

#[async_trait]
impl MapSource for MbTilesSource {
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

    fn is_mbtiles(&self) -> bool {
        true
    }

    /// MBTiles is a read-only local archive: there is nothing to fetch
    /// over the network, so this always reports not-found rather than
    /// attempting an HTTP request.
    async fn download(
        &self,
        tile: TileCoord,
        _dest: &Path,
        _etag: Option<&str>,
        _last_modified: Option<&str>,
    ) -> Result<DownloadOutcome> {
        match self.read_tile_bytes(tile)? {
            Some(_) => Ok(DownloadOutcome::NotModified),
            None => Ok(DownloadOutcome::NotFound),
        }
    }

    async fn get_copyright(&self, _bbox: BBox, _zoom: i32) -> Vec<Copyright> {
        match self.reader.metadata_value("attribution") {
            Ok(Some(text)) => vec![Copyright { text }],
            _ => Vec::new(),
        }
    }

    fn read_local_bytes(
        &self,
        _cache_dir: &Path,
        _layout: crate::config::CacheLayout,
        tile: TileCoord,
        _is_default_cache_dir: bool,
    ) -> Result<Option<Vec<u8>>> {
        self.read_tile_bytes(tile)
    }
}
