//! `DirectFileSource`: a pre-downloaded tree of tile files, addressed
//! directly by the chosen cache layout with no network/archive step
//! (§4.2 variant list).

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::coord::TileCoord;
use crate::error::Result;
use crate::projection::{BBox, Projection};
use crate::sources::{Copyright, DownloadOutcome, MapSource};

pub struct DirectFileSource {
    map_type_id: i32,
    label: String,
    root_dir: PathBuf,
    tilesize: (u32, u32),
    zoom_min: i32,
    zoom_max: i32,
    ext: String,
}

impl DirectFileSource {
    pub fn new(map_type_id: i32, label: impl Into<String>, root_dir: PathBuf, ext: impl Into<String>) -> Self {
        Self {
            map_type_id,
            label: label.into(),
            root_dir,
            tilesize: (256, 256),
            zoom_min: 0,
            zoom_max: 20,
            ext: ext.into(),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }
}

#[async_trait]
impl MapSource for DirectFileSource {
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
        &self.ext
    }

    fn is_direct_file(&self) -> bool {
        true
    }

    /// A direct-file tree is populated out of band (by the application's
    /// file import, not by this crate); there is nothing to fetch.
    async fn download(
        &self,
        tile: TileCoord,
        _dest: &Path,
        _etag: Option<&str>,
        _last_modified: Option<&str>,
    ) -> Result<DownloadOutcome> {
        let path = self
            .root_dir
            .join(tile.osm_zoom().to_string())
            .join(tile.x.to_string())
            .join(format!("{}.{}", tile.y, self.ext));
        if path.exists() {
            Ok(DownloadOutcome::NotModified)
        } else {
            Ok(DownloadOutcome::NotFound)
        }
    }

    async fn get_copyright(&self, _bbox: BBox, _zoom: i32) -> Vec<Copyright> {
        Vec::new()
    }
}
