//! Terraserver-style UTM-addressed network source (§4.2 variant list).

use async_trait::async_trait;
use std::path::Path;

use crate::coord::TileCoord;
use crate::disk;
use crate::error::Result;
use crate::projection::{BBox, Projection};
use crate::sources::{Copyright, DownloadOutcome, MapSource};

pub struct TerraserverSource {
    map_type_id: i32,
    label: String,
    url_template: String,
    tilesize: (u32, u32),
    zoom_min: i32,
    zoom_max: i32,
    copyright_text: String,
    client: reqwest::Client,
}

impl TerraserverSource {
    pub fn new(
        map_type_id: i32,
        label: impl Into<String>,
        url_template: impl Into<String>,
        copyright_text: impl Into<String>,
    ) -> Self {
        Self {
            map_type_id,
            label: label.into(),
            url_template: url_template.into(),
            tilesize: (200, 200),
            zoom_min: 0,
            zoom_max: 10,
            copyright_text: copyright_text.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl MapSource for TerraserverSource {
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
        Projection::Utm
    }

    fn file_extension(&self) -> &str {
        ""
    }

    fn url_for(&self, tile: TileCoord) -> Option<String> {
        Some(
            self.url_template
                .replace("{z}", &tile.zoom.to_string())
                .replace("{x}", &tile.x.to_string())
                .replace("{y}", &tile.y.to_string())
                .replace("{zone}", &tile.zone.to_string()),
        )
    }

    async fn download(
        &self,
        tile: TileCoord,
        dest: &Path,
        _etag: Option<&str>,
        _last_modified: Option<&str>,
    ) -> Result<DownloadOutcome> {
        let url = self
            .url_for(tile)
            .expect("terraserver source always produces a url");
        let response = match self.client.get(&url).send().await {
            Ok(resp) => resp,
            Err(source) => {
                return Ok(DownloadOutcome::Error(format!(
                    "request to {url} failed: {source}"
                )))
            }
        };
        if !response.status().is_success() {
            return Ok(DownloadOutcome::Error(format!(
                "http {} fetching {url}",
                response.status()
            )));
        }
        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(source) => {
                return Ok(DownloadOutcome::Error(format!(
                    "failed reading response body from {url}: {source}"
                )))
            }
        };
        disk::write_atomic(dest, &bytes)?;
        Ok(DownloadOutcome::Fetched {
            bytes_written: bytes.len() as u64,
        })
    }

    async fn get_copyright(&self, _bbox: BBox, _zoom: i32) -> Vec<Copyright> {
        vec![Copyright {
            text: self.copyright_text.clone(),
        }]
    }
}
