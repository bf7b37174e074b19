//! Slippy-map (OSM-style) network tile source: the default variant.

use async_trait::async_trait;
use std::path::Path;

use crate::coord::TileCoord;
use crate::disk;
use crate::error::Result;
use crate::projection::{BBox, Projection};
use crate::sources::{Copyright, DownloadOutcome, MapSource};

/// A plain `{z}/{x}/{y}` (or `{z}/{y}/{x}`) tile server, e.g. standard OSM
/// tile servers or any compatible slippy-map endpoint.
pub struct SlippySource {
    map_type_id: i32,
    label: String,
    url_template: String,
    switch_xy: bool,
    tilesize: (u32, u32),
    zoom_min: i32,
    zoom_max: i32,
    ext: String,
    copyright_text: String,
    license_name: Option<String>,
    license_url: Option<String>,
    client: reqwest::Client,
}

impl SlippySource {
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
            switch_xy: false,
            tilesize: (256, 256),
            zoom_min: 0,
            zoom_max: 19,
            ext: "png".to_string(),
            copyright_text: copyright_text.into(),
            license_name: None,
            license_url: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_switch_xy(mut self, switch_xy: bool) -> Self {
        self.switch_xy = switch_xy;
        self
    }

    pub fn with_zoom_range(mut self, min: i32, max: i32) -> Self {
        self.zoom_min = min;
        self.zoom_max = max;
        self
    }

    pub fn with_license(mut self, name: impl Into<String>, url: impl Into<String>) -> Self {
        self.license_name = Some(name.into());
        self.license_url = Some(url.into());
        self
    }
}

#[async_trait]
impl MapSource for SlippySource {
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

    fn supports_conditional_get(&self) -> bool {
        true
    }

    fn switch_xy(&self) -> bool {
        self.switch_xy
    }

    fn url_for(&self, tile: TileCoord) -> Option<String> {
        let osm_zoom = tile.osm_zoom();
        let (a, b) = if self.switch_xy {
            (tile.y, tile.x)
        } else {
            (tile.x, tile.y)
        };
        Some(
            self.url_template
                .replace("{z}", &osm_zoom.to_string())
                .replace("{x}", &a.to_string())
                .replace("{y}", &b.to_string()),
        )
    }

    async fn download(
        &self,
        tile: TileCoord,
        dest: &Path,
        etag: Option<&str>,
        last_modified: Option<&str>,
    ) -> Result<DownloadOutcome> {
        let url = self
            .url_for(tile)
            .expect("slippy source always produces a url");

        let mut request = self.client.get(&url);
        if let Some(etag) = etag {
            request = request.header(reqwest::header::IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = last_modified {
            request = request.header(reqwest::header::IF_MODIFIED_SINCE, last_modified);
        }

        let response = match request.send().await {
            Ok(resp) => resp,
            Err(source) => {
                return Ok(DownloadOutcome::Error(format!(
                    "request to {url} failed: {source}"
                )))
            }
        };

        if response.status() == reqwest::StatusCode::NOT_MODIFIED {
            return Ok(DownloadOutcome::NotModified);
        }
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(DownloadOutcome::NotFound);
        }
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

    fn license_name(&self) -> Option<&str> {
        self.license_name.as_deref()
    }

    fn license_url(&self) -> Option<&str> {
        self.license_url.as_deref()
    }
}
