//! WMS-C source: latitude/longitude bbox embedded in the request URL
//! (§4.2 variant list).

use async_trait::async_trait;
use std::path::Path;

use crate::coord::TileCoord;
use crate::disk;
use crate::error::Result;
use crate::projection::{BBox, Projection, ProjectionBridge};
use crate::sources::{Copyright, DownloadOutcome, MapSource};

pub struct WmsSource {
    map_type_id: i32,
    label: String,
    base_url: String,
    layers: String,
    tilesize: (u32, u32),
    zoom_min: i32,
    zoom_max: i32,
    copyright_text: String,
    client: reqwest::Client,
}

impl WmsSource {
    pub fn new(
        map_type_id: i32,
        label: impl Into<String>,
        base_url: impl Into<String>,
        layers: impl Into<String>,
        copyright_text: impl Into<String>,
    ) -> Self {
        Self {
            map_type_id,
            label: label.into(),
            base_url: base_url.into(),
            layers: layers.into(),
            tilesize: (256, 256),
            zoom_min: 0,
            zoom_max: 18,
            copyright_text: copyright_text.into(),
            client: reqwest::Client::new(),
        }
    }

    fn tile_bbox(&self, tile: TileCoord) -> BBox {
        let mpp = crate::coord::TileZoomLevel::scale_to_mpp(tile.zoom);
        let (tw, th) = self.tilesize;
        let center = ProjectionBridge::tile_to_center_geo(Projection::LatLon, tile);
        let half_lat = (th as f64 * mpp) / 2.0 / 111_320.0;
        let half_lon = (tw as f64 * mpp) / 2.0 / 111_320.0;
        BBox::new(
            center.lat - half_lat,
            center.lon - half_lon,
            center.lat + half_lat,
            center.lon + half_lon,
        )
    }
}

#[async_trait]
impl MapSource for WmsSource {
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
        Projection::LatLon
    }

    fn file_extension(&self) -> &str {
        "png"
    }

    fn url_for(&self, tile: TileCoord) -> Option<String> {
        let bbox = self.tile_bbox(tile);
        let (tw, th) = self.tilesize;
        let layers = urlencoding::encode(&self.layers);
        Some(format!(
            "{base}?SERVICE=WMS&REQUEST=GetMap&VERSION=1.1.1&LAYERS={layers}&FORMAT=image/png&SRS=EPSG:4326&WIDTH={tw}&HEIGHT={th}&BBOX={minx},{miny},{maxx},{maxy}",
            base = self.base_url,
            minx = bbox.min_lon,
            miny = bbox.min_lat,
            maxx = bbox.max_lon,
            maxy = bbox.max_lat,
        ))
    }

    async fn download(
        &self,
        tile: TileCoord,
        dest: &Path,
        _etag: Option<&str>,
        _last_modified: Option<&str>,
    ) -> Result<DownloadOutcome> {
        let url = self.url_for(tile).expect("wms source always produces a url");
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_contains_bbox_and_layers() {
        let source = WmsSource::new(
            30,
            "WMS-C demo",
            "https://wms.example/wms",
            "basemap",
            "(c) Example",
        );
        let tile = TileCoord::new(0, 0, 8, 0);
        let url = source.url_for(tile).unwrap();
        assert!(url.contains("LAYERS=basemap"));
        assert!(url.contains("BBOX="));
    }

    #[test]
    fn layers_with_special_characters_are_escaped() {
        let source = WmsSource::new(
            30,
            "WMS-C demo",
            "https://wms.example/wms",
            "base map & roads",
            "(c) Example",
        );
        let tile = TileCoord::new(0, 0, 8, 0);
        let url = source.url_for(tile).unwrap();
        assert!(url.contains("LAYERS=base%20map%20%26%20roads"));
        assert!(!url.contains("base map & roads"));
    }
}
