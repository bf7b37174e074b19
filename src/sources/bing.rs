//! Bing Maps quadtree-addressed source, with asynchronously-loaded
//! zoom/bbox-keyed attribution (§4.2, §4.10).

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use crate::attribution::{parse_attributions, Attribution};
use crate::coord::TileCoord;
use crate::disk;
use crate::error::Result;
use crate::projection::{BBox, Projection};
use crate::sources::{Copyright, DownloadOutcome, MapSource};

const METADATA_URL_FMT: &str = "https://dev.virtualearth.net/REST/v1/Imagery/Metadata/Aerial/0,0?zl=1&mapVersion=v1&key={key}&include=ImageryProviders&output=xml";

/// Base-4 quadkey for `(zoom, x, y)`: one digit per zoom level, MSB first,
/// bit `zoom-i` of `x` contributes +1, of `y` contributes +2. Ported from
/// `compute_quad_tree` in the original.
pub fn compute_quad_key(zoom: i32, x: i32, y: i32) -> String {
    let mut digits = Vec::with_capacity(zoom.max(0) as usize);
    for i in (1..=zoom).rev() {
        let mask = 1i32 << (i - 1);
        let mut digit = 0u8;
        if x & mask != 0 {
            digit += 1;
        }
        if y & mask != 0 {
            digit += 2;
        }
        digits.push((b'0' + digit) as char);
    }
    digits.into_iter().collect()
}

pub struct BingSource {
    map_type_id: i32,
    label: String,
    url_template: String,
    api_key: String,
    tilesize: (u32, u32),
    zoom_min: i32,
    zoom_max: i32,
    client: reqwest::Client,
    attributions: RwLock<Vec<Attribution>>,
    loading_attributions: AtomicBool,
}

impl BingSource {
    /// `url_template` contains a single `{quadkey}` placeholder.
    pub fn new(map_type_id: i32, label: impl Into<String>, url_template: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            map_type_id,
            label: label.into(),
            url_template: url_template.into(),
            api_key: api_key.into(),
            tilesize: (256, 256),
            zoom_min: 1,
            zoom_max: 19,
            client: reqwest::Client::new(),
            attributions: RwLock::new(Vec::new()),
            loading_attributions: AtomicBool::new(false),
        }
    }

    /// Fetches and parses the imagery metadata document once. Guarded by
    /// `loading_attributions` so concurrent `get_copyright` calls don't
    /// fire duplicate requests (§4.10). Not retried on failure: a failed
    /// load clears the flag so a later call can try again, matching the
    /// original (see DESIGN.md Open Question 3).
    async fn load_attributions(&self) {
        if self
            .loading_attributions
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let url = METADATA_URL_FMT.replace("{key}", &self.api_key);
        let result = self.client.get(&url).send().await;
        match result {
            Ok(response) => match response.text().await {
                Ok(body) => {
                    let parsed = parse_attributions(&body);
                    *self.attributions.write().await = parsed;
                }
                Err(source) => {
                    tracing::warn!(error = %source, "failed reading bing attribution response body");
                }
            },
            Err(source) => {
                tracing::warn!(error = %source, "failed fetching bing attribution metadata");
            }
        }

        self.loading_attributions.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl MapSource for BingSource {
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
        "jpg"
    }

    fn url_for(&self, tile: TileCoord) -> Option<String> {
        let quadkey = compute_quad_key(tile.osm_zoom(), tile.x, tile.y);
        Some(self.url_template.replace("{quadkey}", &quadkey))
    }

    async fn download(
        &self,
        tile: TileCoord,
        dest: &Path,
        _etag: Option<&str>,
        _last_modified: Option<&str>,
    ) -> Result<DownloadOutcome> {
        let url = self.url_for(tile).expect("bing source always produces a url");
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

    /// No-op (returns nothing) until the metadata load completes, per
    /// §4.10: the first call with a configured key and no attributions
    /// loaded fires the background fetch.
    async fn get_copyright(&self, bbox: BBox, zoom: i32) -> Vec<Copyright> {
        let have_any = !self.attributions.read().await.is_empty();
        if !have_any && !self.api_key.is_empty() {
            if !self.loading_attributions.load(Ordering::SeqCst) {
                self.load_attributions().await;
            } else {
                return Vec::new();
            }
        }

        self.attributions
            .read()
            .await
            .iter()
            .filter(|a| bbox.intersects(&a.bounds) && zoom > a.zoom_min && zoom < a.zoom_max)
            .map(|a| Copyright {
                text: a.text.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quadkey_matches_known_values() {
        // zoom 1: tile (1,0) -> bit0 of x set -> digit '1'
        assert_eq!(compute_quad_key(1, 1, 0), "1");
        assert_eq!(compute_quad_key(1, 0, 1), "2");
        assert_eq!(compute_quad_key(1, 1, 1), "3");
        assert_eq!(compute_quad_key(0, 5, 5), "");
    }

    #[test]
    fn quadkey_multi_level() {
        // zoom 3, x=3 (0b011), y=5 (0b101)
        // i=3: mask=4, x&4=0,y&4=4 -> digit 2
        // i=2: mask=2, x&2=2,y&2=0 -> digit 1
        // i=1: mask=1, x&1=1,y&1=1 -> digit 3
        assert_eq!(compute_quad_key(3, 3, 5), "213");
    }
}
