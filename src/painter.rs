//! The painter: resolves zoom/shrink for a viewport, picks the visible
//! tile rectangle, loads or falls back across scales, and reports what
//! should be drawn (§4.9). Also implements the autodownload trigger
//! (§4.6) and the antimeridian line-drawing rule.
//!
//! Grounded on `vikmapslayer.cpp`'s `draw_section` (shrinkfactor/
//! existence-only resolution, tile-rectangle computation,
//! `try_draw_scale_down`/`try_draw_scale_up`) and `should_start_autodownload`.

use std::path::PathBuf;
use std::sync::Arc;

use image::RgbaImage;

use crate::cache::{CachedPixmap, PixmapCache};
use crate::config::{AppSettings, CacheLayout, LayerConfig, ZoomOverride};
use crate::coord::TileCoord;
use crate::fingerprint::TileFingerprint;
use crate::projection::{BBox, GeoPoint, Projection, ProjectionBridge};
use crate::sources::{Copyright, MapSource};

/// Shrink-factor bounds, per §4.9/§8 and `vikmapslayer.cpp`'s
/// `MIN_SHRINKFACTOR`/`MAX_SHRINKFACTOR`/`REAL_MIN_SHRINKFACTOR`: within
/// `[MIN, MAX]` tiles are drawn normally; outside that but within
/// `[REAL_MIN, MAX]` only existence markers are drawn; outside
/// `[REAL_MIN, MAX]` nothing is drawn at all.
pub const MIN_SHRINKFACTOR: f64 = 1.0 / 32.0;
pub const MAX_SHRINKFACTOR: f64 = 8.000_000_1;
pub const REAL_MIN_SHRINKFACTOR: f64 = 1.0 / 256.0;

/// A drawable viewport: geographic corners plus meters-per-pixel
/// resolution. Corner-based rather than center+size, matching §4.9 step 2
/// ("compute tile rectangle from viewport corners").
#[derive(Debug, Clone, Copy)]
pub struct Viewport {
    pub upper_left: GeoPoint,
    pub lower_right: GeoPoint,
    pub xmpp: f64,
    pub ympp: f64,
    /// UTM zone override; `0` means "derive from the geographic
    /// position", matching `ProjectionBridge::utm_to_tile`.
    pub zone: i32,
}

impl Viewport {
    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(
            (self.upper_left.lat + self.lower_right.lat) / 2.0,
            (self.upper_left.lon + self.lower_right.lon) / 2.0,
        )
    }
}

/// What the painter decided to do with the whole draw, §4.9 step 1/3.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawMode {
    /// Tiles are loaded and composited normally.
    Normal,
    /// Shrink factor is out of normal range (or too many tiles):
    /// draw markers only for tiles that exist on disk, skip decode.
    ExistenceOnly,
    /// Shrink factor is outside even the existence-only range: draw
    /// nothing, surface `reason` as a status message.
    Skip { reason: String },
}

/// One placed image (or existence marker) for a requested tile position.
/// `cell_offset`/`cell_size` are fractions of the destination tile cell
/// in `[0.0, 1.0]`, letting a scale-up fallback place a sub-portion of
/// the cell (§4.9 step 4's "tiling the finer pieces").
#[derive(Debug, Clone)]
pub struct PlacedTile {
    pub requested: TileCoord,
    pub image: Option<RgbaImage>,
    pub exists_on_disk: bool,
    pub cell_offset: (f64, f64),
    pub cell_size: (f64, f64),
}

#[derive(Debug, Clone)]
pub struct DrawOutcome {
    pub mode: DrawMode,
    pub tiles: Vec<PlacedTile>,
    pub copyrights: Vec<Copyright>,
    pub status: Option<String>,
}

struct ResolvedZoom {
    xzoom_mpp: f64,
    yzoom_mpp: f64,
    xshrink: f64,
    yshrink: f64,
    mode_hint: Option<DrawMode>,
}

/// Resolves the effective mpp and shrink factors for `layer` against
/// `viewport`, per §4.9 step 1. Returns `mode_hint` set when the fixed
/// zoom override pushes the shrink factor out of normal range.
fn resolve_zoom(viewport: &Viewport, layer: &LayerConfig) -> ResolvedZoom {
    let ZoomOverride::Fixed(mapzoom_mpp) = layer.mapzoom_id else {
        return ResolvedZoom {
            xzoom_mpp: viewport.xmpp,
            yzoom_mpp: viewport.ympp,
            xshrink: 1.0,
            yshrink: 1.0,
            mode_hint: None,
        };
    };

    if (mapzoom_mpp - viewport.xmpp).abs() < f64::EPSILON
        && (mapzoom_mpp - viewport.ympp).abs() < f64::EPSILON
    {
        return ResolvedZoom {
            xzoom_mpp: viewport.xmpp,
            yzoom_mpp: viewport.ympp,
            xshrink: 1.0,
            yshrink: 1.0,
            mode_hint: None,
        };
    }

    let xshrink = mapzoom_mpp / viewport.xmpp;
    let yshrink = mapzoom_mpp / viewport.ympp;

    let mode_hint = if xshrink > MIN_SHRINKFACTOR
        && xshrink < MAX_SHRINKFACTOR
        && yshrink > MIN_SHRINKFACTOR
        && yshrink < MAX_SHRINKFACTOR
    {
        None
    } else if xshrink > REAL_MIN_SHRINKFACTOR && yshrink > REAL_MIN_SHRINKFACTOR {
        Some(DrawMode::ExistenceOnly)
    } else {
        Some(DrawMode::Skip {
            reason: format!(
                "cowardly refusing to draw tiles or existence of tiles beyond a {} zoom-out factor",
                (1.0 / REAL_MIN_SHRINKFACTOR) as i64
            ),
        })
    };

    ResolvedZoom {
        xzoom_mpp: mapzoom_mpp,
        yzoom_mpp: mapzoom_mpp,
        xshrink,
        yshrink,
        mode_hint,
    }
}

/// Tracks the last drawn center/mpp per layer, driving the autodownload
/// trigger (§4.6): a background job is only enqueued when the viewport
/// actually moved since the previous draw.
#[derive(Default)]
pub struct AutodownloadTracker {
    last: std::sync::Mutex<Option<(GeoPoint, f64, f64)>>,
}

impl AutodownloadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` exactly when autodownload should fire for this
    /// draw: no prior record, or the center/mpp changed.
    pub fn should_autodownload(&self, center: GeoPoint, xmpp: f64, ympp: f64, pan_in_progress: bool) -> bool {
        if pan_in_progress {
            return false;
        }
        let mut last = self.last.lock().unwrap();
        let changed = match *last {
            None => true,
            Some((prev_center, prev_x, prev_y)) => {
                prev_center != center || prev_x != xmpp || prev_y != ympp
            }
        };
        *last = Some((center, xmpp, ympp));
        changed
    }
}

/// Multiplies every pixel's alpha channel by `alpha / 255`, §4.9 step 5.
fn apply_alpha(mut image: RgbaImage, alpha: u8) -> RgbaImage {
    if alpha == 255 {
        return image;
    }
    let factor = alpha as f64 / 255.0;
    for pixel in image.pixels_mut() {
        pixel[3] = (pixel[3] as f64 * factor).round() as u8;
    }
    image
}

fn shrink_to(image: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    if image.width() == width && image.height() == height {
        return image.clone();
    }
    image::imageops::resize(image, width.max(1), height.max(1), image::imageops::FilterType::Triangle)
}

pub struct Painter {
    pixmap_cache: Arc<PixmapCache>,
}

impl Painter {
    pub fn new(pixmap_cache: Arc<PixmapCache>) -> Self {
        Self { pixmap_cache }
    }

    /// Loads (from cache or disk) the image for `tile` exactly, with
    /// `alpha`/shrink baked in, caching the result under the full
    /// fingerprint (§4.9 step 5, §4.3). Returns `None` on a true miss
    /// (neither cached nor present on disk).
    fn load_base_tile(
        &self,
        source: &dyn MapSource,
        layer: &LayerConfig,
        layer_name: &str,
        cache_dir: &std::path::Path,
        is_default_cache_dir: bool,
        tile: TileCoord,
        dest_size: (u32, u32),
    ) -> Option<CachedPixmap> {
        let fingerprint = TileFingerprint::new(tile, source.map_type_id(), layer_name, layer.alpha);
        let key = fingerprint.cache_key();

        if let Some(hit) = self.pixmap_cache.get(&key) {
            return Some(hit);
        }

        let bytes = match source.read_local_bytes(cache_dir, layer.cache_layout, tile, is_default_cache_dir) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(err) => {
                crate::logging::log_draw_path_error("load_base_tile", &err);
                return None;
            }
        };

        let image = match crate::disk::decode_image(&bytes) {
            Ok(image) => image,
            Err(err) => {
                crate::logging::log_draw_path_error("decode tile", &err);
                return None;
            }
        };

        let image = apply_alpha(image, layer.alpha);
        let image = shrink_to(&image, dest_size.0, dest_size.1);
        let pixmap = CachedPixmap::new(image, None);
        self.pixmap_cache.add(key, pixmap.clone());
        Some(pixmap)
    }

    /// Whether any on-disk variant of `tile` exists, used for
    /// existence-only mode (§4.9 step 1/3).
    fn exists_on_disk(
        &self,
        source: &dyn MapSource,
        layer: &LayerConfig,
        cache_dir: &std::path::Path,
        is_default_cache_dir: bool,
        tile: TileCoord,
    ) -> bool {
        matches!(
            source.read_local_bytes(cache_dir, layer.cache_layout, tile, is_default_cache_dir),
            Ok(Some(_))
        )
    }

    /// Resolves one requested screen-tile position, applying scale
    /// fallback per §4.9 step 4: exact scale, then up to
    /// `scale_inc_down` smaller scales (cropping the matching quadrant),
    /// then up to `scale_inc_up` larger scales (placing the first
    /// available finer sub-tile into its portion of the cell).
    #[allow(clippy::too_many_arguments)]
    fn resolve_tile(
        &self,
        source: &dyn MapSource,
        layer: &LayerConfig,
        layer_name: &str,
        cache_dir: &std::path::Path,
        is_default_cache_dir: bool,
        tile: TileCoord,
        dest_size: (u32, u32),
        settings: &AppSettings,
    ) -> PlacedTile {
        if let Some(pixmap) = self.load_base_tile(
            source,
            layer,
            layer_name,
            cache_dir,
            is_default_cache_dir,
            tile,
            dest_size,
        ) {
            return PlacedTile {
                requested: tile,
                image: Some(pixmap.image),
                exists_on_disk: true,
                cell_offset: (0.0, 0.0),
                cell_size: (1.0, 1.0),
            };
        }

        if settings.prefer_scale_down_first {
            if let Some(placed) = self.try_scale_down(
                source, layer, layer_name, cache_dir, is_default_cache_dir, tile, dest_size, settings,
            ) {
                return placed;
            }
            if let Some(placed) = self.try_scale_up(
                source, layer, layer_name, cache_dir, is_default_cache_dir, tile, dest_size, settings,
            ) {
                return placed;
            }
        } else {
            if let Some(placed) = self.try_scale_up(
                source, layer, layer_name, cache_dir, is_default_cache_dir, tile, dest_size, settings,
            ) {
                return placed;
            }
            if let Some(placed) = self.try_scale_down(
                source, layer, layer_name, cache_dir, is_default_cache_dir, tile, dest_size, settings,
            ) {
                return placed;
            }
        }

        PlacedTile {
            requested: tile,
            image: None,
            exists_on_disk: self.exists_on_disk(source, layer, cache_dir, is_default_cache_dir, tile),
            cell_offset: (0.0, 0.0),
            cell_size: (1.0, 1.0),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn try_scale_down(
        &self,
        source: &dyn MapSource,
        layer: &LayerConfig,
        layer_name: &str,
        cache_dir: &std::path::Path,
        is_default_cache_dir: bool,
        tile: TileCoord,
        dest_size: (u32, u32),
        settings: &AppSettings,
    ) -> Option<PlacedTile> {
        for k in 1..settings.scale_inc_down as i32 {
            let factor = 1i32 << k;
            let bigger = tile.zoom_out(k);
            let Some(pixmap) = self.load_base_tile(
                source,
                layer,
                layer_name,
                cache_dir,
                is_default_cache_dir,
                bigger,
                dest_size,
            ) else {
                continue;
            };
            let (w, h) = (pixmap.image.width(), pixmap.image.height());
            let sub_w = (w / factor as u32).max(1);
            let sub_h = (h / factor as u32).max(1);
            let src_x = (tile.x.rem_euclid(factor)) as u32 * sub_w;
            let src_y = (tile.y.rem_euclid(factor)) as u32 * sub_h;
            let cropped = image::imageops::crop_imm(&pixmap.image, src_x, src_y, sub_w, sub_h).to_image();
            let resized = shrink_to(&cropped, dest_size.0, dest_size.1);
            return Some(PlacedTile {
                requested: tile,
                image: Some(resized),
                exists_on_disk: true,
                cell_offset: (0.0, 0.0),
                cell_size: (1.0, 1.0),
            });
        }
        None
    }

    #[allow(clippy::too_many_arguments)]
    fn try_scale_up(
        &self,
        source: &dyn MapSource,
        layer: &LayerConfig,
        layer_name: &str,
        cache_dir: &std::path::Path,
        is_default_cache_dir: bool,
        tile: TileCoord,
        dest_size: (u32, u32),
        settings: &AppSettings,
    ) -> Option<PlacedTile> {
        for k in 1..settings.scale_inc_up as i32 {
            let factor = 1i32 << k;
            let base = tile.zoom_in(k);
            for px in 0..factor {
                for py in 0..factor {
                    let finer = TileCoord::new(base.x + px, base.y + py, base.zoom, base.zone);
                    let piece_size = (
                        (dest_size.0 / factor as u32).max(1),
                        (dest_size.1 / factor as u32).max(1),
                    );
                    let Some(pixmap) = self.load_base_tile(
                        source,
                        layer,
                        layer_name,
                        cache_dir,
                        is_default_cache_dir,
                        finer,
                        piece_size,
                    ) else {
                        continue;
                    };
                    return Some(PlacedTile {
                        requested: tile,
                        image: Some(pixmap.image),
                        exists_on_disk: true,
                        cell_offset: (px as f64 / factor as f64, py as f64 / factor as f64),
                        cell_size: (1.0 / factor as f64, 1.0 / factor as f64),
                    });
                }
            }
        }
        None
    }

    /// Runs one full draw cycle for `layer` against `viewport` (§4.9).
    #[allow(clippy::too_many_arguments)]
    pub async fn draw(
        &self,
        source: &dyn MapSource,
        layer: &LayerConfig,
        layer_name: &str,
        cache_dir: &PathBuf,
        is_default_cache_dir: bool,
        viewport: &Viewport,
        settings: &AppSettings,
    ) -> DrawOutcome {
        let resolved = resolve_zoom(viewport, layer);

        if let Some(mode) = resolved.mode_hint {
            let status = match &mode {
                DrawMode::Skip { reason } => Some(reason.clone()),
                _ => None,
            };
            return DrawOutcome {
                mode,
                tiles: Vec::new(),
                copyrights: Vec::new(),
                status,
            };
        }

        let projection = source.projection();
        let (zmin, zmax) = source.zoom_range();

        let ul_tile = ProjectionBridge::coord_to_tile(
            projection,
            viewport.upper_left,
            resolved.xzoom_mpp,
            resolved.yzoom_mpp,
            viewport.zone,
        );
        let br_tile = ProjectionBridge::coord_to_tile(
            projection,
            viewport.lower_right,
            resolved.xzoom_mpp,
            resolved.yzoom_mpp,
            viewport.zone,
        );

        let (Some(ul), Some(br)) = (ul_tile, br_tile) else {
            return DrawOutcome {
                mode: DrawMode::Skip {
                    reason: "viewport resolution is not addressable by this source".to_string(),
                },
                tiles: Vec::new(),
                copyrights: Vec::new(),
                status: Some("unsupported meters-per-pixel for this map source".to_string()),
            };
        };

        if ul.osm_zoom() < zmin || ul.osm_zoom() > zmax {
            return DrawOutcome {
                mode: DrawMode::Skip {
                    reason: "zoom level out of range for this source".to_string(),
                },
                tiles: Vec::new(),
                copyrights: Vec::new(),
                status: Some(format!(
                    "zoom {} outside source's supported range [{zmin}, {zmax}]",
                    ul.osm_zoom()
                )),
            };
        }

        let xmin = ul.x.min(br.x);
        let xmax = ul.x.max(br.x);
        let ymin = ul.y.min(br.y);
        let ymax = ul.y.max(br.y);

        let tile_count = ((xmax - xmin + 1).max(0) as u32) * ((ymax - ymin + 1).max(0) as u32);
        let mut mode = DrawMode::Normal;
        if tile_count > settings.max_tiles_per_request {
            mode = DrawMode::ExistenceOnly;
        }

        let (tile_w, tile_h) = source.tilesize();
        let dest_w = ((tile_w as f64) * resolved.xshrink).ceil() as u32;
        let dest_h = ((tile_h as f64) * resolved.yshrink).ceil() as u32;

        let mut tiles = Vec::with_capacity(tile_count as usize);
        for x in xmin..=xmax {
            for y in ymin..=ymax {
                let tile = TileCoord::new(x, y, ul.zoom, ul.zone);
                let placed = if mode == DrawMode::ExistenceOnly {
                    PlacedTile {
                        requested: tile,
                        image: None,
                        exists_on_disk: self.exists_on_disk(
                            source,
                            layer,
                            cache_dir,
                            is_default_cache_dir,
                            tile,
                        ),
                        cell_offset: (0.0, 0.0),
                        cell_size: (1.0, 1.0),
                    }
                } else {
                    self.resolve_tile(
                        source,
                        layer,
                        layer_name,
                        cache_dir,
                        is_default_cache_dir,
                        tile,
                        (dest_w, dest_h),
                        settings,
                    )
                };
                tiles.push(placed);
            }
        }

        let bbox = BBox::new(
            viewport.lower_right.lat.min(viewport.upper_left.lat),
            viewport.upper_left.lon.min(viewport.lower_right.lon),
            viewport.upper_left.lat.max(viewport.lower_right.lat),
            viewport.lower_right.lon.max(viewport.upper_left.lon),
        );
        let copyrights = source.get_copyright(bbox, ul.osm_zoom()).await;

        DrawOutcome {
            mode,
            tiles,
            copyrights,
            status: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::slippy::SlippySource;

    fn test_layer() -> LayerConfig {
        LayerConfig::new(13)
    }

    #[test]
    fn resolve_zoom_no_override_is_identity() {
        let viewport = Viewport {
            upper_left: GeoPoint::new(51.6, -0.2),
            lower_right: GeoPoint::new(51.4, 0.0),
            xmpp: 8.0,
            ympp: 8.0,
            zone: 0,
        };
        let layer = test_layer();
        let resolved = resolve_zoom(&viewport, &layer);
        assert_eq!(resolved.xzoom_mpp, 8.0);
        assert_eq!(resolved.xshrink, 1.0);
        assert!(resolved.mode_hint.is_none());
    }

    #[test]
    fn resolve_zoom_extreme_override_is_skipped() {
        let viewport = Viewport {
            upper_left: GeoPoint::new(51.6, -0.2),
            lower_right: GeoPoint::new(51.4, 0.0),
            xmpp: 1.0,
            ympp: 1.0,
            zone: 0,
        };
        let mut layer = test_layer();
        layer.mapzoom_id = ZoomOverride::Fixed(1024.0);
        let resolved = resolve_zoom(&viewport, &layer);
        assert!(matches!(resolved.mode_hint, Some(DrawMode::Skip { .. })));
    }

    #[test]
    fn resolve_zoom_moderate_override_is_existence_only() {
        let viewport = Viewport {
            upper_left: GeoPoint::new(51.6, -0.2),
            lower_right: GeoPoint::new(51.4, 0.0),
            xmpp: 1.0,
            ympp: 1.0,
            zone: 0,
        };
        let mut layer = test_layer();
        layer.mapzoom_id = ZoomOverride::Fixed(16.0);
        let resolved = resolve_zoom(&viewport, &layer);
        assert_eq!(resolved.mode_hint, Some(DrawMode::ExistenceOnly));
    }

    #[test]
    fn autodownload_fires_on_first_draw_and_on_change() {
        let tracker = AutodownloadTracker::new();
        let p1 = GeoPoint::new(10.0, 10.0);
        assert!(tracker.should_autodownload(p1, 8.0, 8.0, false));
        assert!(!tracker.should_autodownload(p1, 8.0, 8.0, false));
        assert!(tracker.should_autodownload(p1, 4.0, 4.0, false));
    }

    #[test]
    fn autodownload_suppressed_during_pan() {
        let tracker = AutodownloadTracker::new();
        let p1 = GeoPoint::new(10.0, 10.0);
        assert!(!tracker.should_autodownload(p1, 8.0, 8.0, true));
    }

    #[tokio::test]
    async fn cache_hit_draw_does_not_touch_disk_twice() {
        let dir = tempfile::tempdir().unwrap();
        let source = SlippySource::new(13, "test", "https://x/{z}/{x}/{y}.png", "(c)");
        let tile = TileCoord::from_osm(10, 20, 5, 0).unwrap();
        let path = crate::disk::file_path_for(
            dir.path(),
            CacheLayout::Viking,
            tile,
            13,
            "test",
            "png",
            true,
        );
        let image = RgbaImage::from_pixel(256, 256, image::Rgba([1, 2, 3, 255]));
        let mut bytes = Vec::new();
        image
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        crate::disk::write_atomic(&path, &bytes).unwrap();

        let cache = Arc::new(PixmapCache::new(16));
        let painter = Painter::new(cache.clone());
        let layer = test_layer();

        let first = painter.load_base_tile(&source, &layer, "test", dir.path(), true, tile, (256, 256));
        assert!(first.is_some());
        assert_eq!(cache.len(), 1);

        // Remove the backing file; a cache hit must not need it again.
        std::fs::remove_file(&path).unwrap();
        let second = painter.load_base_tile(&source, &layer, "test", dir.path(), true, tile, (256, 256));
        assert!(second.is_some());
    }

    #[tokio::test]
    async fn scale_down_fallback_uses_quadrant_of_coarser_tile() {
        let dir = tempfile::tempdir().unwrap();
        let source = SlippySource::new(13, "test", "https://x/{z}/{x}/{y}.png", "(c)");

        // Place a z=4 tile at (5,10); request (10,20,z=5), missing.
        let coarse_tile = TileCoord::from_osm(5, 10, 4, 0).unwrap();
        let path = crate::disk::file_path_for(dir.path(), CacheLayout::Viking, coarse_tile, 13, "test", "png", true);
        // quadrant (10 % 2, 20 % 2) = (0, 0) -> top-left quadrant is red, rest blue.
        let mut image = RgbaImage::from_pixel(256, 256, image::Rgba([0, 0, 255, 255]));
        for px in 0..128 {
            for py in 0..128 {
                image.put_pixel(px, py, image::Rgba([255, 0, 0, 255]));
            }
        }
        let mut bytes = Vec::new();
        image
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        crate::disk::write_atomic(&path, &bytes).unwrap();

        let cache = Arc::new(PixmapCache::new(16));
        let painter = Painter::new(cache);
        let layer = test_layer();
        let settings = AppSettings::default();

        let target = TileCoord::from_osm(10, 20, 5, 0).unwrap();
        let placed = painter.resolve_tile(&source, &layer, "test", dir.path(), true, target, (256, 256), &settings);

        let img = placed.image.expect("scale-down fallback should produce an image");
        assert_eq!(img.get_pixel(10, 10), &image::Rgba([255, 0, 0, 255]));
    }
}
