//! `MapSource`: the polymorphic tile-provider contract (§3, §4.2).
//!
//! Re-architected per REDESIGN FLAGS §9 as a trait with one concrete type
//! per provider variant, rather than a C++ inheritance hierarchy with
//! runtime dispatch. The painter and downloader depend only on
//! `dyn MapSource`.

pub mod bing;
pub mod direct_file;
pub mod manager;
pub mod mapnik;
pub mod mbtiles;
pub mod metatile;
pub mod slippy;
pub mod terraserver;
pub mod wmsc;

pub use manager::SourceManager;

use async_trait::async_trait;
use std::path::Path;

use crate::config::{AppSettings, CacheLayout};
use crate::coord::TileCoord;
use crate::error::Result;
use crate::projection::{BBox, Projection};

/// Access mode a source uses to produce tile bytes, per §3's MapSource
/// "access mode" field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    DirectFile,
    Metatile,
    SqliteMbtiles,
    NetworkSlippy,
    NetworkWms,
    LocalRender,
}

/// Outcome of one `MapSource::download` call, §3's `DownloadJob` result
/// shape collapsed to a single return value.
#[derive(Debug, Clone)]
pub enum DownloadOutcome {
    /// Bytes fetched and written to `dest`.
    Fetched { bytes_written: u64 },
    /// Conditional GET reported no change; the existing file is current.
    NotModified,
    /// Server reported the tile does not exist (e.g. HTTP 404).
    NotFound,
    /// HTTP or content error; counted but non-fatal to the job (§4.5, §7).
    Error(String),
}

/// One copyright/attribution line for a given bbox+zoom query.
#[derive(Debug, Clone, PartialEq)]
pub struct Copyright {
    pub text: String,
}

/// The polymorphic tile-provider contract. Concrete implementations:
/// `SlippySource`, `WmsSource`, `TerraserverSource`, `BingSource`,
/// `MapnikSource`, `MbTilesSource`, `MetatileSource`, `DirectFileSource`.
#[async_trait]
pub trait MapSource: Send + Sync {
    /// Stable numeric identity, stable across runs (§3).
    fn map_type_id(&self) -> i32;

    fn label(&self) -> &str;

    /// (tilesize_x, tilesize_y) in pixels.
    fn tilesize(&self) -> (u32, u32);

    /// Supported OSM zoom range, `[z_min, z_max]`.
    fn zoom_range(&self) -> (i32, i32);

    fn projection(&self) -> Projection;

    /// File extension used on disk (`png`, `jpg`, or empty for
    /// extension-less Viking-layout sources).
    fn file_extension(&self) -> &str;

    fn is_direct_file(&self) -> bool {
        false
    }

    fn is_mbtiles(&self) -> bool {
        false
    }

    fn is_metatiles(&self) -> bool {
        false
    }

    fn supports_conditional_get(&self) -> bool {
        false
    }

    /// Whether the x/y coordinate order in the URL template is swapped
    /// (ArcGIS-style), i.e. `{z}/{y}/{x}` instead of `{z}/{x}/{y}`.
    fn switch_xy(&self) -> bool {
        false
    }

    /// Constructs the server URL for `tile`. `None` for sources that are
    /// not network-addressed (direct-file, metatile, mbtiles, local
    /// render).
    fn url_for(&self, _tile: TileCoord) -> Option<String> {
        None
    }

    /// Fetches `tile` and writes its bytes to `dest` (via atomic
    /// temp-file-then-rename, see `disk::write_atomic`). `etag`/`last_modified`
    /// carry prior conditional-request state when `supports_conditional_get`
    /// is true.
    async fn download(
        &self,
        tile: TileCoord,
        dest: &Path,
        etag: Option<&str>,
        last_modified: Option<&str>,
    ) -> Result<DownloadOutcome>;

    /// Copyright/attribution lines for the given bbox+zoom. May return
    /// zero or more entries; some sources (Bing) populate this
    /// asynchronously and return nothing until loading completes (§4.10).
    async fn get_copyright(&self, bbox: BBox, zoom: i32) -> Vec<Copyright>;

    fn license_name(&self) -> Option<&str> {
        None
    }

    fn license_url(&self) -> Option<&str> {
        None
    }

    /// Lazily-initialized logo image bytes, owned by the source instance
    /// per REDESIGN FLAGS (no process-global pixmap singleton).
    fn logo(&self) -> Option<&[u8]> {
        None
    }

    /// Reads whatever bytes this source already has stashed locally for
    /// `tile`, without touching the network -- the seam `DiskStore` uses
    /// on a cache miss (§2's data flow). Plain-file sources (slippy, WMS,
    /// terraserver, bing, direct-file) read the layout path computed by
    /// `disk::file_path_for`; archive-backed sources (mbtiles, metatile)
    /// override this to consult their own reader instead.
    fn read_local_bytes(
        &self,
        cache_dir: &Path,
        layout: CacheLayout,
        tile: TileCoord,
        is_default_cache_dir: bool,
    ) -> Result<Option<Vec<u8>>> {
        let path = crate::disk::file_path_for(
            cache_dir,
            layout,
            tile,
            self.map_type_id(),
            self.label(),
            self.file_extension(),
            is_default_cache_dir,
        );
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(std::fs::read(path)?))
    }
}

/// A license name/URL pair to surface to the user, returned by
/// `acknowledge_license` the first time a licensed source is used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseNotice {
    pub name: String,
    pub url: Option<String>,
}

/// Decides whether `source`'s license reminder should be shown, and
/// records the acknowledgement in `settings`' persistent seen-set (§4.7).
///
/// Returns `None` for unlicensed sources, for a source already in the
/// seen-set, and (per §4.7) whenever `loaded_from_saved_project` is true --
/// switching map type while the layer is loaded from a saved project
/// suppresses the reminder so it doesn't nag on every load, but the
/// source's license is still recorded as seen.
pub fn acknowledge_license(
    source: &dyn MapSource,
    settings: &mut AppSettings,
    loaded_from_saved_project: bool,
) -> Option<LicenseNotice> {
    let name = source.license_name()?;
    let map_type_id = source.map_type_id();

    if loaded_from_saved_project {
        settings.mark_license_seen(map_type_id);
        return None;
    }

    if settings.has_seen_license(map_type_id) {
        return None;
    }

    settings.mark_license_seen(map_type_id);
    Some(LicenseNotice {
        name: name.to_string(),
        url: source.license_url().map(str::to_string),
    })
}
