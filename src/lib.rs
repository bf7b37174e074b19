//! Tile acquisition, caching, and rendering core for a GPS mapping
//! application.
//!
//! This crate owns the map-tile subsystem: fetching tile imagery from
//! remote servers or local archives, storing it on disk in one of several
//! layouts, holding a bounded in-memory pixmap cache, and driving the
//! painter that stitches tiles onto a viewport across zoom levels,
//! coordinate systems and projections. Track/route/waypoint data, file
//! formats and UI wiring live outside this crate.

pub mod attribution;
pub mod cache;
pub mod cli;
pub mod config;
pub mod coord;
pub mod disk;
pub mod download;
pub mod error;
pub mod fingerprint;
pub mod logging;
pub mod painter;
pub mod projection;
pub mod sources;

pub use cache::PixmapCache;
pub use config::{AppSettings, LayerConfig};
pub use coord::{TileCoord, TileZoomLevel};
pub use error::{Result, TileCacheError};
pub use fingerprint::TileFingerprint;
pub use painter::Painter;
pub use sources::{MapSource, SourceManager};
