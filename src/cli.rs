use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "tilecache-rs")]
#[command(author, version, about = "Tile cache/draw demo for a GPS mapping application core", long_about = None)]
pub struct Cli {
    /// Path to an AppSettings TOML file
    #[arg(short, long, value_name = "FILE", env = "TILECACHE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the cache root directory
    #[arg(long, env = "TILECACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Numeric map_type_id identifying the source to draw from
    #[arg(long, default_value_t = 13)]
    pub map_type_id: i32,

    /// OSM zoom level (0..20) to center the viewport at
    #[arg(long, default_value_t = 12)]
    pub zoom: i32,

    /// Viewport center latitude, degrees
    #[arg(long, allow_hyphen_values = true, default_value_t = 51.5074)]
    pub lat: f64,

    /// Viewport center longitude, degrees
    #[arg(long, allow_hyphen_values = true, default_value_t = -0.1278)]
    pub lon: f64,

    /// Viewport width in tiles
    #[arg(long, default_value_t = 3)]
    pub width_tiles: u32,

    /// Viewport height in tiles
    #[arg(long, default_value_t = 3)]
    pub height_tiles: u32,

    /// Allow network downloads for missing tiles
    #[arg(long, default_value_t = false)]
    pub autodownload: bool,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
