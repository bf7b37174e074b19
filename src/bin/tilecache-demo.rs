//! Thin end-to-end demo: opens a cache directory, resolves a viewport
//! around a lat/lon, draws it through one registered `MapSource`, and
//! reports what was found/fetched. Stands in for the teacher's HTTP
//! server binary -- this crate has no HTTP surface (§1 ambient stack).

use std::sync::Arc;

use tilecache_rs::cli::Cli;
use tilecache_rs::config::{AppSettings, LayerConfig};
use tilecache_rs::coord::TileZoomLevel;
use tilecache_rs::download::{Downloader, LayerGeneration, RedownloadMode, TileRect};
use tilecache_rs::painter::{DrawMode, Painter, Viewport};
use tilecache_rs::projection::{GeoPoint, Projection, ProjectionBridge};
use tilecache_rs::sources::slippy::SlippySource;
use tilecache_rs::sources::SourceManager;
use tilecache_rs::PixmapCache;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse_args();
    tilecache_rs::logging::init();
    if cli.verbose {
        tracing::info!("verbose logging requested; set RUST_LOG=debug for more detail");
    }

    let mut settings = AppSettings::load(cli.config.clone())?;
    if let Some(dir) = &cli.cache_dir {
        settings.cache_dir = Some(dir.clone());
    }
    let cache_dir = settings.resolve_cache_dir();
    std::fs::create_dir_all(&cache_dir)?;
    let is_default_cache_dir = cli.cache_dir.is_none();

    let mut sources = SourceManager::new();
    sources.register(Arc::new(
        SlippySource::new(
            cli.map_type_id,
            "osm",
            "https://tile.openstreetmap.org/{z}/{x}/{y}.png",
            "(c) OpenStreetMap contributors",
        )
        .with_license(
            "Open Database License (ODbL)",
            "https://opendatacommons.org/licenses/odbl/",
        ),
    ));
    let source = sources.get(cli.map_type_id)?;

    if let Some(notice) = tilecache_rs::sources::acknowledge_license(source.as_ref(), &mut settings, false) {
        println!("license: {} ({})", notice.name, notice.url.as_deref().unwrap_or("no URL"));
    }

    let layer = LayerConfig::new(cli.map_type_id);
    let pixmap_cache = Arc::new(PixmapCache::new(settings.cache_limit_mib));

    let mpp = TileZoomLevel::scale_to_mpp(tilecache_rs::coord::SCALE_ORIGIN - cli.zoom);
    let center = GeoPoint::new(cli.lat, cli.lon);
    let center_tile = ProjectionBridge::coord_to_tile(Projection::Mercator, center, mpp, mpp, 0)
        .ok_or_else(|| anyhow::anyhow!("zoom {} is not addressable by this source", cli.zoom))?;

    let half_w = (cli.width_tiles / 2) as i32;
    let half_h = (cli.height_tiles / 2) as i32;
    let ul_tile = tilecache_rs::coord::TileCoord::new(
        center_tile.x - half_w,
        center_tile.y - half_h,
        center_tile.zoom,
        center_tile.zone,
    );
    let br_tile = tilecache_rs::coord::TileCoord::new(
        center_tile.x + half_w,
        center_tile.y + half_h,
        center_tile.zoom,
        center_tile.zone,
    );
    let viewport = Viewport {
        upper_left: ProjectionBridge::tile_to_center_geo(Projection::Mercator, ul_tile),
        lower_right: ProjectionBridge::tile_to_center_geo(Projection::Mercator, br_tile),
        xmpp: mpp,
        ympp: mpp,
        zone: 0,
    };

    if cli.autodownload {
        let (downloader, mut redraw_rx) = Downloader::new(pixmap_cache.clone(), 4);
        let generation = LayerGeneration::new();
        let rect = TileRect {
            xmin: ul_tile.x,
            xmax: br_tile.x,
            ymin: ul_tile.y,
            ymax: br_tile.y,
            zoom: center_tile.zoom,
            zone: center_tile.zone,
        };
        let job = downloader.submit(
            source.clone(),
            rect,
            RedownloadMode::New,
            cache_dir.clone(),
            layer.cache_layout,
            is_default_cache_dir,
            layer_name_for(cli.map_type_id),
            generation.handle(),
            &settings,
        )?;
        while job.progress().done() < job.progress().total() {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        if redraw_rx.try_recv().is_ok() {
            tracing::info!("background fetch updated one or more tiles");
        }
    }

    let outcome = Painter::new(pixmap_cache)
        .draw(
            source.as_ref(),
            &layer,
            &layer_name_for(cli.map_type_id),
            &cache_dir,
            is_default_cache_dir,
            &viewport,
            &settings,
        )
        .await;

    let found = outcome.tiles.iter().filter(|t| t.image.is_some()).count();
    let missing = outcome.tiles.len() - found;
    println!("mode: {:?}", outcome.mode);
    println!("tiles drawn: {found}, missing: {missing}");
    if let Some(status) = &outcome.status {
        println!("status: {status}");
    }
    for copyright in &outcome.copyrights {
        println!("copyright: {}", copyright.text);
    }
    if matches!(outcome.mode, DrawMode::Skip { .. }) {
        std::process::exit(1);
    }
    Ok(())
}

fn layer_name_for(map_type_id: i32) -> String {
    format!("layer-{map_type_id}")
}
