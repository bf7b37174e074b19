//! Geographic coordinate <-> tile address conversion for each supported
//! projection (§4.1).

use crate::coord::{TileCoord, TileZoomLevel};

/// A geographic point, WGS84 latitude/longitude in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Which projection/drawmode a `MapSource` uses to address tiles, per §3's
/// MapSource geometry field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// Spherical Mercator, OSM/slippy-map style addressing.
    Mercator,
    /// Plain unprojected lat/lon grid.
    LatLon,
    /// UTM, single or multiple zones.
    Utm,
}

/// Bridges a `GeoPoint` and a `TileCoord` for a given projection. Stateless:
/// every operation takes the projection and zone as explicit parameters
/// rather than holding them, so one bridge serves every source.
pub struct ProjectionBridge;

impl ProjectionBridge {
    /// `geo -> tile`. Returns `None` when `xmpp`/`ympp` are incompatible
    /// with this projection (e.g. unequal x/y mpp where only equal is
    /// supported, or the resulting zoom falls outside the source's
    /// supported zoom range -- the caller is expected to check the zoom
    /// range separately since it is source-specific).
    pub fn coord_to_tile(
        projection: Projection,
        geo: GeoPoint,
        xmpp: f64,
        ympp: f64,
        zone: i32,
    ) -> Option<TileCoord> {
        match projection {
            Projection::Mercator => {
                if (xmpp - ympp).abs() > f64::EPSILON {
                    return None;
                }
                let scale = TileZoomLevel::mpp_to_scale(xmpp).ok()?;
                let osm_zoom = crate::coord::SCALE_ORIGIN - scale;
                Self::mercator_to_tile(geo, osm_zoom, zone)
            }
            Projection::LatLon => {
                if (xmpp - ympp).abs() > f64::EPSILON {
                    return None;
                }
                let scale = TileZoomLevel::mpp_to_scale(xmpp).ok()?;
                Some(Self::latlon_to_tile(geo, scale, zone))
            }
            Projection::Utm => Self::utm_to_tile(geo, xmpp, ympp, zone),
        }
    }

    /// `tile -> geo`, the geographic center of the tile.
    pub fn tile_to_center_geo(projection: Projection, tile: TileCoord) -> GeoPoint {
        match projection {
            Projection::Mercator => Self::mercator_tile_center(tile),
            Projection::LatLon => Self::latlon_tile_center(tile),
            Projection::Utm => Self::utm_tile_center(tile),
        }
    }

    fn mercator_to_tile(geo: GeoPoint, osm_zoom: i32, zone: i32) -> Option<TileCoord> {
        if !(crate::coord::OSM_ZOOM_MIN..=crate::coord::OSM_ZOOM_MAX).contains(&osm_zoom) {
            return None;
        }
        let n = 2f64.powi(osm_zoom);
        let lat_rad = geo.lat.to_radians();
        let x = ((geo.lon + 180.0) / 360.0 * n).floor() as i32;
        let y = ((1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / std::f64::consts::PI) / 2.0
            * n)
            .floor() as i32;
        TileCoord::from_osm(x, y, osm_zoom, zone).ok()
    }

    fn mercator_tile_center(tile: TileCoord) -> GeoPoint {
        let osm_zoom = tile.osm_zoom();
        let n = 2f64.powi(osm_zoom);
        let lon = (tile.x as f64 + 0.5) / n * 360.0 - 180.0;
        let y_frac = (tile.y as f64 + 0.5) / n;
        let lat_rad = (std::f64::consts::PI * (1.0 - 2.0 * y_frac)).sinh().atan();
        GeoPoint::new(lat_rad.to_degrees(), lon)
    }

    fn latlon_to_tile(geo: GeoPoint, scale: i32, zone: i32) -> TileCoord {
        let osm_zoom = crate::coord::SCALE_ORIGIN - scale;
        let n = 2f64.powi(osm_zoom);
        let x = ((geo.lon + 180.0) / 360.0 * n).floor() as i32;
        let y = ((90.0 - geo.lat) / 180.0 * n).floor() as i32;
        TileCoord::new(x, y, scale, zone)
    }

    fn latlon_tile_center(tile: TileCoord) -> GeoPoint {
        let osm_zoom = tile.osm_zoom();
        let n = 2f64.powi(osm_zoom);
        let lon = (tile.x as f64 + 0.5) / n * 360.0 - 180.0;
        let lat = 90.0 - (tile.y as f64 + 0.5) / n * 180.0;
        GeoPoint::new(lat, lon)
    }

    /// Terraserver/UTM addressing: `(easting, northing)` divided by
    /// `(200 * mpp)`, per §4.1.
    fn utm_to_tile(geo: GeoPoint, xmpp: f64, ympp: f64, zone: i32) -> Option<TileCoord> {
        if (xmpp - ympp).abs() > f64::EPSILON {
            return None;
        }
        let scale = TileZoomLevel::mpp_to_scale(xmpp).ok()?;
        let (easting, northing, utm_zone) = latlon_to_utm(geo.lat, geo.lon);
        let zone = if zone != 0 { zone } else { utm_zone };
        let divisor = 200.0 * xmpp;
        let x = (easting / divisor).floor() as i32;
        let y = (northing / divisor).floor() as i32;
        Some(TileCoord::new(x, y, scale, zone))
    }

    fn utm_tile_center(tile: TileCoord) -> GeoPoint {
        let mpp = TileZoomLevel::scale_to_mpp(tile.zoom);
        let divisor = 200.0 * mpp;
        let easting = (tile.x as f64 + 0.5) * divisor;
        let northing = (tile.y as f64 + 0.5) * divisor;
        utm_to_latlon(easting, northing, tile.zone)
    }
}

/// Rough spherical UTM forward projection, sufficient for tile addressing
/// (not surveying-grade). Zone is the standard 1..60 UTM zone number.
fn latlon_to_utm(lat: f64, lon: f64) -> (f64, f64, i32) {
    const A: f64 = 6378137.0; // WGS84 semi-major axis
    const K0: f64 = 0.9996;
    let zone = (((lon + 180.0) / 6.0).floor() as i32 + 1).clamp(1, 60);
    let lon0 = (zone as f64 - 1.0) * 6.0 - 180.0 + 3.0;
    let lat_rad = lat.to_radians();
    let dlon = (lon - lon0).to_radians();
    let easting = A * K0 * dlon * lat_rad.cos() + 500_000.0;
    let mut northing = A * K0 * lat_rad;
    if lat < 0.0 {
        northing += 10_000_000.0;
    }
    (easting, northing, zone)
}

fn utm_to_latlon(easting: f64, northing: f64, zone: i32) -> GeoPoint {
    const A: f64 = 6378137.0;
    const K0: f64 = 0.9996;
    let lon0 = (zone as f64 - 1.0) * 6.0 - 180.0 + 3.0;
    let x = easting - 500_000.0;
    let lat_rad = northing / (A * K0);
    let lat = lat_rad.to_degrees();
    let lon = lon0 + (x / (A * K0 * lat_rad.cos())).to_degrees();
    GeoPoint::new(lat, lon)
}

/// A geographic bounding box, used for copyright/attribution lookups and
/// source bbox restrictions.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BBox {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl BBox {
    pub fn new(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> Self {
        Self {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        }
    }

    pub fn intersects(&self, other: &BBox) -> bool {
        self.min_lat <= other.max_lat
            && self.max_lat >= other.min_lat
            && self.min_lon <= other.max_lon
            && self.max_lon >= other.min_lon
    }
}

/// Rejects a track segment whose endpoints straddle the antimeridian, per
/// §4.9's line-drawing rule: both longitudes' absolute values > 90 with
/// opposite signs.
pub fn crosses_antimeridian(a: GeoPoint, b: GeoPoint) -> bool {
    a.lon.abs() > 90.0 && b.lon.abs() > 90.0 && a.lon.signum() != b.lon.signum()
}
