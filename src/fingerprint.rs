//! The cache key uniquely identifying a rendered tile variant.

use crate::coord::TileCoord;
use std::hash::{Hash, Hasher};

/// Uniquely identifies a rendered image: two tiles with identical
/// fingerprints are interchangeable (§3). Stable across runs for the same
/// configuration, so it doubles as the on-disk-cache-invalidation prefix
/// key (`flush_matching`, see `cache::pixmap`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileFingerprint {
    pub map_type_id: i32,
    pub x: i32,
    pub y: i32,
    pub zoom: i32,
    pub zone: i32,
    pub name_hash: u64,
    pub alpha: u8,
    pub xshrink: u32,
    pub yshrink: u32,
}

impl TileFingerprint {
    pub fn new(coord: TileCoord, map_type_id: i32, name: &str, alpha: u8) -> Self {
        Self {
            map_type_id,
            x: coord.x,
            y: coord.y,
            zoom: coord.zoom,
            zone: coord.zone,
            name_hash: hash_name(name),
            alpha,
            xshrink: 1,
            yshrink: 1,
        }
    }

    pub fn with_shrink(mut self, xshrink: u32, yshrink: u32) -> Self {
        self.xshrink = xshrink;
        self.yshrink = yshrink;
        self
    }

    /// The prefix shared by every shrink/alpha variant of the same
    /// underlying tile, used by `PixmapCache::flush_matching` to invalidate
    /// all cached variants once a fresh download lands.
    pub fn invalidation_prefix(&self) -> String {
        format!(
            "{}-{}-{}-{}-{}",
            self.map_type_id, self.x, self.y, self.zoom, self.zone
        )
    }

    /// Stable textual cache key, following the original's
    /// `HASHKEY_FORMAT_STRING` shape (`%d-%d-%d-%d-%d-%d-%d-%.3f-%.3f`)
    /// adapted to this crate's field types.
    pub fn cache_key(&self) -> String {
        format!(
            "{}-{}-{}-{}-{}-{}-{}-{}",
            self.invalidation_prefix(),
            self.name_hash,
            self.alpha,
            self.xshrink,
            self.yshrink
        )
    }
}

fn hash_name(name: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    name.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_fields_produce_same_key() {
        let coord = TileCoord::new(10, 20, 5, 0);
        let a = TileFingerprint::new(coord, 13, "osm", 255);
        let b = TileFingerprint::new(coord, 13, "osm", 255);
        assert_eq!(a.cache_key(), b.cache_key());
        assert_eq!(a, b);
    }

    #[test]
    fn differing_alpha_changes_key_but_shares_prefix() {
        let coord = TileCoord::new(10, 20, 5, 0);
        let opaque = TileFingerprint::new(coord, 13, "osm", 255);
        let faded = TileFingerprint::new(coord, 13, "osm", 128);
        assert_ne!(opaque.cache_key(), faded.cache_key());
        assert_eq!(opaque.invalidation_prefix(), faded.invalidation_prefix());
    }

    #[test]
    fn shrink_variants_share_prefix() {
        let coord = TileCoord::new(10, 20, 5, 0);
        let full = TileFingerprint::new(coord, 13, "osm", 255);
        let shrunk = full.clone().with_shrink(2, 2);
        assert_ne!(full.cache_key(), shrunk.cache_key());
        assert_eq!(full.invalidation_prefix(), shrunk.invalidation_prefix());
    }
}
