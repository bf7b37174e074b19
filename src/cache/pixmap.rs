//! Bounded in-memory pixmap cache, keyed by `TileFingerprint` (§4.3).
//!
//! FIFO eviction over insertion order, exact byte accounting, one mutex.
//! Grounded line-for-line on the original's `mapcache.cpp`
//! (`unordered_map` + `list` of keys, evict-oldest-until-under-limit), not
//! on a policy-driven cache like `moka` -- see DESIGN.md for why.

use image::RgbaImage;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Fixed per-entry bookkeeping overhead, covering the map node and the
/// `extra` metadata attached to each entry. The original hardcodes this as
/// a literal 100; this crate keeps it as a named constant per DESIGN NOTES.
pub const ENTRY_OVERHEAD_BYTES: u64 = 100;

/// Decoded tile image plus the bookkeeping the cache needs, §3's
/// `CachedPixmap`.
#[derive(Clone)]
pub struct CachedPixmap {
    pub image: RgbaImage,
    pub source_path: Option<String>,
    pub size_bytes: u64,
}

impl CachedPixmap {
    pub fn new(image: RgbaImage, source_path: Option<String>) -> Self {
        let size_bytes = pixmap_size_bytes(&image);
        Self {
            image,
            source_path,
            size_bytes,
        }
    }
}

/// `width * height * depth_bytes + fixed_overhead`, per §3. `RgbaImage` is
/// 4 bytes/pixel.
fn pixmap_size_bytes(image: &RgbaImage) -> u64 {
    (image.width() as u64) * (image.height() as u64) * 4 + ENTRY_OVERHEAD_BYTES
}

struct Inner {
    entries: HashMap<String, CachedPixmap>,
    order: VecDeque<String>,
    total_bytes: u64,
    limit_bytes: u64,
}

impl Inner {
    fn evict_to_limit(&mut self) {
        while self.total_bytes > self.limit_bytes {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            if let Some(entry) = self.entries.remove(&oldest) {
                self.total_bytes = self.total_bytes.saturating_sub(entry.size_bytes);
            }
        }
    }
}

/// Thread-safe bounded pixmap cache. One `std::sync::Mutex` serializes
/// `add`/`get`/`flush*`; holds are O(1) plus size accounting, per §5.
pub struct PixmapCache {
    inner: Mutex<Inner>,
}

impl PixmapCache {
    /// `limit_mib` is the configured byte budget in MiB (default 16, per
    /// §4.3).
    pub fn new(limit_mib: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                total_bytes: 0,
                limit_bytes: limit_mib * 1024 * 1024,
            }),
        }
    }

    /// Insert or replace. On replace, the previous entry's size is
    /// subtracted before the new size is added; eviction then runs until
    /// `total <= limit`.
    pub fn add(&self, key: String, pixmap: CachedPixmap) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(previous) = inner.entries.remove(&key) {
            inner.total_bytes = inner.total_bytes.saturating_sub(previous.size_bytes);
            inner.order.retain(|k| k != &key);
        }
        inner.total_bytes += pixmap.size_bytes;
        inner.order.push_back(key.clone());
        inner.entries.insert(key, pixmap);
        inner.evict_to_limit();
    }

    pub fn get(&self, key: &str) -> Option<CachedPixmap> {
        let inner = self.inner.lock().unwrap();
        inner.entries.get(key).cloned()
    }

    /// Remove all entries.
    pub fn flush(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.clear();
        inner.order.clear();
        inner.total_bytes = 0;
    }

    /// Remove every entry whose key starts with `prefix` -- used to
    /// invalidate every alpha/shrink variant of a tile once a fresh
    /// download lands (§4.3, §4.5 step 4).
    pub fn flush_matching(&self, prefix: &str) {
        let mut inner = self.inner.lock().unwrap();
        let doomed: Vec<String> = inner
            .entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        for key in doomed {
            if let Some(entry) = inner.entries.remove(&key) {
                inner.total_bytes = inner.total_bytes.saturating_sub(entry.size_bytes);
            }
            inner.order.retain(|k| k != &key);
        }
    }

    /// Remove every entry for one provider. Keys are
    /// `map_type_id-x-y-zoom-zone-...` (see `TileFingerprint::cache_key`),
    /// so this matches on the leading `map_type_id-` segment.
    pub fn flush_by_type(&self, map_type_id: i32) {
        self.flush_matching(&format!("{}-", map_type_id));
    }

    /// Current tracked byte total, exposed for tests and diagnostics.
    pub fn total_bytes(&self) -> u64 {
        self.inner.lock().unwrap().total_bytes
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
