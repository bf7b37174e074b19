//! Registry of configured `MapSource`s, keyed by `map_type_id` (§3).

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, TileCacheError};
use crate::sources::MapSource;

/// Holds every configured source, looked up by its stable numeric
/// `map_type_id`. Constructed once at the composition root and shared by
/// reference with the painter/downloader, per REDESIGN FLAGS §9 (no
/// process-global singleton).
#[derive(Default)]
pub struct SourceManager {
    sources: HashMap<i32, Arc<dyn MapSource>>,
}

impl SourceManager {
    pub fn new() -> Self {
        Self {
            sources: HashMap::new(),
        }
    }

    pub fn register(&mut self, source: Arc<dyn MapSource>) {
        self.sources.insert(source.map_type_id(), source);
    }

    pub fn get(&self, map_type_id: i32) -> Result<Arc<dyn MapSource>> {
        self.sources
            .get(&map_type_id)
            .cloned()
            .ok_or(TileCacheError::UnknownMapType(map_type_id))
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = i32> + '_ {
        self.sources.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::slippy::SlippySource;

    #[test]
    fn register_then_lookup() {
        let mut manager = SourceManager::new();
        manager.register(Arc::new(SlippySource::new(
            13,
            "OSM",
            "https://tile.example/{z}/{x}/{y}.png",
            "(c) OSM",
        )));

        let source = manager.get(13).unwrap();
        assert_eq!(source.map_type_id(), 13);
        assert!(manager.get(999).is_err());
    }
}
