//! MBTiles (SQLite, single-file tiled archive) reader (§4.4, §6).
//!
//! TMS y-axis flip: `tile_row = 2^zoom - 1 - y`. Handle is per-source,
//! opened read-only, and serialized behind a mutex since a single
//! `rusqlite::Connection` is not `Sync` for concurrent use.

use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::sync::Mutex;

use crate::error::Result;

pub struct SqliteTileReader {
    conn: Mutex<Connection>,
}

impl SqliteTileReader {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Fetches the blob for `(osm_zoom, x, y)`, applying the TMS row flip.
    /// Zero rows returns `Ok(None)` (absent); more than one row is treated
    /// as absent with a warning, per §4.4.
    pub fn get_tile(&self, osm_zoom: i32, x: i32, y: i32) -> Result<Option<Vec<u8>>> {
        let tile_row = tms_row(osm_zoom, y);
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT tile_data FROM tiles WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
        )?;
        let mut rows = stmt.query(rusqlite::params![osm_zoom, x, tile_row])?;

        let Some(first) = rows.next()? else {
            return Ok(None);
        };
        let data: Vec<u8> = first.get(0)?;

        if rows.next()?.is_some() {
            tracing::warn!(osm_zoom, x, y, "multiple mbtiles rows for one tile, treating as absent");
            return Ok(None);
        }

        Ok(Some(data))
    }

    pub fn metadata_value(&self, name: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT value FROM metadata WHERE name = ?1")?;
        let mut rows = stmt.query([name])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }
}

/// `tile_row = 2^zoom - 1 - y`, the OSM -> TMS y-axis flip.
pub fn tms_row(osm_zoom: i32, y: i32) -> i32 {
    (1i32 << osm_zoom) - 1 - y
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_mbtiles(path: &Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE tiles (zoom_level INTEGER, tile_column INTEGER, tile_row INTEGER, tile_data BLOB);
             CREATE TABLE metadata (name TEXT, value TEXT);
             INSERT INTO metadata (name, value) VALUES ('format', 'png');",
        )
        .unwrap();
        conn.execute(
            "INSERT INTO tiles (zoom_level, tile_column, tile_row, tile_data) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![3, 2, 5, vec![1u8, 2, 3, 4]],
        )
        .unwrap();
    }

    #[test]
    fn tms_row_flip_matches_spec_example() {
        // z=3, y=2 -> tile_row = 2^3 - 1 - 2 = 5
        assert_eq!(tms_row(3, 2), 5);
    }

    #[test]
    fn reads_known_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.mbtiles");
        create_test_mbtiles(&path);

        let reader = SqliteTileReader::open(&path).unwrap();
        let data = reader.get_tile(3, 2, 2).unwrap();
        assert_eq!(data, Some(vec![1, 2, 3, 4]));
    }

    #[test]
    fn missing_tile_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.mbtiles");
        create_test_mbtiles(&path);

        let reader = SqliteTileReader::open(&path).unwrap();
        assert!(reader.get_tile(3, 99, 99).unwrap().is_none());
    }

    #[test]
    fn metadata_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.mbtiles");
        create_test_mbtiles(&path);

        let reader = SqliteTileReader::open(&path).unwrap();
        assert_eq!(reader.metadata_value("format").unwrap(), Some("png".to_string()));
        assert_eq!(reader.metadata_value("missing").unwrap(), None);
    }
}
