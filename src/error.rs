use thiserror::Error;

/// Errors surfaced by the tile cache core.
///
/// Draw-path errors (addressing, disk, download, resource) are never fatal
/// to the caller: the painter logs them and treats the tile as absent, per
/// the draw-path propagation rule. Configuration-path errors (unknown map
/// type, bad style path, inability to create the cache directory) are
/// returned to callers that can report them to a user immediately.
#[derive(Error, Debug)]
pub enum TileCacheError {
    #[error("unknown map type id: {0}")]
    UnknownMapType(i32),

    #[error("unsupported mpp for this source: {0}")]
    UnsupportedMpp(f64),

    #[error("tile zoom {zoom} out of range [{min}, {max}] for source {map_type_id}")]
    ZoomOutOfRange {
        map_type_id: i32,
        zoom: i32,
        min: i32,
        max: i32,
    },

    #[error("corrupt tile image at {path}")]
    CorruptImage { path: String },

    #[error("metatile error: {0}")]
    Metatile(#[from] crate::disk::metatile::MetatileError),

    #[error("sqlite tile store error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("http error fetching {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("content error fetching {url}: {message}")]
    Content { url: String, message: String },

    #[error("failed to write tile file {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read file: {0}")]
    FileError(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("cache directory {path} could not be created: {source}")]
    CacheDirUnavailable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("render error: {0}")]
    Render(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, TileCacheError>;
