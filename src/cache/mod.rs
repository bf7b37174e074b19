pub mod pixmap;

pub use pixmap::{CachedPixmap, PixmapCache};
