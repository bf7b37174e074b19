use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable that, when set, overrides the default cache root
/// (see §4.7 of the cache directory layout rules).
pub const CACHE_DIR_ENV_VAR: &str = "TILECACHE_DIR";

/// Cache file layout used when writing/reading tiles from disk.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheLayout {
    /// `<dir>/t<type_id>s<scale>z<z>/<x>/<y>`, extension-less.
    #[default]
    Viking,
    /// `<dir>[/<name>]/<osm_zoom>/<x>/<y>.<ext>`.
    Osm,
}

/// Zoom pinning for a layer: either follow the viewport's mpp, or lock to a
/// fixed power-of-two shrink factor, or a named preset understood by the UI
/// layer (opaque to this crate, carried through unchanged).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ZoomOverride {
    Auto,
    Fixed(f64),
    Named(String),
}

impl Default for ZoomOverride {
    fn default() -> Self {
        ZoomOverride::Auto
    }
}

/// Per-layer user settings, persisted with a saved project.
///
/// Mirrors §3/§6: these are exactly the fields the original persists
/// alongside a layer (map_type_id, cache_dir, cache_layout, alpha,
/// autodownload, only_missing, mapzoom_id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerConfig {
    pub map_type_id: i32,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default)]
    pub cache_layout: CacheLayout,
    #[serde(default = "default_alpha")]
    pub alpha: u8,
    #[serde(default = "default_true")]
    pub autodownload: bool,
    #[serde(default)]
    pub only_missing: bool,
    #[serde(default)]
    pub mapzoom_id: ZoomOverride,
}

fn default_alpha() -> u8 {
    255
}

fn default_true() -> bool {
    true
}

impl LayerConfig {
    pub fn new(map_type_id: i32) -> Self {
        Self {
            map_type_id,
            cache_dir: None,
            cache_layout: CacheLayout::default(),
            alpha: default_alpha(),
            autodownload: true,
            only_missing: false,
            mapzoom_id: ZoomOverride::default(),
        }
    }
}

/// Application-wide tuning knobs, loaded once at the composition root and
/// shared (by reference) with the cache, downloader and painter.
///
/// Field names follow the settings keys the original reads from
/// preferences, kept stable across versions per the Open Questions in
/// SPEC_FULL.md: `scale_inc_up`/`scale_inc_down` mirror
/// `VIK_SETTINGS_MAP_SCALE_INC_UP`/`_DOWN`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// PixmapCache byte budget, in MiB.
    #[serde(default = "default_cache_limit_mib")]
    pub cache_limit_mib: u64,

    /// How many smaller (more zoomed-out) scales the painter tries before
    /// giving up on scale-down fallback.
    #[serde(default = "default_scale_inc_down")]
    pub scale_inc_down: u8,

    /// How many larger (more zoomed-in) scales the painter tries before
    /// giving up on scale-up fallback.
    #[serde(default = "default_scale_inc_up")]
    pub scale_inc_up: u8,

    /// Fallback order: try scale-down before scale-up (default) or the
    /// reverse.
    #[serde(default = "default_true")]
    pub prefer_scale_down_first: bool,

    /// Requests larger than this are rejected outright.
    #[serde(default = "default_max_tiles_per_request")]
    pub max_tiles_per_request: u32,

    /// Requests larger than this require explicit user confirmation.
    #[serde(default = "default_max_tiles_confirm")]
    pub max_tiles_confirm: u32,

    /// Requests larger than this are refused even with confirmation.
    #[serde(default = "default_max_tiles_hard")]
    pub max_tiles_hard: u32,

    /// Overrides the default cache root; same precedence as the
    /// `TILECACHE_DIR` environment variable, with this field losing to an
    /// explicitly-set environment variable.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// `map_type_id`s whose license has already been acknowledged once
    /// (§4.7's persistent "seen" set), so the reminder isn't shown again.
    #[serde(default)]
    pub seen_licenses: Vec<i32>,
}

fn default_cache_limit_mib() -> u64 {
    16
}

fn default_scale_inc_down() -> u8 {
    4
}

fn default_scale_inc_up() -> u8 {
    2
}

fn default_max_tiles_per_request() -> u32 {
    1000
}

fn default_max_tiles_confirm() -> u32 {
    500
}

fn default_max_tiles_hard() -> u32 {
    5000
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            cache_limit_mib: default_cache_limit_mib(),
            scale_inc_down: default_scale_inc_down(),
            scale_inc_up: default_scale_inc_up(),
            prefer_scale_down_first: true,
            max_tiles_per_request: default_max_tiles_per_request(),
            max_tiles_confirm: default_max_tiles_confirm(),
            max_tiles_hard: default_max_tiles_hard(),
            cache_dir: None,
            seen_licenses: Vec::new(),
        }
    }
}

impl AppSettings {
    fn substitute_env_vars(content: &str) -> String {
        shellexpand::env_with_context_no_errors(content, |var| std::env::var(var).ok()).to_string()
    }

    /// Whether `map_type_id`'s license has already been acknowledged.
    pub fn has_seen_license(&self, map_type_id: i32) -> bool {
        self.seen_licenses.contains(&map_type_id)
    }

    /// Records `map_type_id`'s license as acknowledged, idempotently.
    pub fn mark_license_seen(&mut self, map_type_id: i32) {
        if !self.has_seen_license(map_type_id) {
            self.seen_licenses.push(map_type_id);
        }
    }

    /// Load settings from a TOML file, substituting `${VAR}`/`${VAR:-default}`
    /// references against the process environment first.
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let content = Self::substitute_env_vars(&content);
        let settings: AppSettings = toml::from_str(&content)?;
        Ok(settings)
    }

    /// Load from an explicit path, then well-known default locations, then
    /// fall back to built-in defaults.
    pub fn load(config_path: Option<PathBuf>) -> anyhow::Result<Self> {
        if let Some(path) = config_path {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        let default_paths = [
            PathBuf::from("tilecache.toml"),
            PathBuf::from("/etc/tilecache-rs/config.toml"),
        ];

        for path in default_paths {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Ok(AppSettings::default())
    }

    /// Resolve the cache root directory. The environment variable override
    /// wins first (also over an explicitly configured `cache_dir`, e.g. the
    /// CLI's `--cache-dir` flag); then that explicit `cache_dir`; then
    /// §4.7's default-directory chain: a system-global cache directory if
    /// it's writable, else a per-user directory under the home directory.
    /// Matches `maps_layer_default_dir()`'s `VIKING_MAPS` / `GLOBAL_MAPS_DIR`
    /// / home-dir chain.
    pub fn resolve_cache_dir(&self) -> PathBuf {
        if let Ok(from_env) = std::env::var(CACHE_DIR_ENV_VAR) {
            if !from_env.is_empty() {
                return PathBuf::from(from_env);
            }
        }

        if let Some(dir) = &self.cache_dir {
            return dir.clone();
        }

        let global_dir = PathBuf::from(GLOBAL_CACHE_DIR);
        if is_writable_dir(&global_dir) {
            return global_dir;
        }

        home_fallback_cache_dir()
    }
}

/// System-global cache directory, mirroring the original's
/// `GLOBAL_MAPS_DIR` for POSIX systems.
const GLOBAL_CACHE_DIR: &str = "/var/cache/tilecache-rs";

/// Probes whether `dir` (or its nearest existing ancestor) is writable,
/// the way the original checks `access(GLOBAL_MAPS_DIR, W_OK)` before
/// committing to the global directory.
fn is_writable_dir(dir: &Path) -> bool {
    if dir.exists() {
        let probe = dir.join(format!(".tilecache-rs-write-test-{}", std::process::id()));
        let writable = std::fs::write(&probe, []).is_ok();
        let _ = std::fs::remove_file(&probe);
        return writable;
    }
    match dir.parent() {
        Some(parent) => is_writable_dir(parent),
        None => false,
    }
}

fn home_fallback_cache_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".cache").join("tilecache-rs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings() {
        let settings = AppSettings::default();
        assert_eq!(settings.cache_limit_mib, 16);
        assert_eq!(settings.scale_inc_down, 4);
        assert_eq!(settings.scale_inc_up, 2);
        assert!(settings.prefer_scale_down_first);
        assert_eq!(settings.max_tiles_per_request, 1000);
        assert_eq!(settings.max_tiles_confirm, 500);
        assert_eq!(settings.max_tiles_hard, 5000);
    }

    #[test]
    fn parse_settings_toml() {
        let toml = r#"
            cache_limit_mib = 64
            scale_inc_down = 3
            prefer_scale_down_first = false
        "#;

        let settings: AppSettings = toml::from_str(toml).unwrap();
        assert_eq!(settings.cache_limit_mib, 64);
        assert_eq!(settings.scale_inc_down, 3);
        assert_eq!(settings.scale_inc_up, 2); // default
        assert!(!settings.prefer_scale_down_first);
    }

    #[test]
    fn layer_config_defaults() {
        let layer = LayerConfig::new(13);
        assert_eq!(layer.map_type_id, 13);
        assert_eq!(layer.alpha, 255);
        assert!(layer.autodownload);
        assert!(!layer.only_missing);
        assert_eq!(layer.mapzoom_id, ZoomOverride::Auto);
        assert_eq!(layer.cache_layout, CacheLayout::Viking);
    }

    #[test]
    fn parse_layer_config_toml() {
        let toml = r#"
            map_type_id = 13
            cache_layout = "osm"
            alpha = 200
            autodownload = false
            only_missing = true

            [mapzoom_id]
            fixed = 2.0
        "#;

        let layer: LayerConfig = toml::from_str(toml).unwrap();
        assert_eq!(layer.map_type_id, 13);
        assert_eq!(layer.cache_layout, CacheLayout::Osm);
        assert_eq!(layer.alpha, 200);
        assert!(!layer.autodownload);
        assert!(layer.only_missing);
        assert_eq!(layer.mapzoom_id, ZoomOverride::Fixed(2.0));
    }

    #[test]
    fn env_var_substitution_basic() {
        std::env::set_var("TEST_CACHE_SETTINGS_VAR", "64");
        let result = AppSettings::substitute_env_vars("cache_limit_mib = ${TEST_CACHE_SETTINGS_VAR}");
        assert_eq!(result, "cache_limit_mib = 64");
        std::env::remove_var("TEST_CACHE_SETTINGS_VAR");
    }

    #[test]
    fn env_var_substitution_with_default() {
        std::env::remove_var("NONEXISTENT_CACHE_VAR");
        let result = AppSettings::substitute_env_vars("x = ${NONEXISTENT_CACHE_VAR:-7}");
        assert_eq!(result, "x = 7");
    }

    #[test]
    fn cache_dir_env_var_overrides_settings_field() {
        std::env::set_var(CACHE_DIR_ENV_VAR, "/tmp/override-cache");
        let mut settings = AppSettings::default();
        settings.cache_dir = Some(PathBuf::from("/tmp/configured-cache"));
        assert_eq!(
            settings.resolve_cache_dir(),
            PathBuf::from("/tmp/override-cache")
        );
        std::env::remove_var(CACHE_DIR_ENV_VAR);
    }

    #[test]
    fn cache_dir_falls_back_to_settings_field() {
        std::env::remove_var(CACHE_DIR_ENV_VAR);
        let mut settings = AppSettings::default();
        settings.cache_dir = Some(PathBuf::from("/tmp/configured-cache"));
        assert_eq!(
            settings.resolve_cache_dir(),
            PathBuf::from("/tmp/configured-cache")
        );
    }

    #[test]
    fn is_writable_dir_true_for_an_existing_writable_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(is_writable_dir(dir.path()));
    }

    #[test]
    fn is_writable_dir_recurses_to_nearest_existing_ancestor() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does").join("not").join("exist");
        assert!(is_writable_dir(&missing));
    }

    #[test]
    fn no_explicit_override_falls_through_global_then_home() {
        std::env::remove_var(CACHE_DIR_ENV_VAR);
        let settings = AppSettings::default();
        let resolved = settings.resolve_cache_dir();
        assert!(resolved == PathBuf::from(GLOBAL_CACHE_DIR) || resolved == home_fallback_cache_dir());
    }
}
