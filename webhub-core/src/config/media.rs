use serde::Deserialize;

/// Mount point and serving policy for one range-media engine instance.
#[derive(Debug, Deserialize, Clone)]
pub struct MediaRouteConfig {
    /// Path prefix this route is registered under (handler-visible stripped).
    pub path: String,
    /// Directory, relative to the filesystem adapter's base, this route serves.
    pub root: String,
    /// Extensions permitted to be served; defaults to the built-in media table.
    #[serde(default)]
    pub allowed_extensions: Option<Vec<String>>,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_true")]
    pub caching_enabled: bool,
    #[serde(default = "default_cache_max_age")]
    pub cache_max_age: u64,
}

fn default_buffer_size() -> usize {
    32 * 1024
}

fn default_true() -> bool {
    true
}

fn default_cache_max_age() -> u64 {
    3600
}
