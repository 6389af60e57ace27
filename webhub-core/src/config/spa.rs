use serde::Deserialize;

/// Mount point and resolution policy for one SPA engine instance.
#[derive(Debug, Deserialize, Clone)]
pub struct SpaRouteConfig {
    /// Directory, relative to the filesystem adapter's base, holding every
    /// app's asset tree (one subdirectory per app name).
    pub root: String,
    /// `"/"` for a root mount (disambiguated by `virtual_segment`), or a
    /// single path segment the app's asset tree is nested under.
    #[serde(default = "default_mount_url")]
    pub mount_url: String,
    /// App directory used when the root mount's first segment is the
    /// virtual segment itself.
    #[serde(default = "default_route")]
    pub default_route: String,
    #[serde(default = "default_virtual_segment")]
    pub virtual_segment: String,
    #[serde(default = "default_cache_max_age")]
    pub cache_max_age: u64,
    /// HTML paths that skip the session-resolver gate.
    #[serde(default)]
    pub auth_skip: Vec<String>,
    #[serde(default = "default_login_path")]
    pub login_path: String,
}

fn default_mount_url() -> String {
    "/".to_string()
}

fn default_route() -> String {
    "index".to_string()
}

fn default_virtual_segment() -> String {
    "p".to_string()
}

fn default_cache_max_age() -> u64 {
    3600
}

fn default_login_path() -> String {
    "/login".to_string()
}
