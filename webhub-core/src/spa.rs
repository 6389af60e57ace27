//! The SPA storage-path resolver (§4.3): translates a request path into a
//! storage path to read from the [`crate::fs::Filesystem`] adapter, for
//! either a mounted sub-tree app or a root-mounted app disambiguated by a
//! virtual directory segment.

use crate::error::{ErrorKind, ProxyError, Result};
use crate::pathutil::{extension_of, join_one_slash, mime_type_for, split_segments};
use crate::routing::PathPrefix;

/// Resolves which user, if any, is associated with a request. Specified
/// only by interface per spec.md's non-goal on auth plug-ins; callers may
/// plug in a session-backed implementation.
pub trait SessionResolver: Send + Sync {
    fn resolve(&self, request_path: &str) -> Option<i64>;
}

/// A resolver that never finds a user, for when no session resolver is
/// configured.
pub struct NoSessionResolver;

impl SessionResolver for NoSessionResolver {
    fn resolve(&self, _request_path: &str) -> Option<i64> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct SpaConfig {
    /// Where this app is mounted. `"/"` means root-mount (disambiguated by
    /// `virtual_segment`); anything else names a single path segment under
    /// which the app's asset tree is nested.
    pub mount_url: String,
    /// App directory used when the root mount's first segment is the
    /// virtual segment itself (i.e. no app name was given in the URL).
    pub default_route: String,
    /// Path segment (default `"p"`) distinguishing asset URLs from
    /// app-routing segments in a root-mounted SPA.
    pub virtual_segment: String,
    /// The listener's own registered prefix, stripped before SPA-specific
    /// path logic runs.
    pub listener_prefix: PathPrefix,
    /// `Cache-Control: public, max-age=N` applied to static (non-HTML)
    /// assets.
    pub cache_max_age: u64,
    /// HTML paths that skip the session-resolver gate even when one is
    /// configured.
    pub auth_skip: Vec<String>,
    /// Where to redirect (302) when a session resolver is configured, the
    /// request is HTML, the path isn't skip-listed, and no user is found.
    pub login_path: String,
}

impl Default for SpaConfig {
    fn default() -> Self {
        Self {
            mount_url: "/".to_string(),
            default_route: "index".to_string(),
            virtual_segment: "p".to_string(),
            listener_prefix: PathPrefix::new(""),
            cache_max_age: 3600,
            auth_skip: Vec::new(),
            login_path: "/login".to_string(),
        }
    }
}

/// Go-`path.Clean`-style cleaning for `/`-separated paths: collapses `.`,
/// resolves `..` against preceding segments, and drops duplicate slashes.
/// A leading `..` that has nothing to resolve against is kept (callers use
/// this to detect escapes).
pub fn clean_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut out: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if out.last().is_some_and(|s| *s != "..") {
                    out.pop();
                } else if !absolute {
                    out.push("..");
                }
            }
            s => out.push(s),
        }
    }
    let joined = out.join("/");
    if absolute {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// Extract `(app_dir, relative_path)` from the request path per §4.3,
/// before virtual-segment stripping and final validation.
fn split_app_dir(path: &str, cfg: &SpaConfig) -> (String, String) {
    if cfg.mount_url != "/" {
        let app_dir = cfg.mount_url.trim_matches('/').to_string();
        let relative = path.strip_prefix(&cfg.mount_url).unwrap_or(path).to_string();
        return (app_dir, relative);
    }

    let segments = split_segments(path);
    match segments.first() {
        None => (cfg.default_route.clone(), String::new()),
        Some(first) if *first == cfg.virtual_segment => (cfg.default_route.clone(), path.to_string()),
        Some(first) => {
            let app_dir = (*first).to_string();
            let rest = path.strip_prefix('/').and_then(|p| p.strip_prefix(first)).unwrap_or("");
            (app_dir, rest.to_string())
        }
    }
}

/// Strip a leading `/{virtual_segment}` or `/{virtual_segment}/...` from
/// `relative`, leaving everything after it (with its leading slash).
fn strip_virtual_segment(relative: &str, virtual_segment: &str) -> String {
    let marker = format!("/{virtual_segment}");
    if let Some(rest) = relative.strip_prefix(&marker) {
        if rest.is_empty() || rest.starts_with('/') {
            return rest.to_string();
        }
    }
    relative.to_string()
}

/// Resolve a request path to a storage path under the filesystem adapter's
/// root, per §4.3. Fails with [`ErrorKind::BadRequest`] ("invalid-path") on
/// any escape attempt.
pub fn resolve_storage_path(request_path: &str, cfg: &SpaConfig) -> Result<String> {
    let stripped = cfg.listener_prefix.strip(request_path).unwrap_or(request_path);
    let (app_dir, relative) = split_app_dir(stripped, cfg);
    let relative = strip_virtual_segment(&relative, &cfg.virtual_segment);

    let relative = if relative.is_empty() || relative == "/" {
        "/index.html".to_string()
    } else {
        relative
    };

    let relative_no_leading = relative.trim_start_matches('/');
    if relative_no_leading.split('/').next() == Some("..") {
        return Err(invalid_path());
    }

    let storage = join_one_slash(&app_dir, relative_no_leading);
    let storage = storage.trim_start_matches('/').to_string();

    if storage.starts_with('/') || storage.split('/').next() == Some("..") {
        return Err(invalid_path());
    }

    let dir_part = storage.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
    if clean_path(dir_part) != dir_part {
        return Err(invalid_path());
    }

    Ok(storage)
}

fn invalid_path() -> ProxyError {
    ProxyError::Engine(ErrorKind::BadRequest("invalid-path".to_string()))
}

/// Content-type for a resolved storage path, from its extension.
pub fn content_type_for(storage_path: &str) -> &'static str {
    mime_type_for(&extension_of(storage_path))
}

/// `Cache-Control` value for a resolved storage path: HTML is always
/// non-cacheable; everything else uses the configured static max-age.
pub fn cache_control_for(storage_path: &str, cfg: &SpaConfig) -> String {
    let ext = extension_of(storage_path);
    if ext == "html" || ext == "htm" {
        "no-cache, no-store, must-revalidate".to_string()
    } else {
        format!("public, max-age={}", cfg.cache_max_age)
    }
}

/// Whether the session-resolver gate applies: the path is HTML and not in
/// the auth-skip list.
pub fn requires_session(storage_path: &str, request_path: &str, cfg: &SpaConfig) -> bool {
    let ext = extension_of(storage_path);
    (ext == "html" || ext.is_empty()) && !cfg.auth_skip.iter().any(|p| p == request_path)
}
