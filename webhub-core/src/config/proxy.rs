use serde::Deserialize;

/// Target-selection policy for a proxy route (§4.6).
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DispatchPolicy {
    #[default]
    RoundRobin,
    First,
}

/// A single reverse-proxy route: the target set it load-balances over and
/// its rewrite/header policy.
#[derive(Debug, Deserialize, Clone)]
pub struct ProxyRouteConfig {
    /// Path prefix this route is registered under.
    pub path: String,
    /// Backend target URLs (`http://host:port` or `https://host:port`).
    /// More than one enables round-robin selection.
    pub targets: Vec<String>,
    /// How a target is picked among `targets` on each request.
    #[serde(default)]
    pub policy: DispatchPolicy,
    /// Strip the registered prefix before forwarding upstream.
    #[serde(default = "default_true")]
    pub strip_prefix: bool,
    /// Register this route as a forward-prefix route: the matched prefix is
    /// always stripped before dispatch and the pre-strip path is preserved
    /// in `X-Original-Path`, rather than a plain (non-forwarding) prefix
    /// route whose stripping is controlled by `strip_prefix` alone.
    #[serde(default)]
    pub forward: bool,
    /// Prepend this to the upstream path instead of (or in addition to)
    /// stripping the inbound prefix.
    #[serde(default)]
    pub add_prefix: Option<String>,
    /// Forward the client's original `Host` header instead of the target's.
    #[serde(default)]
    pub preserve_host: bool,
    /// Headers to set on the upstream request, applied after forwarded-header
    /// injection and before the deny-list removal below.
    #[serde(default)]
    pub custom_headers: Vec<(String, String)>,
    /// Header names to strip from the upstream request after custom headers
    /// are applied.
    #[serde(default)]
    pub deny_headers: Vec<String>,
}

fn default_true() -> bool {
    true
}
