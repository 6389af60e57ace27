//! The routing & path-prefix fabric (§4.2): a route registry distinguishing
//! exact-path, path-prefix, and forward-prefix registrations, dispatching
//! requests by longest-prefix match with an exact match always winning.
//!
//! The registry is generic over the handler type `H` so it can be unit
//! tested with a plain value (see the tests below) while the server wires
//! it up with `H = `an `Arc`-held request handler per engine.

mod prefix;

pub use prefix::PathPrefix;

use http::Method;

/// How a prefix route's matched portion is presented to its handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stripping {
    /// The handler sees the full original path; the prefix is informational
    /// only (used for introspection / method restriction).
    Visible,
    /// The router removes the prefix before the handler sees the path.
    HandlerVisible,
    /// The prefix is removed before dispatch *and* the original path is
    /// preserved in `X-Original-Path` (set only if not already present).
    Forward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    Exact,
    Prefix,
}

#[derive(Debug, Clone)]
struct RouteEntry<H> {
    pattern: String,
    kind: RouteKind,
    stripping: Stripping,
    methods: Option<Vec<Method>>,
    handler: H,
}

/// The result of a successful dispatch: the handler to invoke, the path it
/// should see, and whether an `X-Original-Path` header needs to be set.
#[derive(Debug, Clone)]
pub struct Dispatch<'a, H> {
    pub handler: &'a H,
    pub path: String,
    pub original_path: Option<String>,
}

/// Introspection record returned by [`Router::walk`].
#[derive(Debug, Clone)]
pub struct RouteInfo {
    pub path: String,
    pub methods: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Router<H: Clone> {
    routes: Vec<RouteEntry<H>>,
}

fn normalize_prefix(pattern: &str) -> String {
    if pattern.ends_with('/') {
        pattern.to_string()
    } else {
        format!("{pattern}/")
    }
}

impl<H: Clone> Router<H> {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Register an exact-path route, optionally restricted to `methods`.
    pub fn register_exact(&mut self, path: impl Into<String>, methods: Option<Vec<Method>>, handler: H) {
        self.routes.push(RouteEntry {
            pattern: path.into(),
            kind: RouteKind::Exact,
            stripping: Stripping::Visible,
            methods,
            handler,
        });
    }

    /// Register a path-prefix route. `strip` controls whether the matched
    /// prefix is removed before the handler sees the path.
    pub fn register_prefix(
        &mut self,
        prefix: impl Into<String>,
        strip: bool,
        methods: Option<Vec<Method>>,
        handler: H,
    ) {
        self.routes.push(RouteEntry {
            pattern: normalize_prefix(&prefix.into()),
            kind: RouteKind::Prefix,
            stripping: if strip { Stripping::HandlerVisible } else { Stripping::Visible },
            methods,
            handler,
        });
    }

    /// Register a forward-prefix route: the prefix is always stripped
    /// before dispatch, and the pre-strip path is preserved in
    /// `X-Original-Path` by the caller (the router only signals this via
    /// [`Dispatch::original_path`]).
    pub fn register_forward_prefix(
        &mut self,
        prefix: impl Into<String>,
        methods: Option<Vec<Method>>,
        handler: H,
    ) {
        self.routes.push(RouteEntry {
            pattern: normalize_prefix(&prefix.into()),
            kind: RouteKind::Prefix,
            stripping: Stripping::Forward,
            methods,
            handler,
        });
    }

    fn method_allowed(entry: &RouteEntry<H>, method: &Method) -> bool {
        entry.methods.as_ref().is_none_or(|ms| ms.iter().any(|m| m == method))
    }

    /// Dispatch by longest-prefix match: an exact match always wins over
    /// any prefix registration (exact is strictly more specific); among
    /// prefix/forward-prefix matches, the longest registered prefix wins.
    pub fn dispatch(&self, path: &str, method: &Method) -> Option<Dispatch<'_, H>> {
        if let Some(entry) = self
            .routes
            .iter()
            .find(|e| e.kind == RouteKind::Exact && e.pattern == path && Self::method_allowed(e, method))
        {
            return Some(Dispatch { handler: &entry.handler, path: path.to_string(), original_path: None });
        }

        let best = self
            .routes
            .iter()
            .filter(|e| {
                e.kind == RouteKind::Prefix
                    && path.starts_with(e.pattern.as_str())
                    && Self::method_allowed(e, method)
            })
            .max_by_key(|e| e.pattern.len())?;

        match best.stripping {
            Stripping::Visible => {
                Some(Dispatch { handler: &best.handler, path: path.to_string(), original_path: None })
            }
            Stripping::HandlerVisible => {
                let stripped = strip_with_leading_slash(path, &best.pattern);
                Some(Dispatch { handler: &best.handler, path: stripped, original_path: None })
            }
            Stripping::Forward => {
                let stripped = strip_with_leading_slash(path, &best.pattern);
                Some(Dispatch {
                    handler: &best.handler,
                    path: stripped,
                    original_path: Some(path.to_string()),
                })
            }
        }
    }

    /// List every registered route for introspection.
    pub fn walk(&self) -> Vec<RouteInfo> {
        self.routes
            .iter()
            .map(|e| RouteInfo {
                path: e.pattern.clone(),
                methods: e
                    .methods
                    .as_ref()
                    .map(|ms| ms.iter().map(|m| m.to_string()).collect())
                    .unwrap_or_default(),
            })
            .collect()
    }
}

fn strip_with_leading_slash(path: &str, prefix: &str) -> String {
    let rest = &path[prefix.len()..];
    if rest.starts_with('/') {
        rest.to_string()
    } else {
        format!("/{rest}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_beats_prefix() {
        let mut r: Router<&str> = Router::new();
        r.register_prefix("/api", true, None, "prefix");
        r.register_exact("/api", None, "exact");
        let d = r.dispatch("/api", &Method::GET).unwrap();
        assert_eq!(*d.handler, "exact");
    }

    #[test]
    fn longest_prefix_wins() {
        let mut r: Router<&str> = Router::new();
        r.register_prefix("/api", true, None, "short");
        r.register_prefix("/api/v2", true, None, "long");
        let d = r.dispatch("/api/v2/users", &Method::GET).unwrap();
        assert_eq!(*d.handler, "long");
        assert_eq!(d.path, "/users");
    }

    #[test]
    fn non_matching_path_does_not_dispatch() {
        let mut r: Router<&str> = Router::new();
        r.register_forward_prefix("/api", None, "h");
        assert!(r.dispatch("/other", &Method::GET).is_none());
    }

    #[test]
    fn forward_prefix_strips_and_preserves_original() {
        let mut r: Router<&str> = Router::new();
        r.register_forward_prefix("/api", None, "h");
        let d = r.dispatch("/api/users", &Method::GET).unwrap();
        assert_eq!(d.path, "/users");
        assert_eq!(d.original_path.as_deref(), Some("/api/users"));
    }

    #[test]
    fn handler_visible_prefix_strips_without_original_path() {
        let mut r: Router<&str> = Router::new();
        r.register_prefix("/static", true, None, "h");
        let d = r.dispatch("/static/a.js", &Method::GET).unwrap();
        assert_eq!(d.path, "/a.js");
        assert!(d.original_path.is_none());
    }

    #[test]
    fn method_restriction_is_honored() {
        let mut r: Router<&str> = Router::new();
        r.register_exact("/only-post", Some(vec![Method::POST]), "h");
        assert!(r.dispatch("/only-post", &Method::GET).is_none());
        assert!(r.dispatch("/only-post", &Method::POST).is_some());
    }

    #[test]
    fn walk_lists_registrations() {
        let mut r: Router<&str> = Router::new();
        r.register_exact("/health", None, "h");
        r.register_prefix("/static", true, Some(vec![Method::GET]), "h2");
        let info = r.walk();
        assert_eq!(info.len(), 2);
        assert!(info.iter().any(|i| i.path == "/health"));
        assert!(info.iter().any(|i| i.path == "/static/" && i.methods == vec!["GET"]));
    }
}
