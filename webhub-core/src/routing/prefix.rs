//! The `PathPrefix` object (§4.2): a leading-slash-normalized prefix used by
//! the SPA resolver to strip request paths and rewrite served HTML so
//! relative asset references keep working when the app is mounted under a
//! sub-path.

use crate::error::{ErrorKind, ProxyError, Result};

#[derive(Debug, Clone, Default)]
pub struct PathPrefix {
    prefix: Option<String>,
}

impl PathPrefix {
    /// `prefix` is normalized to start with `/` and never end with `/`
    /// (the empty/root prefix is represented as `None`).
    pub fn new(prefix: impl Into<String>) -> Self {
        let raw = prefix.into();
        let trimmed = raw.trim_matches('/');
        if trimmed.is_empty() {
            Self { prefix: None }
        } else {
            Self { prefix: Some(format!("/{trimmed}")) }
        }
    }

    pub fn get(&self) -> &str {
        self.prefix.as_deref().unwrap_or("")
    }

    pub fn is_set(&self) -> bool {
        self.prefix.is_some()
    }

    /// Remove the prefix from `path`, failing if `path` does not start with
    /// it.
    pub fn strip<'a>(&self, path: &'a str) -> Result<&'a str> {
        let Some(prefix) = &self.prefix else { return Ok(path) };
        path.strip_prefix(prefix.as_str())
            .ok_or_else(|| ProxyError::Engine(ErrorKind::BadRequest(format!("path {path} does not start with prefix {prefix}"))))
    }

    /// Rewrite `src="/` and `href="/` attributes to carry the prefix, and
    /// inject a `<base href="{prefix}/">` element inside `<head>` so
    /// relative URLs resolve correctly when the app is mounted under a
    /// sub-path. No-op when no prefix is set.
    pub fn patch_html(&self, content: &str) -> String {
        let Some(prefix) = &self.prefix else { return content.to_string() };

        let mut out = content
            .replace("src=\"/", &format!("src=\"{prefix}/"))
            .replace("href=\"/", &format!("href=\"{prefix}/"));

        let base_tag = format!("<base href=\"{prefix}/\">");
        if let Some(idx) = out.find("<head>") {
            out.insert_str(idx + "<head>".len(), &base_tag);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_leading_and_trailing_slashes() {
        assert_eq!(PathPrefix::new("api").get(), "/api");
        assert_eq!(PathPrefix::new("/api/").get(), "/api");
        assert!(!PathPrefix::new("/").is_set());
        assert!(!PathPrefix::new("").is_set());
    }

    #[test]
    fn strip_rejects_non_matching_paths() {
        let p = PathPrefix::new("/api");
        assert_eq!(p.strip("/api/users").unwrap(), "/users");
        assert!(p.strip("/other").is_err());
    }

    #[test]
    fn patch_html_rewrites_roots_and_injects_base() {
        let p = PathPrefix::new("/app");
        let input = r#"<html><head><title>t</title></head><body><img src="/a.png"><a href="/b">b</a></body></html>"#;
        let out = p.patch_html(input);
        assert!(out.contains(r#"src="/app/a.png""#));
        assert!(out.contains(r#"href="/app/b""#));
        assert!(out.contains(r#"<base href="/app/">"#));
    }

    #[test]
    fn no_prefix_is_a_no_op() {
        let p = PathPrefix::new("/");
        let input = r#"<img src="/a.png">"#;
        assert_eq!(p.patch_html(input), input);
        assert_eq!(p.strip("/a.png").unwrap(), "/a.png");
    }
}
