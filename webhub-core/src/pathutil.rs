//! Pure helper functions shared by every engine: path segmenting, wildcard
//! domain matching, extension-to-MIME lookup, and the static-extension
//! predicate. None of these touch I/O or hold state.

/// Split a path into its non-empty segments, ignoring leading/trailing
/// slashes. `"/a/b/"` and `"a/b"` both yield `["a", "b"]`.
pub fn split_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Lower-cased filename extension without the leading dot, or `""` if the
/// path has none.
pub fn extension_of(path: &str) -> String {
    path.rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Match a request host (already stripped of `:port`) against a segment-wise
/// wildcard domain pattern. A `*` segment matches exactly one host segment;
/// every other segment must match literally, case-insensitively. The number
/// of segments must match exactly, so `*.example.com` does not match
/// `example.com` or `a.b.example.com`.
///
/// `abc-*.example.com` matches `abc-xyz.example.com`: the wildcard may be a
/// suffix/prefix glob *within* a segment, not just a whole-segment `*`.
pub fn domain_matches(pattern: &str, host: &str) -> bool {
    let pat_segs: Vec<&str> = pattern.split('.').collect();
    let host_segs: Vec<&str> = host.split('.').collect();
    if pat_segs.len() != host_segs.len() {
        return false;
    }
    pat_segs
        .iter()
        .zip(host_segs.iter())
        .all(|(p, h)| segment_matches(p, h))
}

fn segment_matches(pattern: &str, segment: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    let Some(star) = pattern.find('*') else {
        return pattern.eq_ignore_ascii_case(segment);
    };
    let (prefix, suffix) = (&pattern[..star], &pattern[star + 1..]);
    segment.len() >= prefix.len() + suffix.len()
        && segment[..prefix.len()].eq_ignore_ascii_case(prefix)
        && segment[segment.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
}

/// Strip an optional `:port` suffix from a `Host` header value. Leaves
/// IPv6 literals (`[::1]:8080`) with their brackets intact.
pub fn host_without_port(host: &str) -> &str {
    if let Some(bracket_end) = host.rfind(']') {
        return &host[..=bracket_end];
    }
    host.rsplit_once(':').map(|(h, _)| h).unwrap_or(host)
}

/// A minimal extension→MIME-type table covering the content types the
/// bundled engines are expected to serve. Not an exhaustive registry: the
/// exact contents are explicitly out of scope (spec.md non-goals), but the
/// lookup function itself is a core, testable operation.
pub fn mime_type_for(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "application/javascript; charset=utf-8",
        "json" => "application/json",
        "txt" => "text/plain; charset=utf-8",
        "xml" => "application/xml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "pdf" => "application/pdf",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}

/// Extensions the range-serving media engine will accept by default.
pub const DEFAULT_MEDIA_EXTENSIONS: &[&str] =
    &["mp4", "webm", "mp3", "wav", "ogg", "mov", "m4v", "m4a"];

/// Whether `extension` appears in an allow-list, case-insensitively.
pub fn is_allowed_extension(extension: &str, allow_list: &[String]) -> bool {
    allow_list.iter().any(|e| e.eq_ignore_ascii_case(extension))
}

/// Join a directory and a relative path with exactly one `/` between them,
/// regardless of whether either side already carries one.
pub fn join_one_slash(a: &str, b: &str) -> String {
    let a = a.trim_end_matches('/');
    let b = b.trim_start_matches('/');
    if a.is_empty() {
        format!("/{b}")
    } else {
        format!("{a}/{b}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_domain_matching() {
        assert!(domain_matches("*.example.com", "a.example.com"));
        assert!(!domain_matches("*.example.com", "example.com"));
        assert!(!domain_matches("*.example.com", "a.b.example.com"));
        assert!(domain_matches("abc-*.example.com", "abc-x.example.com"));
        assert!(!domain_matches("abc-*.example.com", "xabc-y.example.com"));
    }

    #[test]
    fn host_port_stripping() {
        assert_eq!(host_without_port("example.com:8080"), "example.com");
        assert_eq!(host_without_port("example.com"), "example.com");
        assert_eq!(host_without_port("[::1]:8080"), "[::1]");
    }

    #[test]
    fn extension_extraction() {
        assert_eq!(extension_of("/a/b/app.js"), "js");
        assert_eq!(extension_of("/a/b/README"), "");
        assert_eq!(extension_of("movie.MP4"), "mp4");
    }

    #[test]
    fn segment_splitting() {
        assert_eq!(split_segments("/a/b/"), vec!["a", "b"]);
        assert_eq!(split_segments("a/b"), vec!["a", "b"]);
        assert_eq!(split_segments("/"), Vec::<&str>::new());
    }

    #[test]
    fn single_slash_join() {
        assert_eq!(join_one_slash("/api/", "/users"), "/api/users");
        assert_eq!(join_one_slash("/api", "users"), "/api/users");
        assert_eq!(join_one_slash("", "users"), "/users");
    }
}
