/// SNI certificate resolution order: exact domain match, then segment-wise
/// wildcard, then the listener's default material. Enforced minimum is
/// TLS 1.2; rustls' safe-default cipher suites and curves are used as-is.
pub const MIN_TLS_VERSION: &str = "1.2";
