use serde::Deserialize;

/// TLS material for a listener: either on-disk PEM paths or inline PEM bytes
/// (base64-free — raw PEM text in the TOML, e.g. via a multi-line string).
#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
pub enum SslMaterial {
    Paths { ssl_cert_path: String, ssl_key_path: String },
    Inline { ssl_cert_data: String, ssl_key_data: String },
}

/// Per-domain TLS material for SNI selection, plus the default used when no
/// domain matches (exact, then wildcard, then this default).
#[derive(Debug, Deserialize, Clone)]
pub struct DomainCert {
    pub domain: String,
    #[serde(flatten)]
    pub material: SslMaterial,
}

/// One bound listener: a protocol, the ports/addresses cross-product it
/// binds, and its domain/TLS/redirect policy.
#[derive(Debug, Deserialize, Clone)]
pub struct ListenerConfig {
    /// `"http"` or `"https"`.
    pub protocol: String,
    pub ports: Vec<u16>,
    #[serde(default = "default_addresses")]
    pub addresses: Vec<String>,
    /// Default TLS material used when no per-domain entry or SNI match applies.
    #[serde(default)]
    pub ssl_cert_path: Option<String>,
    #[serde(default)]
    pub ssl_key_path: Option<String>,
    #[serde(default)]
    pub ssl_cert_data: Option<String>,
    #[serde(default)]
    pub ssl_key_data: Option<String>,
    /// Additional per-domain certificates for SNI-based selection.
    #[serde(default)]
    pub domain_certs: Vec<DomainCert>,
    /// Sets `TCP_MAXSEG=1220` on accepted sockets before the handshake.
    #[serde(default)]
    pub optimize_cloudflare: bool,
    /// Port an `http` listener redirects to when `https_redirect` is set.
    #[serde(default)]
    pub https_redirect_port: Option<u16>,
    /// Default: true. Only meaningful for `protocol = "http"` listeners.
    #[serde(default = "default_true")]
    pub https_redirect: bool,
    /// Advertise HTTP/3 via `Alt-Svc` on this listener. Static predicate only
    /// (no QUIC acceptor is implemented).
    #[serde(default)]
    pub http3: bool,
    /// Allowed Host/SNI patterns (segment-wise wildcard, e.g. `*.example.com`).
    /// Empty means allow-all.
    #[serde(default)]
    pub domains_allow: Vec<String>,
    /// Denied Host/SNI patterns, checked before `domains_allow`.
    #[serde(default)]
    pub domains_block: Vec<String>,
}

fn default_addresses() -> Vec<String> {
    vec!["0.0.0.0".to_string(), "[::]".to_string()]
}

fn default_true() -> bool {
    true
}
