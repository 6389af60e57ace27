use serde::Deserialize;

/// Mount point and keep-alive policy for one SSE engine instance.
#[derive(Debug, Deserialize, Clone)]
pub struct SseConfig {
    /// Path the stream endpoint is registered under.
    pub path: String,
    /// Keep-alive interval in seconds. Floored to 5; default 15.
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
}

fn default_keepalive_secs() -> u64 {
    15
}
