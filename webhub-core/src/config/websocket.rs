use serde::Deserialize;

/// Mount point and wire-contract settings for one WebSocket engine instance.
#[derive(Debug, Deserialize, Clone)]
pub struct WebSocketConfig {
    /// Path the upgrade endpoint is registered under.
    pub path: String,
    /// Path the client-coordination script is served from (wire contract
    /// only: `__WS_ROUTE__`/`__WS_WORKER_ROUTE__` placeholder substitution).
    #[serde(default)]
    pub client_script_path: Option<String>,
    #[serde(default)]
    pub worker_script_path: Option<String>,
}
