use serde::Deserialize;

use super::media::MediaRouteConfig;
use super::proxy::ProxyRouteConfig;
use super::spa::SpaRouteConfig;
use super::sse::SseConfig;
use super::websocket::WebSocketConfig;

/// One routing table entry. Engine-specific fields live on the variant's own
/// config type; `path`/mount keys live there too since registration shape
/// (exact vs. prefix) differs per engine.
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RouteConfig {
    WebSocket(WebSocketConfig),
    Sse(SseConfig),
    Proxy(ProxyRouteConfig),
    Media(MediaRouteConfig),
    Spa(SpaRouteConfig),
}
