mod listener;
mod loader;
mod media;
mod proxy;
mod root;
mod routing;
mod spa;
mod sse;
mod telemetry;
mod timeout;
mod tls;
mod websocket;

pub use listener::{DomainCert, ListenerConfig, SslMaterial};
pub use loader::load_from_path;
pub use media::MediaRouteConfig;
pub use proxy::{DispatchPolicy, ProxyRouteConfig};
pub use root::Config;
pub use routing::RouteConfig;
pub use spa::SpaRouteConfig;
pub use sse::SseConfig;
pub use telemetry::{LoggingConfig, TelemetryConfig};
pub use timeout::{KeepAliveConfig, TimeoutConfig};
pub use tls::MIN_TLS_VERSION;
pub use websocket::WebSocketConfig;
