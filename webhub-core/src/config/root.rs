use serde::Deserialize;

use super::listener::ListenerConfig;
use super::routing::RouteConfig;
use super::telemetry::{LoggingConfig, TelemetryConfig};
use super::timeout::TimeoutConfig;

/// Top-level configuration tree.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// At least one listener is required.
    pub listeners: Vec<ListenerConfig>,
    /// Route table, dispatched through the routing fabric by longest-prefix
    /// match (exact routes always win).
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub timeout: TimeoutConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}
