use crate::config::ListenerConfig;
use crate::error::Result;
use tokio_rustls::TlsAcceptor;

use super::build_rustls;

/// Builds the TLS acceptor for a listener from its configuration.
pub fn setup_tls(listener_config: &ListenerConfig) -> Result<TlsAcceptor> {
    build_rustls(listener_config)
}
