use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::error::{ProxyError, Result};

pub fn load_from_path<P: AsRef<Path>>(p: P) -> Result<Config> {
    let txt = fs::read_to_string(p)
        .map_err(|e| ProxyError::Config(format!("Failed to read config file: {e}")))?;
    let cfg: Config = toml::from_str(&txt)
        .map_err(|e| ProxyError::Config(format!("Failed to parse config: {e}")))?;

    validate_config(&cfg)?;

    Ok(cfg)
}

fn validate_config(cfg: &Config) -> Result<()> {
    if cfg.listeners.is_empty() {
        return Err(ProxyError::NoListeners);
    }

    for listener in &cfg.listeners {
        if listener.protocol != "https" {
            continue;
        }
        let has_default_paths = listener.ssl_cert_path.is_some() && listener.ssl_key_path.is_some();
        let has_default_inline = listener.ssl_cert_data.is_some() && listener.ssl_key_data.is_some();
        if !has_default_paths && !has_default_inline && listener.domain_certs.is_empty() {
            return Err(ProxyError::Config(format!(
                "https listener on ports {:?} has no TLS material configured",
                listener.ports
            )));
        }
        if let Some(cert) = &listener.ssl_cert_path {
            if !Path::new(cert).exists() {
                return Err(ProxyError::Config(format!("Certificate file not found: {cert}")));
            }
        }
        if let Some(key) = &listener.ssl_key_path {
            if !Path::new(key).exists() {
                return Err(ProxyError::Config(format!("Key file not found: {key}")));
            }
        }
    }

    Ok(())
}

