use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use webhub_core::load_from_path;

fn tmp_path(name: &str) -> PathBuf {
    let nanos =
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_else(|_| Duration::from_secs(0)).as_nanos();
    std::env::temp_dir().join(format!("webhub-{nanos}-{name}.toml"))
}

#[test]
fn loads_minimal_http_listener() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let path = tmp_path("minimal");
    let toml = r#"
[[listeners]]
protocol = "http"
ports = [8080]
addresses = ["127.0.0.1"]
"#;
    fs::write(&path, toml)?;

    let cfg = load_from_path(&path)?;
    assert_eq!(cfg.listeners.len(), 1);
    assert_eq!(cfg.listeners[0].ports, vec![8080]);
    assert!(cfg.routes.is_empty());
    Ok(())
}

#[test]
fn loads_every_route_kind() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let path = tmp_path("routes");
    let toml = r#"
[[listeners]]
protocol = "http"
ports = [8080]

[[routes]]
kind = "web_socket"
path = "/ws"

[[routes]]
kind = "sse"
path = "/events"

[[routes]]
kind = "proxy"
path = "/api"
targets = ["http://backend:9000"]

[[routes]]
kind = "media"
path = "/media"
root = "/srv/media"

[[routes]]
kind = "spa"
root = "/srv/apps"
"#;
    fs::write(&path, toml)?;

    let cfg = load_from_path(&path)?;
    assert_eq!(cfg.routes.len(), 5);
    Ok(())
}

#[test]
fn https_listener_without_tls_material_is_rejected() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let path = tmp_path("https-no-tls");
    let toml = r#"
[[listeners]]
protocol = "https"
ports = [8443]
"#;
    fs::write(&path, toml)?;

    assert!(load_from_path(&path).is_err());
    Ok(())
}

#[test]
fn missing_listeners_is_rejected() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let path = tmp_path("no-listeners");
    fs::write(&path, "listeners = []\n")?;
    assert!(load_from_path(&path).is_err());
    Ok(())
}
