#![forbid(unsafe_code)]

use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use webhub_core::load_from_path;

#[derive(Parser, Debug)]
#[command(author, version, about = "webhub: a multi-protocol HTTP server (websocket/sse/proxy/media/spa)")]
struct Cli {
    /// Path to configuration TOML file
    #[arg(short, long, value_name = "FILE", default_value = "config/basic.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    match load_from_path(&cli.config) {
        Ok(cfg) => {
            info!(listeners = cfg.listeners.len(), routes = cfg.routes.len(), "configuration loaded");
            if let Err(err) = webhub_core::run(cfg).await {
                error!(%err, "webhub exited with error");
                std::process::exit(1);
            }
        }
        Err(err) => {
            error!(%err, "failed to load configuration");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).with_target(false).init();
}
