#![forbid(unsafe_code)]

pub mod assets;
pub mod config;
pub mod engines;
pub mod error;
pub mod fs;
pub mod listener;
pub mod load_balancing;
pub mod pathutil;
pub mod routing;
pub mod server;
pub mod spa;
pub mod stats;
pub mod telemetry;
pub mod tls;

pub use config::{load_from_path, Config};
pub use error::{ProxyError, Result};
pub use server::run;
