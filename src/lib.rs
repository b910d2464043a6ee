pub mod archive;
pub mod bundle;
pub mod command;
pub mod compression;
pub mod config;
pub mod error;
pub mod maintenance;
pub mod orchestrator;
pub mod process_lock;
pub mod pruner;
pub mod series;

pub use error::*;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global fmt subscriber; `RUST_LOG` overrides the `info` default
pub fn init_tracing(service: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init();
    tracing::debug!(service, "tracing initialized");
}
