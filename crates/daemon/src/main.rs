//! Testrig Adapter Daemon - Main Entry Point
//!
//! Composition root: wires the adapter factories into a registry and
//! serves the configured adapter tree over stdio.

mod serve;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use testrig_core::application::{AdapterRegistry, MapperFactory};
use testrig_infra_eval::ShellFactory;
use testrig_infra_remote::protocol::Encoding;
use testrig_infra_remote::RemoteFactory;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "testrig-adapter", version, about = "Serve an adapter tree over the remote wire protocol")]
struct Cli {
    /// Root adapter spec, e.g. 'mapper(/etc/testrig/top.conf)',
    /// 'remote(./sut-adapter --flag)' or 'shell(SIGUSR1=oUsr1)'.
    spec: String,

    /// Handshake sends raw action names instead of URL-encoded ones
    /// (names with embedded line breaks are then rejected).
    #[arg(long)]
    no_encode: bool,
}

/// stdout and stderr both carry protocol bytes, so log output goes to
/// the file named by TESTRIG_LOG_FILE, or nowhere.
fn init_logging() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("testrig=info"))
        .expect("Failed to create env filter");

    let log_format = std::env::var("TESTRIG_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    match std::env::var("TESTRIG_LOG_FILE") {
        Ok(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            let writer = std::sync::Mutex::new(file);
            match log_format.as_str() {
                "json" => {
                    tracing_subscriber::registry()
                        .with(env_filter)
                        .with(fmt::layer().json().with_writer(writer))
                        .init();
                }
                _ => {
                    tracing_subscriber::registry()
                        .with(env_filter)
                        .with(fmt::layer().with_ansi(false).with_writer(writer))
                        .init();
                }
            }
        }
        Err(_) => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::sink))
                .init();
        }
    }
    Ok(())
}

fn build_registry() -> AdapterRegistry {
    let mut registry = AdapterRegistry::new();
    registry.register("remote", Arc::new(RemoteFactory::new(Encoding::Url)));
    registry.register("remote-raw", Arc::new(RemoteFactory::new(Encoding::Raw)));
    registry.register("mapper", Arc::new(MapperFactory));
    registry.register("shell", Arc::new(ShellFactory));
    registry
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging()?;

    info!("Testrig adapter daemon v{} starting...", VERSION);

    let registry = build_registry();
    let encoding = if cli.no_encode {
        Encoding::Raw
    } else {
        Encoding::Url
    };

    serve::serve(&registry, &cli.spec, encoding).await?;

    info!("Shutdown complete.");
    Ok(())
}
