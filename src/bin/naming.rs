use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tundra::config::NamingConfig;
use tundra::naming::NamingServer;

/// Naming server of the tundra distributed filesystem.
#[derive(Debug, Parser)]
#[command(name = "tundra-naming", version)]
struct Args {
    /// Optional TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Address to bind both interfaces on.
    #[arg(long)]
    bind: Option<IpAddr>,
    /// Port of the client-facing service interface.
    #[arg(long)]
    service_port: Option<u16>,
    /// Port of the storage-facing registration interface.
    #[arg(long)]
    registration_port: Option<u16>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => NamingConfig::load(path).await.expect("failed to load configuration"),
        None => NamingConfig::default(),
    };
    let config = config.overlay(args.bind, args.service_port, args.registration_port);

    let server = NamingServer::new(config.service_addr(), config.registration_addr());
    server.start().expect("failed to start naming server");
    info!(
        service = %config.service_addr(),
        registration = %config.registration_addr(),
        "naming server running"
    );

    tokio::signal::ctrl_c().await.expect("failed to wait for shutdown signal");
    server.stop();
}
