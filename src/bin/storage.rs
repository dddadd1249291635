use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tundra::config::StorageConfig;
use tundra::proto::RegistrationStub;
use tundra::storage::StorageServer;

/// Storage server of the tundra distributed filesystem.
#[derive(Debug, Parser)]
#[command(name = "tundra-storage", version)]
struct Args {
    /// Optional TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Local directory served by this storage server.
    #[arg(long)]
    root: Option<PathBuf>,
    /// Hostname under which this server is reachable from outside.
    #[arg(long)]
    hostname: Option<String>,
    /// Address to bind both interfaces on.
    #[arg(long)]
    bind: Option<IpAddr>,
    /// Port of the client-facing storage interface; 0 = system-chosen.
    #[arg(long)]
    client_port: Option<u16>,
    /// Port of the naming-facing command interface; 0 = system-chosen.
    #[arg(long)]
    command_port: Option<u16>,
    /// Hostname of the naming server.
    #[arg(long)]
    naming_host: Option<String>,
    /// Registration port of the naming server.
    #[arg(long)]
    naming_port: Option<u16>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => StorageConfig::load(path).await.expect("failed to load configuration"),
        None => StorageConfig::default(),
    };
    let config = config.overlay(
        args.root,
        args.hostname,
        args.bind,
        args.client_port,
        args.command_port,
        args.naming_host,
        args.naming_port,
    );
    let root = config.root.clone().expect("a storage root is required (--root or config file)");

    let server =
        StorageServer::new(root, Some(config.client_addr()), Some(config.command_addr()));
    let (naming_host, naming_port) = config.naming();
    let registration = RegistrationStub::new(naming_host, naming_port);
    server.start(&config.hostname(), &registration).await.expect("failed to start storage server");
    info!(
        client = ?server.client_addr(),
        command = ?server.command_addr(),
        "storage server running"
    );

    tokio::signal::ctrl_c().await.expect("failed to wait for shutdown signal");
    server.stop();
}
