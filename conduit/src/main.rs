//! The proxy binary.

use std::net::{Ipv4Addr, SocketAddr};

use anyhow::Context;
use clap::Parser;
use conduit::net::ProxyServer;
use conduit::plugin::load_plugin;

#[derive(Parser)]
#[command(name = "conduit", version, about = "A protocol-parsing Minecraft proxy")]
struct Args {
    /// Port to listen on.
    listen_port: u16,

    /// Port of the upstream server.
    upstream_port: u16,

    /// Hostname of the upstream server.
    #[arg(long = "host", default_value = "localhost")]
    upstream_host: String,

    /// Activate a plugin: NAME or NAME:ARG,ARG.
    #[arg(long = "plugin", value_name = "NAME[:ARGS]")]
    plugins: Vec<String>,

    /// Verbose logging.
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut plugins = Vec::new();
    for activation in &args.plugins {
        let plugin = load_plugin(activation)
            .with_context(|| format!("unknown plugin activation `{activation}`"))?;
        log::info!("Enabled plugin {}", plugin.name());
        plugins.push(plugin);
    }

    let listen: SocketAddr = (Ipv4Addr::UNSPECIFIED, args.listen_port).into();
    let server = ProxyServer::bind(listen, args.upstream_host, args.upstream_port)
        .await
        .with_context(|| format!("failed to bind {listen}"))?
        .with_plugins(plugins);

    tokio::select! {
        result = server.run() => result.context("proxy terminated")?,
        _ = tokio::signal::ctrl_c() => log::info!("Shutting down"),
    }
    Ok(())
}
