use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pacgate::adblock::AdBlocker;
use pacgate::config::Config;
use pacgate::pac::PacEngine;
use pacgate::proxy::{ConnectionHandler, ProxyServer, TunnelEstablisher};
use pacgate::socks5::{HttpConnectBridge, Socks5Server};

/// PAC-routed forward proxy with HTTP and SOCKS5 front ends.
#[derive(Parser, Debug)]
#[command(name = "pacgate", version, about)]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// PAC script URL (overrides the config file).
    #[arg(long)]
    pac_url: Option<String>,

    /// HTTP proxy listen port.
    #[arg(short = 'p', long)]
    http_port: Option<u16>,

    /// SOCKS5 listen port.
    #[arg(short = 's', long)]
    socks_port: Option<u16>,

    /// Resolution cache TTL in seconds.
    #[arg(short = 'S', long)]
    cache_ttl: Option<u64>,

    /// Enable host-based ad blocking.
    #[arg(long)]
    adblock: bool,

    /// Log at debug level (overridden by RUST_LOG).
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn into_config(self) -> anyhow::Result<Config> {
        let mut config = match (&self.config, &self.pac_url) {
            (Some(path), _) => Config::from_file(path)?,
            (None, Some(url)) => Config::from_pac_url(url.clone()),
            (None, None) => {
                anyhow::bail!("either --config or --pac-url is required")
            }
        };
        if let Some(url) = self.pac_url {
            config.pac.url = url;
        }
        if let Some(port) = self.http_port {
            config.http_port = port;
        }
        if let Some(port) = self.socks_port {
            config.socks_port = port;
        }
        if let Some(ttl) = self.cache_ttl {
            config.pac.cache_ttl_secs = ttl;
        }
        if self.adblock {
            config.adblock.enabled = true;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = args.into_config()?;
    info!(
        pac_url = %config.pac.url,
        http = %config.http_addr(),
        socks = %config.socks_addr(),
        "starting pacgate"
    );

    // A PAC script that cannot be fetched or parsed at startup is fatal.
    let engine = PacEngine::from_url(&config.pac.url, config.cache_ttl())
        .await
        .context("failed to bootstrap PAC engine")?;
    if let Some((username, password)) = config.auth_credentials() {
        engine
            .set_auth(username, password)
            .await
            .context("failed to apply upstream credentials")?;
    }
    let engine = Arc::new(engine);

    let tunnels = Arc::new(TunnelEstablisher::new(config.dial_timeout()));

    let adblock = if config.adblock.enabled {
        AdBlocker::try_from_url(&config.adblock.hosts_url)
            .await
            .map(Arc::new)
    } else {
        None
    };

    let handler = ConnectionHandler::new(Arc::clone(&engine), Arc::clone(&tunnels), adblock);
    let http_server = ProxyServer::bind(&config.http_addr(), handler)
        .await
        .context("failed to start HTTP listener")?;
    let http_addr: SocketAddr = http_server.local_addr()?;

    let bridge = HttpConnectBridge::new(http_addr, config.dial_timeout());
    let socks_server = Socks5Server::bind(&config.socks_addr(), bridge)
        .await
        .context("failed to start SOCKS5 listener")?
        .with_handshake_deadline(Duration::from_secs(300));

    let mut http_task = tokio::spawn(http_server.run());
    let mut socks_task = tokio::spawn(socks_server.run());

    tokio::select! {
        result = &mut http_task => {
            error!("HTTP listener exited: {:?}", result);
        }
        result = &mut socks_task => {
            error!("SOCKS5 listener exited: {:?}", result);
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    http_task.abort();
    socks_task.abort();
    info!("pacgate stopped");
    Ok(())
}
