//! CLI entry point: parse arguments, assemble a `Config`, bind sockets and
//! run the reactor until interrupted.

mod cli;
mod config_file;

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use bridge_core::{Bridge, Config, DeviceType};
use clap::Parser;
use leelen_discovery::{Advertiser, DualStackDiscovery};
use tracing::info;
use tracing_subscriber::EnvFilter;

use cli::Cli;
use config_file::FileConfig;

const DEFAULT_DESC: &str = "LEELEN2SIP bridge";
const DEFAULT_SIP_PORT: u16 = leelen_core::family::VOIP_PORT;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);
    if cli.daemonize {
        info!("--daemonize is a no-op here; run this binary under your own process supervisor");
    }

    let file_config = cli
        .config
        .as_deref()
        .map(FileConfig::load)
        .transpose()
        .context("failed to load --config file")?
        .unwrap_or_default();

    let config = build_config(&cli, &file_config)?;
    let sip_port = cli.port.or(file_config.port).unwrap_or(DEFAULT_SIP_PORT);
    if sip_port == 0 {
        bail!("SIP port cannot be 0");
    }
    let leelen_interface = cli.leelen_interface.or(file_config.leelen_interface);
    let interface = cli.interface.or(file_config.interface);

    let leelen_bind_addr = leelen_bind_address(&cli, leelen_interface)?;
    let sip_bind_addr = interface.unwrap_or(IpAddr::V6(Ipv6Addr::UNSPECIFIED));

    // Discovery is served on both address families at once when both are
    // available, independent of which family the LEELEN VoIP socket itself
    // ends up bound to.
    let discovery_bind_v4 = match leelen_bind_addr {
        IpAddr::V4(addr) => addr,
        IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
    };
    let discovery = Arc::new(
        DualStackDiscovery::bind(discovery_bind_v4, 0, config.discovery_port)
            .await
            .context("failed to bind LEELEN discovery sockets")?,
    );

    let report_addr = config.report_addr.unwrap_or(leelen_bind_addr);
    let mut advertiser = Advertiser::new(config.device_type as u8, config.desc.clone(), config.mtu);
    advertiser.report_addr = Some(report_addr);
    if let Some(pattern) = &cli.number {
        advertiser = advertiser
            .with_number_regex(pattern)
            .context("invalid --number/phone regex")?;
    } else {
        advertiser = advertiser.with_base_number(config.number);
    }
    let advertiser = Arc::new(advertiser);
    tokio::spawn(discovery.clone().serve(advertiser));

    let leelen_socket = leelen_core::net::bind_udp(SocketAddr::new(leelen_bind_addr, config.voip_port), None)
        .await
        .context("failed to bind LEELEN VoIP socket")?;
    let sip_socket = leelen_core::net::bind_udp(SocketAddr::new(sip_bind_addr, sip_port), None)
        .await
        .context("failed to bind SIP socket")?;

    info!(
        number = %config.number,
        desc = %config.desc,
        leelen_addr = %leelen_bind_addr,
        sip_addr = %sip_bind_addr,
        sip_port,
        "leelen2sip starting"
    );

    let bridge = Bridge::new(config, discovery, sip_socket, leelen_socket);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let reactor = tokio::spawn(bridge_core::reactor::run(bridge, shutdown_rx));

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("shutting down leelen2sip");
    let _ = shutdown_tx.send(true);
    let _ = reactor.await;
    Ok(())
}

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn leelen_bind_address(cli: &Cli, leelen_interface: Option<IpAddr>) -> Result<IpAddr> {
    match leelen_interface {
        Some(addr) => Ok(addr),
        None if cli.ipv6 => Ok(IpAddr::V6(Ipv6Addr::UNSPECIFIED)),
        None => Ok(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
    }
}

/// Build the running `Config` from the optional TOML file first, then layer
/// any CLI flags the user actually gave on top — so a bare `--config` run is
/// fully determined by the file, while any flag still wins over it.
fn build_config(cli: &Cli, file: &FileConfig) -> Result<Config> {
    let mut config = Config::default();

    if let Some(desc) = cli.desc.clone().or_else(|| file.desc.clone()) {
        config.desc = desc;
    } else {
        config.desc = DEFAULT_DESC.to_string();
    }
    if let Some(ua) = cli.user_agent.clone().or_else(|| file.user_agent.clone()) {
        config.user_agent = ua;
    }
    if let Some(ty) = cli.device_type.or(file.device_type) {
        config.device_type = DeviceType::try_from(ty).map_err(|v| anyhow::anyhow!("invalid --type {v}, must be 1, 4 or 16"))?;
    }
    if let Some(port) = cli.audio_port.or(file.audio_port) {
        config.audio_port = port;
    }
    if let Some(port) = cli.video_port.or(file.video_port) {
        config.video_port = port;
    }
    if let Some(port) = cli.discovery_port.or(file.discovery_port) {
        config.discovery_port = port;
    }
    if let Some(port) = cli.voip_port.or(file.voip_port) {
        config.voip_port = port;
    }
    if let Some(port) = cli.control_port.or(file.control_port) {
        config.control_port = port;
    }
    if let Some(addr) = cli.report_addr.or(file.report_addr) {
        config.report_addr = Some(addr);
    }
    Ok(config)
}
