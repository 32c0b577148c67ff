//! Command-line surface, mirroring the reference `leelen2sip` binary's
//! option set: two positional arguments (the LEELEN-side interface and this
//! device's phone number, as a regex), a handful of everyday flags, and a
//! block of "advanced"/"LEELEN SIP" options most deployments never touch.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "leelen2sip",
    about = "Convert LEELEN Video Intercom System to standard SIP protocol",
    version
)]
pub struct Cli {
    /// Load defaults from a TOML config file; any flag given on the command
    /// line still overrides the matching file value.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Interface or address for LEELEN protocols (discovery/VoIP/control).
    pub leelen_interface: Option<IpAddr>,

    /// This phone number, matched as a regex against incoming discovery
    /// solicitations (usually `XXXX-XXXX[-X]`). Unset falls back to the
    /// fixed identity number configured elsewhere.
    pub number: Option<String>,

    /// Interface or address for standard SIP.
    #[arg(short = 'i', long = "interface")]
    pub interface: Option<IpAddr>,

    /// Standard SIP port (default: 5060).
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// Daemonize (run in background). Left to the caller's process
    /// supervisor; recorded here only so the flag round-trips.
    #[arg(short = 'D', long)]
    pub daemonize: bool,

    /// Enable debug-level logging.
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Prefer IPv6 for the LEELEN-side socket when no explicit interface
    /// was given.
    #[arg(short = '6', long = "ipv6")]
    pub ipv6: bool,

    /// Override the address reported to discovery solicitors, instead of
    /// the LEELEN-side listening interface.
    #[arg(long = "report-addr")]
    pub report_addr: Option<IpAddr>,

    /// SIP User-Agent string.
    #[arg(long = "ua")]
    pub user_agent: Option<String>,

    /// Device description advertised over discovery.
    #[arg(long = "desc")]
    pub desc: Option<String>,

    /// Device type code (1 = indoor station, 4 = door phone, 16 = guard
    /// station).
    #[arg(long = "type")]
    pub device_type: Option<u8>,

    /// Audio port.
    #[arg(long = "audio")]
    pub audio_port: Option<u16>,

    /// Video port.
    #[arg(long = "video")]
    pub video_port: Option<u16>,

    /// Discovery port.
    #[arg(long = "discovery")]
    pub discovery_port: Option<u16>,

    /// LEELEN-side VoIP signalling port.
    #[arg(long = "voip")]
    pub voip_port: Option<u16>,

    /// Control (gate-open) port.
    #[arg(long = "control")]
    pub control_port: Option<u16>,
}
