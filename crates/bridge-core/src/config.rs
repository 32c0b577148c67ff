//! Device configuration: the ports, description and identity this bridge
//! presents to both the LEELEN network and the SIP side.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use leelen_core::family::{AUDIO_PORT, CONTROL_PORT, DEFAULT_MTU, DISCOVERY_PORT, VIDEO_PORT, VOIP_PORT};
use leelen_core::number::LeelenNumber;
use serde::{Deserialize, Serialize};

/// LEELEN device type codes, as advertised in discovery and dialog
/// `From=number?type` fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum DeviceType {
    IndoorStation = 1,
    DoorPhone = 4,
    GuardStation = 16,
}

impl Default for DeviceType {
    fn default() -> Self {
        DeviceType::IndoorStation
    }
}

impl TryFrom<u8> for DeviceType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            1 => Ok(DeviceType::IndoorStation),
            4 => Ok(DeviceType::DoorPhone),
            16 => Ok(DeviceType::GuardStation),
            other => Err(other),
        }
    }
}

/// Bound address plus the port this device listens on for each protocol
/// family, mirroring the C `struct LeelenConfig`.
#[derive(Debug, Clone)]
pub struct Config {
    pub desc: String,
    pub device_type: DeviceType,
    pub number: LeelenNumber,

    /// Sent as the SIP `User-Agent` header on requests this bridge
    /// originates.
    pub user_agent: String,

    pub bind_addr: IpAddr,

    pub audio_port: u16,
    pub video_port: u16,
    pub discovery_port: u16,
    pub voip_port: u16,
    pub control_port: u16,

    /// Source ports used when this device originates discovery/VoIP/control
    /// traffic; `0` lets the OS pick an ephemeral port.
    pub discovery_src_port: u16,
    pub voip_src_port: u16,
    pub control_src_port: u16,

    pub mtu: usize,

    /// How long a dialog waits for an expected reply before it is
    /// considered timed out.
    pub voip_timeout: Duration,
    /// How long a call may run before the bridge tears it down itself.
    pub max_call_duration: Option<Duration>,

    /// Address reported to discovery solicitors in place of the interface
    /// address a request arrived on.
    pub report_addr: Option<IpAddr>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            desc: "LEELEN2SIP bridge".to_string(),
            device_type: DeviceType::default(),
            number: LeelenNumber::parse("0000-0000", None).expect("literal number parses"),
            user_agent: "leelen2sip/0.1".to_string(),
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            audio_port: AUDIO_PORT,
            video_port: VIDEO_PORT,
            discovery_port: DISCOVERY_PORT,
            voip_port: VOIP_PORT,
            control_port: CONTROL_PORT,
            discovery_src_port: 0,
            voip_src_port: 0,
            control_src_port: 0,
            mtu: DEFAULT_MTU,
            voip_timeout: Duration::from_millis(500),
            max_call_duration: None,
            report_addr: None,
        }
    }
}
