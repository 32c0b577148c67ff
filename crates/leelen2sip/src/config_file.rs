//! Optional `--config <path>` TOML file: every field mirrors a CLI flag and
//! is overridden by it when both are given.

use std::net::IpAddr;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub leelen_interface: Option<IpAddr>,
    pub interface: Option<IpAddr>,
    pub port: Option<u16>,
    pub desc: Option<String>,
    pub user_agent: Option<String>,
    pub device_type: Option<u8>,
    pub audio_port: Option<u16>,
    pub video_port: Option<u16>,
    pub discovery_port: Option<u16>,
    pub voip_port: Option<u16>,
    pub control_port: Option<u16>,
    pub report_addr: Option<IpAddr>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("failed to parse config file {}", path.display()))
    }
}
