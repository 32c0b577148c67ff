//! Protocol-family constants: ports, MTU and string limits shared by every
//! LEELEN device on the wire.

pub const DISCOVERY_PORT: u16 = 6789;
pub const VOIP_PORT: u16 = 5060;
pub const CONTROL_PORT: u16 = 17722;
pub const AUDIO_PORT: u16 = 7078;
pub const VIDEO_PORT: u16 = 9078;

pub const NUMBER_STRLEN: usize = 12;

/// Default path MTU used to size UDP media relay buffers when a device does
/// not advertise its own.
pub const DEFAULT_MTU: usize = 1200;
