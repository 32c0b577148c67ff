//! Multicast discovery of LEELEN devices: soliciting a peer's current
//! address before placing a call to it, and answering solicitations for
//! this device.

pub mod advertiser;
pub mod discovery;

pub use advertiser::Advertiser;
pub use discovery::{DiscoveredHost, DiscoveryEngine, DiscoveryError, DualStackDiscovery};
