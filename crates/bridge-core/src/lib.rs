//! The bridge itself: configuration, session table, SIP transaction
//! engine, media forwarding and the handlers that translate between a
//! LEELEN dialog and a SIP dialog.

pub mod bridge;
pub mod config;
pub mod error;
pub mod forwarder;
pub mod manager;
pub mod reactor;
pub mod session;
pub mod transaction_data;
pub mod uac;
pub mod uas;

pub use bridge::{Bridge, RegisteredClient};
pub use config::{Config, DeviceType};
pub use error::{BridgeError, BridgeResult};
pub use manager::SessionManager;
pub use session::{Session, SipLegState};
