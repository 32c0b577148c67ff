//! Core, protocol-only building blocks for the LEELEN intercom bridge:
//! phone numbers, the LEELEN VoIP wire format, dual-stack address helpers
//! and the per-call dialog state machine. The one exception to "no I/O" is
//! `net::bind_udp`, a shared socket-option helper; actually driving a
//! socket belongs to `leelen-discovery` and `bridge-core`.

pub mod dialog;
pub mod error;
pub mod family;
pub mod net;
pub mod number;
pub mod wire;

pub use dialog::{LeelenDialog, LeelenDialogState};
pub use error::{CoreError, CoreResult};
pub use number::{LeelenNumber, NumberError};
pub use wire::{LeelenCode, LeelenMessage};
