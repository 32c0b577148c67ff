//! A small, self-contained SIP/SDP toolkit: message parsing, a handful of
//! URI helpers and a transaction engine. Scoped to exactly what a
//! LEELEN-to-SIP bridge needs, not a general-purpose SIP stack.

pub mod error;
pub mod message;
pub mod parser;
pub mod sdp;
pub mod transaction;
pub mod uri;

pub use error::{SipError, SipResult};
pub use message::{Header, SipMessage, SipMethod, StartLine};
pub use sdp::{MediaDescription, MediaKind, SessionDescription};
pub use transaction::{Transaction, TransactionEngine, TransactionKey, TransactionKind, TransactionState};
pub use uri::SipUri;
