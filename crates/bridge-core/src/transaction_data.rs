//! The two fields every SIP transaction in this bridge carries privately:
//! a reference to the session it belongs to, and which address family to
//! send its messages out on.

use std::sync::Arc;

use crate::session::Session;

#[derive(Clone)]
pub struct TransactionData {
    pub session: Option<Arc<Session>>,
    pub out_is_v6: bool,
}

impl TransactionData {
    pub fn new(session: Option<Arc<Session>>, out_is_v6: bool) -> Self {
        TransactionData { session, out_is_v6 }
    }
}
