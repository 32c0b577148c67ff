//! A minimal RFC 3261 transaction engine: four transaction kinds (client
//! and server, INVITE and non-INVITE), driven by an external tick rather
//! than its own timers, and carrying one slot of caller-defined private
//! data per transaction — the two extra fields a bridge needs to find its
//! way back from a SIP transaction to the session it belongs to.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::message::SipMessage;

/// SIP Timer T1, the base retransmission interval every other SIP timer is
/// derived from.
pub const T1: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionKind {
    /// Invite Client Transaction.
    Ict,
    /// Invite Server Transaction.
    Ist,
    /// Non-Invite Client Transaction.
    Nict,
    /// Non-Invite Server Transaction.
    Nist,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Trying,
    Calling,
    Proceeding,
    Completed,
    Confirmed,
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionKey(pub String);

impl TransactionKey {
    pub fn new(call_id: &str, cseq: u32, method: &str) -> Self {
        TransactionKey(format!("{call_id}:{cseq}:{method}"))
    }
}

/// One in-flight transaction. `data` is the caller's private payload —
/// typically a back-pointer to a session plus whatever else it needs to
/// resume work when the transaction completes or is killed.
pub struct Transaction<T> {
    pub kind: TransactionKind,
    pub state: TransactionState,
    pub last_request: SipMessage,
    pub last_response: Option<SipMessage>,
    pub retransmit_count: u32,
    last_activity: Instant,
    pub data: T,
}

impl<T> Transaction<T> {
    fn new(kind: TransactionKind, request: SipMessage, data: T) -> Self {
        let state = match kind {
            TransactionKind::Ict => TransactionState::Calling,
            TransactionKind::Ist => TransactionState::Proceeding,
            TransactionKind::Nict | TransactionKind::Nist => TransactionState::Trying,
        };
        Transaction {
            kind,
            state,
            last_request: request,
            last_response: None,
            retransmit_count: 0,
            last_activity: Instant::now(),
            data,
        }
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Record a response and advance the state machine. Returns `true` if
    /// the transaction is now in a terminal or near-terminal state the
    /// engine should eventually reap.
    pub fn receive_response(&mut self, response: SipMessage) -> bool {
        self.touch();
        let code = response.status_code().unwrap_or(0);
        self.last_response = Some(response);
        match (self.kind, code) {
            (TransactionKind::Ict, 100..=199) => {
                self.state = TransactionState::Proceeding;
                false
            }
            (TransactionKind::Ict, 200..=299) => {
                self.state = TransactionState::Terminated;
                true
            }
            (TransactionKind::Ict, 300..=699) => {
                self.state = TransactionState::Completed;
                false
            }
            (TransactionKind::Nict, 100..=199) => {
                self.state = TransactionState::Proceeding;
                false
            }
            (TransactionKind::Nict, 200..=699) => {
                self.state = TransactionState::Completed;
                true
            }
            _ => false,
        }
    }

    /// Record that we sent a response (server transactions only).
    pub fn send_response(&mut self, response: SipMessage) -> bool {
        self.touch();
        let code = response.status_code().unwrap_or(0);
        self.last_response = Some(response);
        match (self.kind, code) {
            (TransactionKind::Ist, 100..=199) => {
                self.state = TransactionState::Proceeding;
                false
            }
            (TransactionKind::Ist, 200..=299) => {
                self.state = TransactionState::Terminated;
                true
            }
            (TransactionKind::Ist, 300..=699) => {
                self.state = TransactionState::Completed;
                false
            }
            (TransactionKind::Nist, 100..=199) => {
                self.state = TransactionState::Proceeding;
                false
            }
            (TransactionKind::Nist, 200..=699) => {
                self.state = TransactionState::Completed;
                true
            }
            _ => false,
        }
    }

    /// An ACK to a non-2xx response on an IST moves it to Confirmed, where
    /// it lingers to absorb retransmitted ACKs before finally terminating.
    pub fn receive_ack(&mut self) {
        self.touch();
        if self.kind == TransactionKind::Ist && self.state == TransactionState::Completed {
            self.state = TransactionState::Confirmed;
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.state == TransactionState::Terminated
    }

    fn timer_deadline(&self) -> Duration {
        match self.state {
            TransactionState::Completed => T1 * 32, // Timer D / Timer H, simplified
            TransactionState::Confirmed => T1 * 10, // Timer I, simplified
            _ => T1 * 64,                           // Timer B / Timer F
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.last_activity) >= self.timer_deadline()
    }
}

/// Owns every in-flight transaction for one SIP endpoint. The four RFC 3261
/// queues collapse into one map distinguished by `TransactionKind`; callers
/// that need to walk just the ICT/IST/NICT/NIST set can filter by kind.
pub struct TransactionEngine<T> {
    transactions: HashMap<TransactionKey, Transaction<T>>,
}

impl<T> Default for TransactionEngine<T> {
    fn default() -> Self {
        TransactionEngine {
            transactions: HashMap::new(),
        }
    }
}

impl<T> TransactionEngine<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(
        &mut self,
        key: TransactionKey,
        kind: TransactionKind,
        request: SipMessage,
        data: T,
    ) -> &mut Transaction<T> {
        self.transactions
            .entry(key)
            .or_insert_with(|| Transaction::new(kind, request, data))
    }

    pub fn get(&self, key: &TransactionKey) -> Option<&Transaction<T>> {
        self.transactions.get(key)
    }

    pub fn get_mut(&mut self, key: &TransactionKey) -> Option<&mut Transaction<T>> {
        self.transactions.get_mut(key)
    }

    /// Remove a transaction, handing back its private data so the caller
    /// can release whatever it references (e.g. drop a session refcount) —
    /// this is the "kill callback" of the reference implementation.
    pub fn kill(&mut self, key: &TransactionKey) -> Option<T> {
        self.transactions.remove(key).map(|t| t.data)
    }

    /// Sweep expired transactions, calling `on_kill` with each one's
    /// private data before it is dropped. Intended to be driven by the
    /// bridge's reactor tick.
    pub fn reap_expired(&mut self, mut on_kill: impl FnMut(TransactionKey, T)) {
        let now = Instant::now();
        let expired: Vec<TransactionKey> = self
            .transactions
            .iter()
            .filter(|(_, t)| t.is_terminated() || t.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            if let Some(t) = self.transactions.remove(&key) {
                on_kill(key, t.data);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{SipMessage, SipMethod};

    fn invite() -> SipMessage {
        SipMessage::new_request(SipMethod::Invite, "sip:1001-0203@192.0.2.1")
    }

    #[test]
    fn ist_terminates_on_2xx_response() {
        let mut engine: TransactionEngine<u32> = TransactionEngine::new();
        let key = TransactionKey::new("call1", 1, "INVITE");
        let t = engine.create(key.clone(), TransactionKind::Ist, invite(), 7);
        assert_eq!(t.state, TransactionState::Proceeding);
        let terminated = t.send_response(SipMessage::new_response(200, "OK"));
        assert!(terminated);
        assert_eq!(engine.get(&key).unwrap().state, TransactionState::Terminated);
    }

    #[test]
    fn ist_waits_in_completed_for_ack_after_non_2xx() {
        let mut engine: TransactionEngine<u32> = TransactionEngine::new();
        let key = TransactionKey::new("call1", 1, "INVITE");
        let t = engine.create(key.clone(), TransactionKind::Ist, invite(), 7);
        t.send_response(SipMessage::new_response(404, "Not Found"));
        assert_eq!(engine.get(&key).unwrap().state, TransactionState::Completed);
        engine.get_mut(&key).unwrap().receive_ack();
        assert_eq!(engine.get(&key).unwrap().state, TransactionState::Confirmed);
    }

    #[test]
    fn kill_returns_private_data() {
        let mut engine: TransactionEngine<u32> = TransactionEngine::new();
        let key = TransactionKey::new("call1", 1, "INVITE");
        engine.create(key.clone(), TransactionKind::Ist, invite(), 42);
        assert_eq!(engine.kill(&key), Some(42));
        assert!(engine.get(&key).is_none());
    }

    #[test]
    fn reap_expired_invokes_callback_for_terminated() {
        let mut engine: TransactionEngine<u32> = TransactionEngine::new();
        let key = TransactionKey::new("call1", 1, "INVITE");
        let t = engine.create(key.clone(), TransactionKind::Ist, invite(), 9);
        t.send_response(SipMessage::new_response(200, "OK"));
        let mut killed = Vec::new();
        engine.reap_expired(|k, data| killed.push((k, data)));
        assert_eq!(killed.len(), 1);
        assert_eq!(killed[0].1, 9);
        assert!(engine.is_empty());
    }
}
