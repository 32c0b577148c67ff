//! The session table: every active call, indexed by LEELEN dialog id and,
//! once a SIP dialog exists, by SIP Call-ID too. A `DashMap` stands in for
//! the reference implementation's array-plus-mutex — the concurrency
//! primitive the rest of the pack reaches for when many threads touch one
//! collection.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::session::Session;

#[derive(Default)]
pub struct SessionManager {
    by_dialog_id: DashMap<u32, Arc<Session>>,
    call_id_to_dialog: DashMap<String, u32>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, dialog_id: Option<u32>, timeout: Duration, local_addr: IpAddr) -> Arc<Session> {
        let session = Arc::new(Session::new(dialog_id, timeout, local_addr));
        self.by_dialog_id.insert(session.dialog_id(), session.clone());
        session
    }

    pub fn get(&self, dialog_id: u32) -> Option<Arc<Session>> {
        self.by_dialog_id.get(&dialog_id).map(|e| e.clone())
    }

    pub fn get_by_call_id(&self, call_id: &str) -> Option<Arc<Session>> {
        let dialog_id = *self.call_id_to_dialog.get(call_id)?;
        self.get(dialog_id)
    }

    pub fn link_call_id(&self, call_id: String, dialog_id: u32) {
        self.call_id_to_dialog.insert(call_id, dialog_id);
    }

    pub fn remove(&self, dialog_id: u32) -> Option<Arc<Session>> {
        let removed = self.by_dialog_id.remove(&dialog_id).map(|(_, v)| v);
        self.call_id_to_dialog.retain(|_, v| *v != dialog_id);
        removed
    }

    /// A point-in-time copy of every active session, for the reactor's
    /// periodic timeout sweep.
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.by_dialog_id.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.by_dialog_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_dialog_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn create_then_find_round_trips() {
        let mgr = SessionManager::new();
        let session = mgr.create(Some(5), Duration::from_millis(500), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(session.dialog_id(), 5);
        assert!(mgr.get(5).is_some());
    }

    #[test]
    fn remove_drops_call_id_link() {
        let mgr = SessionManager::new();
        mgr.create(Some(5), Duration::from_millis(500), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        mgr.link_call_id("call-1".to_string(), 5);
        assert!(mgr.get_by_call_id("call-1").is_some());
        mgr.remove(5);
        assert!(mgr.get_by_call_id("call-1").is_none());
    }
}
