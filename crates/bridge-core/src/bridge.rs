//! Shared state for one running bridge instance: configuration, the
//! session table, the SIP transaction engine and the sockets both
//! protocols talk over.

use std::net::SocketAddr;
use std::sync::Arc;

use leelen_discovery::DualStackDiscovery;
use parking_lot::Mutex;
use sip_proto::{SipUri, TransactionEngine};
use tokio::net::UdpSocket;

use crate::config::Config;
use crate::manager::SessionManager;
use crate::transaction_data::TransactionData;

/// A SIP client that has `REGISTER`ed with this bridge — the far end of
/// every LEELEN-device-originated call.
#[derive(Clone)]
pub struct RegisteredClient {
    pub contact: SipUri,
    pub addr: SocketAddr,
}

pub struct Bridge {
    pub config: Config,
    pub sessions: SessionManager,
    pub discovery: Arc<DualStackDiscovery>,
    pub transactions: Mutex<TransactionEngine<TransactionData>>,
    pub sip_socket: UdpSocket,
    pub leelen_socket: UdpSocket,
    registered_client: Mutex<Option<RegisteredClient>>,
}

impl Bridge {
    pub fn new(
        config: Config,
        discovery: Arc<DualStackDiscovery>,
        sip_socket: UdpSocket,
        leelen_socket: UdpSocket,
    ) -> Arc<Self> {
        Arc::new(Bridge {
            config,
            sessions: SessionManager::new(),
            discovery,
            transactions: Mutex::new(TransactionEngine::new()),
            sip_socket,
            leelen_socket,
            registered_client: Mutex::new(None),
        })
    }

    pub async fn send_sip(&self, bytes: &[u8], dest: SocketAddr) -> std::io::Result<()> {
        self.sip_socket.send_to(bytes, dest).await?;
        Ok(())
    }

    pub async fn send_leelen(&self, bytes: &[u8], dest: SocketAddr) -> std::io::Result<()> {
        self.leelen_socket.send_to(bytes, dest).await?;
        Ok(())
    }

    pub fn registered_client(&self) -> Option<RegisteredClient> {
        self.registered_client.lock().clone()
    }

    pub fn set_registered_client(&self, client: Option<RegisteredClient>) {
        *self.registered_client.lock() = client;
    }
}
