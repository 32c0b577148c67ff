//! Relays datagrams unchanged between two UDP sockets — one media leg
//! (audio or video) of an active call. One forwarder task runs per leg per
//! session.

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Two already-connected UDP sockets and the buffer size to shuttle
/// datagrams between them until told to stop.
pub struct Forwarder {
    pub socket1: UdpSocket,
    pub socket2: UdpSocket,
    pub mtu: usize,
}

impl Forwarder {
    pub fn new(socket1: UdpSocket, socket2: UdpSocket, mtu: usize) -> Self {
        Forwarder {
            socket1,
            socket2,
            mtu,
        }
    }

    /// Relay datagrams both ways until `stop` is signalled. Each side reads
    /// whatever came in and forwards it to the other side as-is.
    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        let mut buf1 = vec![0u8; self.mtu];
        let mut buf2 = vec![0u8; self.mtu];
        loop {
            tokio::select! {
                _ = stop.changed() => {
                    if *stop.borrow() {
                        debug!("forwarder stopping");
                        return;
                    }
                }
                res = self.socket1.recv(&mut buf1) => {
                    match res {
                        Ok(n) => {
                            if let Err(e) = self.socket2.send(&buf1[..n]).await {
                                warn!(error = %e, "forwarder: socket2 send failed");
                            }
                        }
                        Err(e) => warn!(error = %e, "forwarder: socket1 recv failed"),
                    }
                }
                res = self.socket2.recv(&mut buf2) => {
                    match res {
                        Ok(n) => {
                            if let Err(e) = self.socket1.send(&buf2[..n]).await {
                                warn!(error = %e, "forwarder: socket1 send failed");
                            }
                        }
                        Err(e) => warn!(error = %e, "forwarder: socket2 recv failed"),
                    }
                }
            }
        }
    }
}
