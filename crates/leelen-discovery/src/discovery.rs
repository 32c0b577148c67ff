//! Multicast discovery: soliciting a peer's address (the active side, used
//! when a SIP caller invites a LEELEN number the bridge hasn't talked to
//! yet) and answering solicitations for this device (the passive side).

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use leelen_core::family::DISCOVERY_PORT;
use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::advertiser::{is_advertisement, Advertiser};

pub const DISCOVERY_GROUP_V4: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 1);
pub const DISCOVERY_GROUP_V6: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 1);
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("discovery timed out")]
    Timeout,
    #[error("advertisement from {0} did not match the requested number")]
    Mismatch(SocketAddr),
}

/// The result of a successful active discovery: the peer's reported
/// address, device type and description.
#[derive(Debug, Clone)]
pub struct DiscoveredHost {
    pub addr: IpAddr,
    pub device_type: u8,
    pub desc: String,
}

fn parse_advertisement(msg: &str) -> Option<DiscoveredHost> {
    let (addr_part, rest) = msg.split_once('?')?;
    let (type_part, desc) = rest.split_once('*')?;
    Some(DiscoveredHost {
        addr: addr_part.parse().ok()?,
        device_type: type_part.parse().ok()?,
        desc: desc.to_string(),
    })
}

/// Owns the discovery sockets for one address family and drives both the
/// active (`discover`) and passive (`serve`) sides of the protocol.
///
/// Discovery is serialised per engine (only one outstanding `discover()` at
/// a time) the same way the reference implementation guards its single
/// blocking discovery call with a mutex.
pub struct DiscoveryEngine {
    socket: UdpSocket,
    group: IpAddr,
    port: u16,
    inflight: Mutex<()>,
}

impl DiscoveryEngine {
    pub async fn bind_v4(bind_addr: Ipv4Addr, port: u16) -> Result<Self, DiscoveryError> {
        let socket = new_multicast_socket(Domain::IPV4)?;
        socket.set_reuse_address(true)?;
        socket.bind(&SocketAddr::new(IpAddr::V4(bind_addr), port).into())?;
        socket.join_multicast_v4(&DISCOVERY_GROUP_V4, &bind_addr)?;
        socket.set_nonblocking(true)?;
        Ok(DiscoveryEngine {
            socket: UdpSocket::from_std(socket.into())?,
            group: IpAddr::V4(DISCOVERY_GROUP_V4),
            port,
            inflight: Mutex::new(()),
        })
    }

    pub async fn bind_v6(interface_index: u32, port: u16) -> Result<Self, DiscoveryError> {
        let socket = new_multicast_socket(Domain::IPV6)?;
        socket.set_only_v6(true)?;
        socket.set_reuse_address(true)?;
        socket.bind(&SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port).into())?;
        socket.join_multicast_v6(&DISCOVERY_GROUP_V6, interface_index)?;
        socket.set_nonblocking(true)?;
        Ok(DiscoveryEngine {
            socket: UdpSocket::from_std(socket.into())?,
            group: IpAddr::V6(DISCOVERY_GROUP_V6),
            port,
            inflight: Mutex::new(()),
        })
    }

    /// Send a solicitation for `phone` and wait up to `timeout_dur` for a
    /// matching advertisement. Blocks other concurrent callers of this
    /// engine until it returns, mirroring the single in-flight discovery of
    /// the reference implementation.
    pub async fn discover(
        &self,
        phone: &str,
        timeout_dur: Duration,
    ) -> Result<DiscoveredHost, DiscoveryError> {
        let _guard = self.inflight.lock().await;
        self.socket
            .send_to(phone.as_bytes(), SocketAddr::new(self.group, self.port))
            .await?;

        let deadline = timeout_dur;
        let mut buf = [0u8; 1200];
        let result = timeout(deadline, async {
            loop {
                let (n, from) = self.socket.recv_from(&mut buf).await?;
                let text = String::from_utf8_lossy(&buf[..n]);
                if !is_advertisement(&text) {
                    continue;
                }
                match parse_advertisement(&text) {
                    Some(host) => return Ok(host),
                    None => {
                        warn!(%from, msg = %text, "malformed discovery advertisement");
                        continue;
                    }
                }
            }
        })
        .await;

        match result {
            Ok(inner) => inner,
            Err(_) => Err(DiscoveryError::Timeout),
        }
    }

    /// Run the passive side forever: answer solicitations this device
    /// should reply to. Intended to be spawned as its own task.
    pub async fn serve(self: Arc<Self>, advertiser: Arc<Advertiser>) {
        let mut buf = [0u8; 1200];
        loop {
            let (n, src) = match self.socket.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "discovery socket recv failed");
                    continue;
                }
            };
            let text = String::from_utf8_lossy(&buf[..n]).to_string();
            let local_addr = self
                .socket
                .local_addr()
                .map(|a| a.ip())
                .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
            debug!(%src, msg = %text, "discovery message received");
            if let Some(reply) = advertiser.receive(&text, src, local_addr) {
                if let Err(e) = self.socket.send_to(reply.as_bytes(), src).await {
                    warn!(error = %e, %src, "failed to send discovery reply");
                }
            }
        }
    }
}

fn new_multicast_socket(domain: Domain) -> std::io::Result<Socket> {
    Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
}

/// Serves and solicits discovery on both address families at once, the way
/// the reference implementation's mainloop polls `sockfd` and `sockfd6`
/// together. Either family can be absent (e.g. no IPv6 route on this host)
/// without the other being affected.
pub struct DualStackDiscovery {
    v4: Option<Arc<DiscoveryEngine>>,
    v6: Option<Arc<DiscoveryEngine>>,
}

impl DualStackDiscovery {
    /// Bind whichever families are available. At least one must succeed.
    pub async fn bind(bind_v4: Ipv4Addr, v6_interface_index: u32, port: u16) -> Result<Self, DiscoveryError> {
        let v4 = match DiscoveryEngine::bind_v4(bind_v4, port).await {
            Ok(engine) => Some(Arc::new(engine)),
            Err(e) => {
                warn!(error = %e, "IPv4 discovery socket unavailable, continuing on IPv6 only");
                None
            }
        };
        let v6 = match DiscoveryEngine::bind_v6(v6_interface_index, port).await {
            Ok(engine) => Some(Arc::new(engine)),
            Err(e) => {
                warn!(error = %e, "IPv6 discovery socket unavailable, continuing on IPv4 only");
                None
            }
        };
        if v4.is_none() && v6.is_none() {
            return Err(DiscoveryError::Io(std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                "neither IPv4 nor IPv6 discovery socket could be bound",
            )));
        }
        Ok(DualStackDiscovery { v4, v6 })
    }

    /// Solicit `phone` on every bound family, returning whichever engine
    /// answers first.
    pub async fn discover(&self, phone: &str, timeout_dur: Duration) -> Result<DiscoveredHost, DiscoveryError> {
        match (&self.v4, &self.v6) {
            (Some(v4), Some(v6)) => {
                tokio::select! {
                    r = v4.discover(phone, timeout_dur) => r,
                    r = v6.discover(phone, timeout_dur) => r,
                }
            }
            (Some(v4), None) => v4.discover(phone, timeout_dur).await,
            (None, Some(v6)) => v6.discover(phone, timeout_dur).await,
            (None, None) => unreachable!("DualStackDiscovery::bind guarantees at least one family"),
        }
    }

    /// Run the passive side on every bound family, forever.
    pub async fn serve(self: Arc<Self>, advertiser: Arc<Advertiser>) {
        let v4 = self.v4.clone().map(|e| tokio::spawn(e.serve(advertiser.clone())));
        let v6 = self.v6.clone().map(|e| tokio::spawn(e.serve(advertiser)));
        match (v4, v6) {
            (Some(v4), Some(v6)) => {
                let _ = tokio::join!(v4, v6);
            }
            (Some(task), None) | (None, Some(task)) => {
                let _ = task.await;
            }
            (None, None) => unreachable!("DualStackDiscovery::bind guarantees at least one family"),
        }
    }
}

/// A one-shot discovery request, for callers that want a future they can
/// cancel independently of the shared engine (e.g. an INVITE worker that
/// gives up when its transaction is cancelled).
pub async fn discover_once(
    engine: Arc<DiscoveryEngine>,
    phone: String,
    timeout_dur: Duration,
) -> Result<DiscoveredHost, DiscoveryError> {
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let result = engine.discover(&phone, timeout_dur).await;
        let _ = tx.send(result);
    });
    rx.await.unwrap_or(Err(DiscoveryError::Timeout))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_advertisement_format() {
        let host = parse_advertisement("192.0.2.1?4*Front Door").unwrap();
        assert_eq!(host.addr, "192.0.2.1".parse::<IpAddr>().unwrap());
        assert_eq!(host.device_type, 4);
        assert_eq!(host.desc, "Front Door");
    }

    #[test]
    fn rejects_malformed_advertisement() {
        assert!(parse_advertisement("not an advertisement").is_none());
        assert!(parse_advertisement("192.0.2.1?notanumber*x").is_none());
    }
}
