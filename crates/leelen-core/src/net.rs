//! Dual-stack address helpers: the small pieces of IPv4/IPv6 bookkeeping the
//! bridge needs everywhere else — URL-like parsing/formatting, v4-mapped
//! unwrapping, CIDR matching, and the socket options that let a single
//! listening socket learn which of its own local addresses a packet arrived
//! on.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use socket2::Socket;

use crate::error::{CoreError, CoreResult};

/// Parse `host:port` or `[v6host]:port`, falling back to `default_port` when
/// no port is given.
pub fn parse_url_like(s: &str, default_port: u16) -> CoreResult<SocketAddr> {
    let s = s.trim();
    if let Some(rest) = s.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| CoreError::InvalidAddress(s.to_string()))?;
        let ip: Ipv6Addr = host
            .parse()
            .map_err(|_| CoreError::InvalidAddress(s.to_string()))?;
        let port = match tail.strip_prefix(':') {
            Some(p) => p
                .parse()
                .map_err(|_| CoreError::InvalidAddress(s.to_string()))?,
            None => default_port,
        };
        return Ok(SocketAddr::new(IpAddr::V6(ip), port));
    }

    // Plain IPv6 literal with no brackets and no port (e.g. "ff02::1").
    if s.matches(':').count() > 1 {
        let ip: Ipv6Addr = s
            .parse()
            .map_err(|_| CoreError::InvalidAddress(s.to_string()))?;
        return Ok(SocketAddr::new(IpAddr::V6(ip), default_port));
    }

    match s.rsplit_once(':') {
        Some((host, port)) => {
            let ip: IpAddr = host
                .parse()
                .map_err(|_| CoreError::InvalidAddress(s.to_string()))?;
            let port = port
                .parse()
                .map_err(|_| CoreError::InvalidAddress(s.to_string()))?;
            Ok(SocketAddr::new(ip, port))
        }
        None => {
            let ip: IpAddr = s
                .parse()
                .map_err(|_| CoreError::InvalidAddress(s.to_string()))?;
            Ok(SocketAddr::new(ip, default_port))
        }
    }
}

/// The inverse of [`parse_url_like`]: brackets an IPv6 host, leaves IPv4
/// bare.
pub fn format_url_like(addr: &SocketAddr) -> String {
    match addr {
        SocketAddr::V4(a) => format!("{}:{}", a.ip(), a.port()),
        SocketAddr::V6(a) => format!("[{}]:{}", a.ip(), a.port()),
    }
}

/// Strip a v4-mapped (`::ffff:a.b.c.d`) wrapper, if present.
pub fn unmap(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    }
}

/// `true` when the two addresses name the same host once v4-mapped
/// addresses are unwrapped.
pub fn same_host(a: IpAddr, b: IpAddr) -> bool {
    unmap(a) == unmap(b)
}

pub fn to_v4_mapped(addr: Ipv4Addr) -> Ipv6Addr {
    addr.to_ipv6_mapped()
}

/// A `network/prefix_len` block, for the "reply only to requests from this
/// range" discovery policy.
#[derive(Debug, Clone, Copy)]
pub struct CidrBlock {
    network: IpAddr,
    prefix_len: u8,
}

impl CidrBlock {
    pub fn parse(s: &str) -> CoreResult<Self> {
        let (addr, len) = s
            .split_once('/')
            .ok_or_else(|| CoreError::InvalidAddress(s.to_string()))?;
        let network: IpAddr = addr
            .parse()
            .map_err(|_| CoreError::InvalidAddress(s.to_string()))?;
        let prefix_len: u8 = len
            .parse()
            .map_err(|_| CoreError::InvalidAddress(s.to_string()))?;
        let max = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if prefix_len > max {
            return Err(CoreError::InvalidAddress(s.to_string()));
        }
        Ok(CidrBlock {
            network,
            prefix_len,
        })
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        let addr = unmap(addr);
        match (unmap(self.network), addr) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = mask_u32(self.prefix_len);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = mask_u128(self.prefix_len);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

fn mask_u32(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        u32::MAX << (32 - prefix_len as u32)
    }
}

fn mask_u128(prefix_len: u8) -> u128 {
    if prefix_len == 0 {
        0
    } else {
        u128::MAX << (128 - prefix_len as u32)
    }
}

/// Bind a UDP socket with `SO_REUSEADDR` and, for IPv6, `IPV6_V6ONLY`, then
/// hand it to tokio. `bind_device` is the interface name to pin the socket
/// to via `SO_BINDTODEVICE` when a scope was resolved from the CLI/config
/// (spec §6.1).
pub async fn bind_udp(addr: SocketAddr, bind_device: Option<&str>) -> std::io::Result<tokio::net::UdpSocket> {
    let domain = if addr.is_ipv6() { socket2::Domain::IPV6 } else { socket2::Domain::IPV4 };
    let socket = Socket::new(domain, socket2::Type::DGRAM, Some(socket2::Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    if addr.is_ipv6() {
        socket.set_only_v6(true)?;
    }
    #[cfg(target_os = "linux")]
    if let Some(iface) = bind_device {
        socket.bind_device(Some(iface.as_bytes()))?;
    }
    #[cfg(not(target_os = "linux"))]
    let _ = bind_device;
    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;
    tokio::net::UdpSocket::from_std(socket.into())
}

/// Enable `IP_PKTINFO` (v4) / `IPV6_RECVPKTINFO` (v6) so a `recvmsg` on this
/// socket can report which local address a datagram was sent to — needed to
/// answer multicast discovery requests from the interface they arrived on.
#[cfg(unix)]
pub fn enable_pktinfo(socket: &Socket, is_v6: bool) -> std::io::Result<()> {
    use std::os::fd::AsRawFd;

    let fd = socket.as_raw_fd();
    let one: libc::c_int = 1;
    let (level, name) = if is_v6 {
        (libc::IPPROTO_IPV6, libc::IPV6_RECVPKTINFO)
    } else {
        (libc::IPPROTO_IP, libc::IP_PKTINFO)
    };
    let ret = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &one as *const _ as *const libc::c_void,
            std::mem::size_of_val(&one) as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_v4_host_port() {
        let addr = parse_url_like("192.0.2.1:5060", 5060).unwrap();
        assert_eq!(addr, "192.0.2.1:5060".parse().unwrap());
    }

    #[test]
    fn parses_v4_host_without_port() {
        let addr = parse_url_like("192.0.2.1", 6789).unwrap();
        assert_eq!(addr.port(), 6789);
    }

    #[test]
    fn parses_bracketed_v6() {
        let addr = parse_url_like("[::1]:5060", 0).unwrap();
        assert_eq!(addr, "[::1]:5060".parse().unwrap());
    }

    #[test]
    fn parses_bare_v6_literal() {
        let addr = parse_url_like("ff02::1", 6789).unwrap();
        assert_eq!(addr.ip(), "ff02::1".parse::<IpAddr>().unwrap());
        assert_eq!(addr.port(), 6789);
    }

    #[test]
    fn format_brackets_v6_only() {
        let v4: SocketAddr = "192.0.2.1:80".parse().unwrap();
        let v6: SocketAddr = "[::1]:80".parse().unwrap();
        assert_eq!(format_url_like(&v4), "192.0.2.1:80");
        assert_eq!(format_url_like(&v6), "[::1]:80");
    }

    #[test]
    fn same_host_unwraps_v4_mapped() {
        let mapped: IpAddr = "::ffff:192.0.2.1".parse().unwrap();
        let plain: IpAddr = "192.0.2.1".parse().unwrap();
        assert!(same_host(mapped, plain));
    }

    #[test]
    fn cidr_contains_v4() {
        let block = CidrBlock::parse("192.0.2.0/24").unwrap();
        assert!(block.contains("192.0.2.42".parse().unwrap()));
        assert!(!block.contains("192.0.3.1".parse().unwrap()));
    }

    #[test]
    fn cidr_contains_v6() {
        let block = CidrBlock::parse("2001:db8::/32").unwrap();
        assert!(block.contains("2001:db8::1".parse().unwrap()));
        assert!(!block.contains("2001:db9::1".parse().unwrap()));
    }
}
