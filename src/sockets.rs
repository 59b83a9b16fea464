//! The two UDP endpoints backing one query cycle: a multicast-joined
//! receiver on port 5353 and an ephemeral unicast socket for sending the
//! query and catching unicast replies.

use std::net::{Ipv4Addr, SocketAddrV4};

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Type};
use tokio::net::UdpSocket;

pub(crate) const MDNS_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);
pub(crate) const MDNS_PORT: u16 = 5353;
/// The multicast endpoint queries are sent to.
pub(crate) const MDNS_ADDR: SocketAddrV4 = SocketAddrV4::new(MDNS_GROUP, MDNS_PORT);

fn create_multicast_socket() -> Result<std::net::UdpSocket> {
    let sock = socket2::Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    sock.set_reuse_address(true)?;
    #[cfg(not(target_os = "windows"))]
    sock.set_reuse_port(true)?;
    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, MDNS_PORT);
    sock.bind(&socket2::SockAddr::from(addr))
        .with_context(|| format!("bind {}", addr))?;
    join_group(&sock, &MDNS_GROUP)?;
    sock.set_nonblocking(true)?;
    Ok(sock.into())
}

/// Join on the unspecified interface; some hosts refuse that, so fall back
/// to joining on each non-loopback IPv4 interface address until one takes.
fn join_group(sock: &socket2::Socket, group: &Ipv4Addr) -> Result<()> {
    let unspecified = sock.join_multicast_v4(group, &Ipv4Addr::UNSPECIFIED);
    if unspecified.is_ok() {
        return Ok(());
    }
    log::debug!("multicast join on 0.0.0.0 refused, trying per-interface");
    if let Ok(ifaces) = if_addrs::get_if_addrs() {
        for iface in ifaces {
            match iface.ip() {
                std::net::IpAddr::V4(ip) if !ip.is_loopback() => {
                    if sock.join_multicast_v4(group, &ip).is_ok() {
                        return Ok(());
                    }
                }
                _ => {}
            }
        }
    }
    unspecified.with_context(|| format!("join multicast group {}", group))?;
    Ok(())
}

/// One cycle's sockets. Dropping the pair closes both endpoints, so every
/// exit path out of a cycle releases the port-5353 binding.
pub(crate) struct SocketPair {
    pub multicast: UdpSocket,
    pub unicast: UdpSocket,
}

impl SocketPair {
    pub async fn open() -> Result<SocketPair> {
        let multicast = UdpSocket::from_std(create_multicast_socket()?)
            .context("wrap multicast socket")?;
        let unicast = UdpSocket::bind("0.0.0.0:0")
            .await
            .context("bind unicast socket")?;
        Ok(SocketPair { multicast, unicast })
    }
}
