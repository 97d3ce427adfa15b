use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{ReceiverError, ReceiverResult};
use crate::pool::WorkerPool;

const RECV_BUFFER_SIZE: usize = 8 * 1024 * 1024;

/// Binds `0.0.0.0:port` with address reuse and joins `group` on `interface`.
pub fn bind_multicast(group: Ipv4Addr, port: u16, interface: Ipv4Addr) -> ReceiverResult<UdpSocket> {
    let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    if let Err(e) = socket.set_recv_buffer_size(RECV_BUFFER_SIZE) {
        warn!(error = %e, "could not enlarge receive buffer");
    }
    socket
        .bind(&addr.into())
        .map_err(|source| ReceiverError::Bind { addr, source })?;
    socket
        .join_multicast_v4(&group, &interface)
        .map_err(|source| ReceiverError::JoinGroup { group, source })?;
    socket.set_nonblocking(true)?;
    let std_socket: std::net::UdpSocket = socket.into();
    Ok(UdpSocket::from_std(std_socket)?)
}

pub async fn bind_unicast(addr: SocketAddr) -> ReceiverResult<UdpSocket> {
    UdpSocket::bind(addr)
        .await
        .map_err(|source| ReceiverError::Bind { addr, source })
}

/// Reads datagrams until cancelled and hands them to the worker pool.
///
/// Receive errors are logged and the loop continues.
pub async fn run_listener(
    name: &'static str,
    socket: UdpSocket,
    max_packet_size: usize,
    pool: WorkerPool,
    cancel: CancellationToken,
) {
    let local = socket.local_addr().ok();
    info!(listener = name, addr = ?local, "listener started");
    let mut buf = vec![0u8; max_packet_size];
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            r = socket.recv_from(&mut buf) => r,
        };
        match received {
            Ok((len, _peer)) => {
                let datagram = Bytes::copy_from_slice(&buf[..len]);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    sent = pool.submit(datagram) => {
                        if !sent {
                            break;
                        }
                    }
                }
            }
            Err(e) => warn!(listener = name, error = %e, "receive failed"),
        }
    }
    info!(listener = name, "listener stopped");
}
