use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tracing::warn;

use crate::error::CoreError;

/// Receive buffer default — small on purpose. A consistent backlog of more
/// than ~10-20ms worth of data is a signal to shrink it further; the
/// kernel buffer must never become a hidden jitter buffer.
pub const DEFAULT_RECV_BUFFER_BYTES: usize = 64 * 1024;
/// Send buffer default.
pub const DEFAULT_SEND_BUFFER_BYTES: usize = 128 * 1024;

/// Outcome of a non-blocking send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent(usize),
    /// The kernel couldn't accept the datagram right now. Callers treat this
    /// as a drop signal, never as a wait point.
    Backpressure,
}

/// The single non-blocking UDP socket shared by STUN, punching, keepalives,
/// video, and control for the whole session. One socket is mandatory:
/// STUN and hole punching must discover the same public endpoint the video
/// will use.
pub struct SocketEndpoint {
    socket: UdpSocket,
}

impl SocketEndpoint {
    /// Bind a non-blocking UDP socket with explicit (small) kernel buffers.
    pub fn bind(
        addr: SocketAddr,
        recv_buffer_bytes: usize,
        send_buffer_bytes: usize,
    ) -> Result<Self, CoreError> {
        let domain = if addr.is_ipv4() {
            socket2::Domain::IPV4
        } else {
            socket2::Domain::IPV6
        };
        let sock = socket2::Socket::new(domain, socket2::Type::DGRAM, Some(socket2::Protocol::UDP))?;
        if let Err(e) = sock.set_recv_buffer_size(recv_buffer_bytes) {
            warn!("failed to set UDP recv buffer size: {e}");
        }
        if let Err(e) = sock.set_send_buffer_size(send_buffer_bytes) {
            warn!("failed to set UDP send buffer size: {e}");
        }
        sock.bind(&addr.into())?;
        sock.set_nonblocking(true)?;

        let std_sock: std::net::UdpSocket = sock.into();
        let socket = UdpSocket::from_std(std_sock)?;
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, CoreError> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive one datagram. Returns `Ok(None)` if nothing is ready within
    /// `poll_timeout` — the caller's "WOULD_BLOCK" case.
    pub async fn recv_one(
        &self,
        buf: &mut [u8],
        poll_timeout: std::time::Duration,
    ) -> Result<Option<(usize, SocketAddr)>, CoreError> {
        match tokio::time::timeout(poll_timeout, self.socket.recv_from(buf)).await {
            Ok(Ok(result)) => Ok(Some(result)),
            Ok(Err(e)) => Err(e.into()),
            Err(_elapsed) => Ok(None),
        }
    }

    /// Send one datagram. Kernel send-buffer exhaustion (`WouldBlock`) and
    /// any I/O error are both reported as [`SendOutcome::Backpressure`] —
    /// the framer drops and moves on rather than retrying.
    pub async fn send_to(&self, bytes: &[u8], dest: SocketAddr) -> SendOutcome {
        match self.socket.send_to(bytes, dest).await {
            Ok(n) => SendOutcome::Sent(n),
            Err(e) => {
                warn!(%dest, "UDP send failed, treating as backpressure: {e}");
                SendOutcome::Backpressure
            }
        }
    }
}
