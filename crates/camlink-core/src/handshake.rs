//! Drives a [`Session`] from `IDLE` through to `STREAMING`: STUN gather,
//! signaling exchange, and simultaneous-open hole punching. Shared by
//! the sender and receiver engines since the handshake itself has no
//! role-specific behavior beyond the `role` byte carried on PROBE and the
//! published `SignalingRecord`.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use camlink_proto::{Message, Probe};
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::session::{AcceptedProbe, PeerCandidates, Session, SessionState, ordered_candidate_list};
use crate::signaling::{SignalingChannel, SignalingRecord};
use crate::socket::SocketEndpoint;
use crate::stun;

/// How long to wait for the peer's `SignalingRecord` before giving up; the
/// STUN gather timeout doubles as a reasonable bound here since both phases
/// are part of the same pre-punching setup window.
pub const SIGNALING_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HandshakeOutcome {
    pub peer_endpoint: SocketAddr,
    pub local_srflx: SocketAddr,
}

/// Run the full handshake against a real signaling channel and STUN server
/// list, driving `session` from `IDLE` to `STREAMING`.
pub async fn run_handshake(
    session: &mut Session,
    socket: &SocketEndpoint,
    signaling: &mut dyn SignalingChannel,
    stun_servers: &[SocketAddr],
    stun_attempts: u32,
    stun_attempt_timeout: Duration,
) -> Result<HandshakeOutcome, CoreError> {
    session.start();
    session.on_signaling_ready();

    let srflx = match stun::discover_public_endpoint(
        socket,
        stun_servers,
        stun_attempts,
        stun_attempt_timeout,
    )
    .await
    {
        Ok(addr) => addr,
        Err(e) => {
            session.on_stun_failed();
            return Err(e);
        }
    };
    if !session.on_stun_success() {
        return Err(CoreError::StunTimeout);
    }

    let local_endpoint = socket.local_addr().ok();
    let own_record = SignalingRecord {
        session_id: session.session_id,
        nonce: session.nonce,
        role: session.role,
        srflx_endpoint: srflx,
        local_endpoint,
        hello: None,
    };
    signaling
        .publish(&own_record)
        .map_err(|e| CoreError::InvalidAddress(e.to_string()))?;

    let peer_record = wait_for_peer_record(signaling, SIGNALING_EXCHANGE_TIMEOUT).await?;
    let remote = PeerCandidates {
        local: peer_record.local_endpoint,
        srflx: Some(peer_record.srflx_endpoint),
    };

    session.on_candidates_exchanged();
    let candidates = ordered_candidate_list(local_endpoint, &remote);

    run_punch_loop(session, socket, &candidates, peer_record.nonce).await?;

    session.on_connected_to_streaming();
    Ok(HandshakeOutcome {
        peer_endpoint: session.peer_endpoint.expect("set by punch loop"),
        local_srflx: srflx,
    })
}

/// Same handshake, but skipping signaling and STUN entirely: the caller
/// already knows the peer's address (LAN/loopback testing). Still runs the
/// punching probe exchange so both sides agree on liveness and observe each
/// other's (possibly NAT-rewritten, though typically unchanged on LAN)
/// source address.
pub async fn run_direct_handshake(
    session: &mut Session,
    socket: &SocketEndpoint,
    dest: SocketAddr,
) -> Result<HandshakeOutcome, CoreError> {
    session.start();
    session.on_signaling_ready();
    if !session.on_stun_success() {
        return Err(CoreError::StunTimeout);
    }
    session.on_candidates_exchanged();

    run_punch_loop(session, socket, &[dest], session.nonce).await?;

    session.on_connected_to_streaming();
    Ok(HandshakeOutcome {
        peer_endpoint: session.peer_endpoint.expect("set by punch loop"),
        local_srflx: dest,
    })
}

async fn wait_for_peer_record(
    signaling: &mut dyn SignalingChannel,
    timeout: Duration,
) -> Result<SignalingRecord, CoreError> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(record) = signaling
            .try_receive()
            .map_err(|e| CoreError::InvalidAddress(e.to_string()))?
        {
            return Ok(record);
        }
        if Instant::now() >= deadline {
            return Err(CoreError::InvalidAddress(
                "timed out waiting for peer signaling record".into(),
            ));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Emit PROBE to every candidate at `probe_interval`, accept the first
/// matching (session_id, nonce) reply, record its observed source address
/// (never the advertised one) as `peer_endpoint`.
async fn run_punch_loop(
    session: &mut Session,
    socket: &SocketEndpoint,
    candidates: &[SocketAddr],
    peer_nonce: u64,
) -> Result<(), CoreError> {
    let probe_interval = session.config.probe_interval;
    let mut last_probe_sent = Instant::now() - probe_interval;
    let mut recv_buf = [0u8; 1500];

    loop {
        session.check_punch_outcome();
        if session.state == SessionState::Connected {
            return Ok(());
        }
        if session.state == SessionState::Failed {
            return Err(CoreError::PunchTimeout);
        }

        if last_probe_sent.elapsed() >= probe_interval {
            for &candidate in candidates {
                let probe = Probe {
                    session_id: session.session_id,
                    ts_ms: monotonic_ms(),
                    probe_seq: 0,
                    nonce: session.nonce,
                    role: session.role,
                    ack_requested: true,
                };
                socket.send_to(&probe.marshal(), candidate).await;
            }
            last_probe_sent = Instant::now();
        }

        match socket.recv_one(&mut recv_buf, Duration::from_millis(5)).await {
            Ok(Some((len, from))) => {
                if let Ok(Message::Probe(probe)) = Message::parse(&recv_buf[..len]) {
                    if probe.session_id == session.session_id && probe.nonce == peer_nonce {
                        session.on_probe_accepted(AcceptedProbe {
                            observed_source: from,
                        });
                        debug!(%from, "probe accepted during punch");
                    }
                }
            }
            Ok(None) => {}
            Err(e) => warn!("socket error during punch: {e}"),
        }
    }
}

fn monotonic_ms() -> u32 {
    use std::sync::OnceLock;
    static START: OnceLock<Instant> = OnceLock::new();
    let start = *START.get_or_init(Instant::now);
    start.elapsed().as_millis() as u32
}

/// Re-exported so role comparisons read naturally at call sites
/// (`Role::Sender`/`Role::Receiver`) without importing `camlink_proto`
/// directly everywhere.
pub use camlink_proto::Role as PeerRole;
