//! Session state machine: IDLE → SIGNALING_CONNECT → STUN_GATHER →
//! EXCHANGE_CANDIDATES → PUNCHING → CONNECTED → STREAMING →
//! RECONNECTING/FAILED.
//!
//! A plain struct with inherent methods driving an explicit state enum,
//! rather than a generic FSM crate — the state set is small and fixed and
//! every transition needs its own side effects (timers, candidate lists,
//! reconnect bookkeeping).

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use camlink_proto::Role;
use rand::Rng;
use tracing::{debug, info, warn};

/// Default PUNCH_WINDOW_MS.
pub const DEFAULT_PUNCH_WINDOW_MS: u64 = 3000;
/// Default PROBE_INTERVAL_MS: 50-100 Hz.
pub const DEFAULT_PROBE_INTERVAL_MS: u64 = 15;
/// Default KEEPALIVE_INTERVAL_MS.
pub const DEFAULT_KEEPALIVE_INTERVAL_MS: u64 = 1000;
/// Default SESSION_IDLE_TIMEOUT_MS: at least 3s.
pub const DEFAULT_SESSION_IDLE_TIMEOUT_MS: u64 = 3000;
/// Default STUN_GATHER timeout.
pub const DEFAULT_STUN_GATHER_TIMEOUT_MS: u64 = 10_000;
/// Recommended reconnect retry budget before FAILED.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    SignalingConnect,
    StunGather,
    ExchangeCandidates,
    Punching,
    Connected,
    Streaming,
    Reconnecting,
    Failed,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub punch_window: Duration,
    pub probe_interval: Duration,
    pub keepalive_interval: Duration,
    pub session_idle_timeout: Duration,
    pub stun_gather_timeout: Duration,
    pub max_reconnect_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            punch_window: Duration::from_millis(DEFAULT_PUNCH_WINDOW_MS),
            probe_interval: Duration::from_millis(DEFAULT_PROBE_INTERVAL_MS),
            keepalive_interval: Duration::from_millis(DEFAULT_KEEPALIVE_INTERVAL_MS),
            session_idle_timeout: Duration::from_millis(DEFAULT_SESSION_IDLE_TIMEOUT_MS),
            stun_gather_timeout: Duration::from_millis(DEFAULT_STUN_GATHER_TIMEOUT_MS),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

/// A peer's candidate endpoints, exchanged over signaling.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeerCandidates {
    pub local: Option<SocketAddr>,
    pub srflx: Option<SocketAddr>,
}

fn is_private_ipv4(ip: Ipv4Addr) -> bool {
    ip.is_private() || ip.is_loopback() || ip.is_link_local()
}

/// Heuristic used to decide whether a remote local candidate is worth
/// dialing before srflx.
fn looks_same_network(a: IpAddr, b: IpAddr) -> bool {
    match (a, b) {
        (IpAddr::V4(a), IpAddr::V4(b)) => is_private_ipv4(a) && is_private_ipv4(b),
        _ => false,
    }
}

/// Build the ordered candidate dial list for PUNCHING: remote-local first
/// when it looks like the same network, then remote-srflx.
pub fn ordered_candidate_list(
    our_local: Option<SocketAddr>,
    remote: &PeerCandidates,
) -> Vec<SocketAddr> {
    let mut candidates = Vec::new();
    if let (Some(ours), Some(remote_local)) = (our_local, remote.local) {
        if looks_same_network(ours.ip(), remote_local.ip()) {
            candidates.push(remote_local);
        }
    }
    if let Some(srflx) = remote.srflx {
        if !candidates.contains(&srflx) {
            candidates.push(srflx);
        }
    }
    candidates
}

/// One probe accepted during PUNCHING, used to decide CONNECTED transition
/// and to record the observed (NAT-rewritten) source.
#[derive(Debug, Clone, Copy)]
pub struct AcceptedProbe {
    pub observed_source: SocketAddr,
}

/// The session's identity, role, and current FSM state.
pub struct Session {
    pub session_id: u32,
    pub nonce: u64,
    pub role: Role,
    pub state: SessionState,
    pub peer_endpoint: Option<SocketAddr>,
    pub config: SessionConfig,

    started_at: Instant,
    punch_deadline: Option<Instant>,
    stun_deadline: Option<Instant>,
    reconnect_attempts: u32,
    rx_probe_ok: bool,
}

impl Session {
    pub fn new(role: Role, config: SessionConfig) -> Self {
        let mut rng = rand::thread_rng();
        Self {
            session_id: rng.gen(),
            nonce: rng.gen(),
            role,
            state: SessionState::Idle,
            peer_endpoint: None,
            config,
            started_at: Instant::now(),
            punch_deadline: None,
            stun_deadline: None,
            reconnect_attempts: 0,
            rx_probe_ok: false,
        }
    }

    /// Generate a fresh session_id/nonce pair. Called on initial start and
    /// on every RECONNECTING transition.
    fn regenerate_identity(&mut self) {
        let mut rng = rand::thread_rng();
        self.session_id = rng.gen();
        self.nonce = rng.gen();
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn start(&mut self) {
        debug_assert_eq!(self.state, SessionState::Idle);
        self.state = SessionState::SignalingConnect;
        info!(session_id = self.session_id, "opening signaling channel");
    }

    pub fn on_signaling_ready(&mut self) {
        self.state = SessionState::StunGather;
        self.stun_deadline = Some(Instant::now() + self.config.stun_gather_timeout);
        info!("signaling ready, starting STUN gather");
    }

    /// STUN succeeded; record endpoints are the caller's job (the session
    /// just advances state). Returns false if the gather deadline already
    /// passed, in which case the caller should call `on_stun_failed` instead.
    pub fn on_stun_success(&mut self) -> bool {
        if self.deadline_passed(self.stun_deadline) {
            return false;
        }
        self.stun_deadline = None;
        self.state = SessionState::ExchangeCandidates;
        info!("STUN gather complete, exchanging candidates");
        true
    }

    pub fn on_stun_failed(&mut self) {
        warn!("STUN gather failed or timed out");
        self.state = SessionState::Failed;
    }

    pub fn check_stun_timeout(&mut self) {
        if self.state == SessionState::StunGather && self.deadline_passed(self.stun_deadline) {
            self.on_stun_failed();
        }
    }

    pub fn on_candidates_exchanged(&mut self) {
        self.state = SessionState::Punching;
        self.punch_deadline = Some(Instant::now() + self.config.punch_window);
        self.rx_probe_ok = false;
        info!("candidates exchanged, punching");
    }

    /// Accept a PROBE whose session_id and nonce matched. Sets
    /// `peer_endpoint` to the observed source address, never the advertised
    /// candidate.
    pub fn on_probe_accepted(&mut self, probe: AcceptedProbe) {
        if self.state != SessionState::Punching {
            return;
        }
        self.peer_endpoint = Some(probe.observed_source);
        self.rx_probe_ok = true;
        debug!(source = %probe.observed_source, "accepted probe, liveness proven");
    }

    /// Drive the PUNCHING → CONNECTED / FAILED decision. Call on every tick
    /// while in PUNCHING.
    pub fn check_punch_outcome(&mut self) {
        if self.state != SessionState::Punching {
            return;
        }
        if self.rx_probe_ok {
            self.state = SessionState::Connected;
            info!(peer = ?self.peer_endpoint, "punch succeeded, connected");
            return;
        }
        if self.deadline_passed(self.punch_deadline) {
            warn!("punch window expired without proof of liveness");
            self.state = SessionState::Failed;
        }
    }

    /// CONNECTED → STREAMING: lock the peer endpoint and start producing or
    /// consuming video.
    pub fn on_connected_to_streaming(&mut self) {
        debug_assert_eq!(self.state, SessionState::Connected);
        self.state = SessionState::Streaming;
        info!("streaming started");
    }

    /// SESSION_IDLE_TIMEOUT_MS elapsed with no inbound datagram; restart the
    /// handshake with a fresh identity.
    pub fn on_idle_timeout(&mut self) {
        warn!("session idle timeout, reconnecting");
        self.reconnect_attempts += 1;
        self.regenerate_identity();
        self.peer_endpoint = None;
        self.rx_probe_ok = false;
        if self.reconnect_attempts > self.config.max_reconnect_attempts {
            self.state = SessionState::Failed;
            return;
        }
        self.state = SessionState::Reconnecting;
    }

    /// Reconnect proceeds by restarting at STUN_GATHER: signaling is assumed
    /// already established from the first connect.
    pub fn on_reconnect_restart(&mut self) {
        debug_assert_eq!(self.state, SessionState::Reconnecting);
        self.state = SessionState::StunGather;
        self.stun_deadline = Some(Instant::now() + self.config.stun_gather_timeout);
    }

    pub fn on_reconnect_success(&mut self) {
        self.reconnect_attempts = 0;
    }

    fn deadline_passed(&self, deadline: Option<Instant>) -> bool {
        deadline.is_some_and(|d| Instant::now() >= d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr(a: u8, b: u8, c: u8, d: u8, port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(a, b, c, d)), port)
    }

    #[test]
    fn happy_path_reaches_streaming() {
        let mut session = Session::new(Role::Sender, SessionConfig::default());
        session.start();
        assert_eq!(session.state, SessionState::SignalingConnect);

        session.on_signaling_ready();
        assert_eq!(session.state, SessionState::StunGather);

        assert!(session.on_stun_success());
        assert_eq!(session.state, SessionState::ExchangeCandidates);

        session.on_candidates_exchanged();
        assert_eq!(session.state, SessionState::Punching);

        session.on_probe_accepted(AcceptedProbe {
            observed_source: addr(203, 0, 113, 9, 4000),
        });
        session.check_punch_outcome();
        assert_eq!(session.state, SessionState::Connected);
        assert_eq!(session.peer_endpoint, Some(addr(203, 0, 113, 9, 4000)));

        session.on_connected_to_streaming();
        assert_eq!(session.state, SessionState::Streaming);
    }

    #[test]
    fn punch_with_nat_rewritten_source_uses_observed_address() {
        let mut session = Session::new(Role::Receiver, SessionConfig::default());
        session.state = SessionState::Punching;
        let advertised = addr(198, 51, 100, 5, 4000);
        let observed = addr(198, 51, 100, 5, 51234); // NAT rewrote the port
        assert_ne!(advertised, observed);

        session.on_probe_accepted(AcceptedProbe {
            observed_source: observed,
        });
        assert_eq!(session.peer_endpoint, Some(observed));
    }

    #[test]
    fn punch_deadline_without_liveness_fails() {
        let mut config = SessionConfig::default();
        config.punch_window = Duration::from_millis(1);
        let mut session = Session::new(Role::Sender, config);
        session.state = SessionState::Punching;
        session.on_candidates_exchanged();
        std::thread::sleep(Duration::from_millis(5));
        session.check_punch_outcome();
        assert_eq!(session.state, SessionState::Failed);
    }

    #[test]
    fn idle_timeout_regenerates_identity_and_reconnects() {
        let mut session = Session::new(Role::Sender, SessionConfig::default());
        let old_id = session.session_id;
        let old_nonce = session.nonce;
        session.state = SessionState::Streaming;

        session.on_idle_timeout();
        assert_eq!(session.state, SessionState::Reconnecting);
        assert_ne!(session.session_id, old_id);
        assert_ne!(session.nonce, old_nonce);
        assert!(session.peer_endpoint.is_none());

        session.on_reconnect_restart();
        assert_eq!(session.state, SessionState::StunGather);
    }

    #[test]
    fn repeated_reconnect_failures_transition_to_failed() {
        let mut config = SessionConfig::default();
        config.max_reconnect_attempts = 2;
        let mut session = Session::new(Role::Sender, config);
        session.state = SessionState::Streaming;
        session.on_idle_timeout();
        assert_eq!(session.state, SessionState::Reconnecting);
        session.state = SessionState::Streaming;
        session.on_idle_timeout();
        assert_eq!(session.state, SessionState::Reconnecting);
        session.state = SessionState::Streaming;
        session.on_idle_timeout();
        assert_eq!(session.state, SessionState::Failed);
    }

    #[test]
    fn ordered_candidates_prefer_local_on_same_private_network() {
        let ours = addr(192, 168, 1, 5, 5000);
        let remote = PeerCandidates {
            local: Some(addr(192, 168, 1, 9, 5001)),
            srflx: Some(addr(203, 0, 113, 9, 4000)),
        };
        let ordered = ordered_candidate_list(Some(ours), &remote);
        assert_eq!(
            ordered,
            vec![addr(192, 168, 1, 9, 5001), addr(203, 0, 113, 9, 4000)]
        );
    }

    #[test]
    fn ordered_candidates_skip_local_across_different_networks() {
        let ours = addr(203, 0, 113, 1, 5000);
        let remote = PeerCandidates {
            local: Some(addr(192, 168, 1, 9, 5001)),
            srflx: Some(addr(198, 51, 100, 9, 4000)),
        };
        let ordered = ordered_candidate_list(Some(ours), &remote);
        assert_eq!(ordered, vec![addr(198, 51, 100, 9, 4000)]);
    }
}
