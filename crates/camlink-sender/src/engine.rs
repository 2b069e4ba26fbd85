//! Sender main loop: pulls Access Units from the external encoder, frames
//! and sends them with a back-pressure-as-drop policy, paces keepalives,
//! and honors inbound `IDR_REQUEST`s.
//!
//! Structurally a sibling of `camlink_receiver::engine::ReceiverEngine`: a
//! single cooperative loop interleaving a short, bounded socket receive with
//! periodic housekeeping, rather than a dedicated thread per concern.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use camlink_codec::EncoderSource;
use camlink_core::{Liveness, LivenessConfig, SendOutcome, SocketEndpoint, Telemetry};
use camlink_proto::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::framer::Framer;

/// How often the send loop polls the encoder and the socket, bounding
/// keepalive pacing jitter and inbound IDR_REQUEST latency.
pub const POLL_INTERVAL: Duration = Duration::from_millis(5);
/// Idle detection for the sender side, matching `SESSION_IDLE_TIMEOUT_MS`.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(3);
/// A forced-IDR request that immediately follows another one is a no-op,
/// the same dedup window the receiver's IDR_REQUEST rate limiter uses.
pub const DEFAULT_IDR_FORCE_MIN_INTERVAL: Duration = Duration::from_millis(500);

/// Why the sender loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderExit {
    Cancelled,
    SessionIdle,
    /// The encoder's Access Unit sequence ended.
    EncoderExhausted,
}

pub struct SenderEngineConfig {
    pub session_id: u32,
    pub peer_endpoint: SocketAddr,
    pub liveness: LivenessConfig,
    pub idle_timeout: Duration,
    pub idr_force_min_interval: Duration,
}

impl Default for SenderEngineConfig {
    fn default() -> Self {
        Self {
            session_id: 0,
            peer_endpoint: "127.0.0.1:0".parse().unwrap(),
            liveness: LivenessConfig::default(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            idr_force_min_interval: DEFAULT_IDR_FORCE_MIN_INTERVAL,
        }
    }
}

/// Ties together the framer and liveness/control for one streaming
/// session's sender side.
pub struct SenderEngine<E: EncoderSource> {
    socket: Arc<SocketEndpoint>,
    session_id: u32,
    peer_endpoint: SocketAddr,
    encoder: E,
    framer: Framer,
    liveness: Liveness,
    telemetry: Arc<Telemetry>,
    idle_timeout: Duration,
    idr_force_min_interval: Duration,
    last_idr_forced_at: Option<Instant>,
    /// Set when `send_to` backpressures mid-AU; surfaced so a caller wired
    /// to the encoder can nudge it toward an earlier keyframe.
    backpressure_seen: Arc<AtomicBool>,
}

impl<E: EncoderSource> SenderEngine<E> {
    pub fn new(
        socket: Arc<SocketEndpoint>,
        encoder: E,
        telemetry: Arc<Telemetry>,
        config: SenderEngineConfig,
    ) -> Self {
        Self {
            socket,
            session_id: config.session_id,
            peer_endpoint: config.peer_endpoint,
            encoder,
            framer: Framer::new(),
            liveness: Liveness::new(config.liveness),
            telemetry,
            idle_timeout: config.idle_timeout,
            idr_force_min_interval: config.idr_force_min_interval,
            last_idr_forced_at: None,
            backpressure_seen: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether the most recent AU was abandoned mid-send due to
    /// backpressure, for a caller that wants to log or report it.
    pub fn backpressure_flag(&self) -> Arc<AtomicBool> {
        self.backpressure_seen.clone()
    }

    pub async fn run(mut self, cancellation: CancellationToken) -> SenderExit {
        let mut recv_buf = vec![0u8; 1500];
        loop {
            if cancellation.is_cancelled() {
                return SenderExit::Cancelled;
            }

            match self.encoder.try_next_au() {
                Some(au) => self.send_au(&au).await,
                None if self.encoder.is_exhausted() => return SenderExit::EncoderExhausted,
                None => {}
            }

            let now = Instant::now();
            if let Some(ka) =
                self.liveness
                    .maybe_build_keepalive(self.session_id, now, monotonic_ms())
            {
                self.telemetry.inc_packets_sent();
                self.socket.send_to(&ka.marshal(), self.peer_endpoint).await;
            }

            let recv_result = tokio::select! {
                _ = cancellation.cancelled() => return SenderExit::Cancelled,
                result = self.socket.recv_one(&mut recv_buf, POLL_INTERVAL) => result,
            };
            match recv_result {
                Ok(Some((len, from))) => self.handle_datagram(&recv_buf[..len], from, Instant::now()),
                Ok(None) => {}
                Err(e) => warn!("sender socket error: {e}"),
            }

            if self.liveness.is_idle(Instant::now(), self.idle_timeout) {
                return SenderExit::SessionIdle;
            }
        }
    }

    /// Frame one AU, then send its fragments back-to-back with no per-AU
    /// queue. Abandons the remainder of the AU the first time `send_to`
    /// backpressures.
    async fn send_au(&mut self, au: &camlink_codec::AccessUnit) {
        let fragments = self.framer.frame(au, self.session_id, monotonic_ms());
        for frag in fragments {
            let bytes = frag.marshal();
            match self.socket.send_to(&bytes, self.peer_endpoint).await {
                SendOutcome::Sent(_) => {
                    self.telemetry.inc_packets_sent();
                }
                SendOutcome::Backpressure => {
                    trace!(frame_id = frag.frame_id, "backpressure, abandoning rest of AU");
                    self.backpressure_seen.store(true, Ordering::Relaxed);
                    self.encoder.request_idr();
                    return;
                }
            }
        }
    }

    fn handle_datagram(&mut self, data: &[u8], from: SocketAddr, now: Instant) {
        if from != self.peer_endpoint {
            self.telemetry.inc_invalid_packets();
            return;
        }
        self.telemetry.inc_packets_received();
        self.liveness.record_rx(now);

        match Message::parse(data) {
            Ok(Message::IdrRequest(req)) => {
                if req.session_id != self.session_id {
                    self.telemetry.inc_invalid_packets();
                    return;
                }
                self.force_idr(now);
            }
            Ok(Message::KeepAlive(ka)) => {
                self.liveness.on_keepalive_received(&ka, now);
            }
            Ok(Message::Probe(_)) | Ok(Message::VideoFragment(_)) | Ok(Message::Hello(_)) => {
                // Not meaningful inbound on the sender side once STREAMING.
            }
            Err(e) => {
                trace!(%e, "dropped malformed datagram");
                self.telemetry.inc_invalid_packets();
            }
        }
    }

    /// Duplicate IDR_REQUESTs within a short window are idempotent — at
    /// most one keyframe is forced per cadence opportunity.
    fn force_idr(&mut self, now: Instant) {
        let allowed = self
            .last_idr_forced_at
            .map(|t| now.saturating_duration_since(t) >= self.idr_force_min_interval)
            .unwrap_or(true);
        if !allowed {
            return;
        }
        self.last_idr_forced_at = Some(now);
        debug!("forcing IDR on request");
        self.encoder.request_idr();
    }
}

fn monotonic_ms() -> u32 {
    use std::sync::OnceLock;
    static START: OnceLock<Instant> = OnceLock::new();
    let start = *START.get_or_init(Instant::now);
    start.elapsed().as_millis() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use camlink_codec::AccessUnit;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Mutex;

    fn loopback(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    struct ScriptedEncoder {
        aus: Mutex<Vec<AccessUnit>>,
        idr_requests: Arc<AtomicBool>,
    }

    impl ScriptedEncoder {
        fn new(aus: Vec<AccessUnit>) -> Self {
            Self {
                aus: Mutex::new(aus),
                idr_requests: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl EncoderSource for ScriptedEncoder {
        fn try_next_au(&mut self) -> Option<AccessUnit> {
            self.aus.lock().unwrap().pop()
        }
        fn request_idr(&mut self) {
            self.idr_requests.store(true, Ordering::Relaxed);
        }
    }

    fn au(len: usize, is_keyframe: bool) -> AccessUnit {
        AccessUnit {
            data: vec![7; len],
            is_keyframe,
            has_spspps: is_keyframe,
            ts_ms: 0,
        }
    }

    #[tokio::test]
    async fn sends_all_fragments_of_a_queued_au() {
        let socket = Arc::new(SocketEndpoint::bind(loopback(0), 4096, 4096).unwrap());
        let peer = SocketEndpoint::bind(loopback(0), 4096, 4096).unwrap();
        let peer_addr = peer.local_addr().unwrap();

        let encoder = ScriptedEncoder::new(vec![au(10, true)]);
        let mut engine = SenderEngine::new(
            socket.clone(),
            encoder,
            Arc::new(Telemetry::new()),
            SenderEngineConfig {
                session_id: 1,
                peer_endpoint: peer_addr,
                ..SenderEngineConfig::default()
            },
        );

        engine.send_au(&au(10, true)).await;
        let mut buf = [0u8; 1500];
        let (len, _) = peer
            .recv_one(&mut buf, Duration::from_millis(200))
            .await
            .unwrap()
            .expect("expected a fragment datagram");
        assert!(len > 0);
        assert_eq!(engine.telemetry.snapshot().packets_sent, 1);
    }

    #[tokio::test]
    async fn idr_request_forces_encoder_once_per_window() {
        let socket = Arc::new(SocketEndpoint::bind(loopback(0), 4096, 4096).unwrap());
        let idr_flag = Arc::new(AtomicBool::new(false));
        let encoder = ScriptedEncoder {
            aus: Mutex::new(Vec::new()),
            idr_requests: idr_flag.clone(),
        };
        let mut engine = SenderEngine::new(
            socket.clone(),
            encoder,
            Arc::new(Telemetry::new()),
            SenderEngineConfig {
                session_id: 1,
                peer_endpoint: loopback(1),
                idr_force_min_interval: Duration::from_millis(100),
                ..SenderEngineConfig::default()
            },
        );

        let now = Instant::now();
        engine.force_idr(now);
        assert!(idr_flag.load(Ordering::Relaxed));
        idr_flag.store(false, Ordering::Relaxed);

        // Duplicate within the window is a no-op.
        engine.force_idr(now + Duration::from_millis(10));
        assert!(!idr_flag.load(Ordering::Relaxed));

        engine.force_idr(now + Duration::from_millis(150));
        assert!(idr_flag.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn multi_fragment_au_sends_one_datagram_per_fragment() {
        let socket = Arc::new(SocketEndpoint::bind(loopback(0), 4096, 4096).unwrap());
        let peer = SocketEndpoint::bind(loopback(0), 4096, 4096).unwrap();
        let peer_addr = peer.local_addr().unwrap();

        let encoder = ScriptedEncoder::new(Vec::new());
        let mut engine = SenderEngine::new(
            socket,
            encoder,
            Arc::new(Telemetry::new()),
            SenderEngineConfig {
                session_id: 1,
                peer_endpoint: peer_addr,
                ..SenderEngineConfig::default()
            },
        );

        engine.send_au(&au(crate::framer::PAYLOAD_MAX + 10, false)).await;
        assert_eq!(engine.telemetry.snapshot().packets_sent, 2);
    }
}
