//! Receiver main loop: demultiplexes inbound datagrams to the assembler or
//! liveness, periodically sweeps assembly timeouts, drives the decode
//! coordinator, and emits IDR_REQUESTs it is asked for.
//!
//! A single cooperative loop rather than separate OS threads: network
//! receipt must never be blocked by decode, and decode must never be
//! blocked by rendering. The `select!`-driven poll below interleaves a
//! short, bounded socket receive with the periodic housekeeping (timeout
//! sweep, keepalive pacing, decode check) every iteration, so no single
//! phase can stall the others for more than one poll interval.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use camlink_codec::DecoderBackend;
use camlink_core::{LatestSlot, Liveness, LivenessConfig, SocketEndpoint, Telemetry};
use camlink_proto::{IdrReason, IdrRequest, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::assembler::{Assembler, AssemblerConfig, CompleteAu};
use crate::coordinator::{CoordinatorAction, DecodeCoordinator};

/// How often the receive loop polls, bounding housekeeping latency
/// (timeout sweep granularity, keepalive pacing jitter).
pub const POLL_INTERVAL: Duration = Duration::from_millis(5);
/// Idle detection for the receiver side, matching `SESSION_IDLE_TIMEOUT_MS`.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(3);

/// Why the receiver loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverExit {
    Cancelled,
    SessionIdle,
}

pub struct ReceiverEngineConfig {
    pub session_id: u32,
    pub peer_endpoint: SocketAddr,
    pub assembler: AssemblerConfig,
    pub liveness: LivenessConfig,
    pub idle_timeout: Duration,
}

/// Ties together the assembler, decode coordinator, and liveness tracking
/// for one streaming session.
pub struct ReceiverEngine<D: DecoderBackend> {
    socket: Arc<SocketEndpoint>,
    session_id: u32,
    peer_endpoint: SocketAddr,
    assembler: Assembler,
    latest_complete_au: Arc<LatestSlot<CompleteAu>>,
    coordinator: DecodeCoordinator<D>,
    liveness: Liveness,
    telemetry: Arc<Telemetry>,
    idle_timeout: Duration,
}

impl<D: DecoderBackend> ReceiverEngine<D> {
    pub fn new(
        socket: Arc<SocketEndpoint>,
        decoder: D,
        telemetry: Arc<Telemetry>,
        config: ReceiverEngineConfig,
    ) -> Self {
        let latest_complete_au = Arc::new(LatestSlot::new());
        let assembler = Assembler::new(config.assembler, latest_complete_au.clone(), telemetry.clone());
        let needs_idr = assembler.needs_idr_handle();
        let latest_decoded_frame = Arc::new(LatestSlot::new());
        let coordinator =
            DecodeCoordinator::new(decoder, latest_decoded_frame, needs_idr, telemetry.clone());
        Self {
            socket,
            session_id: config.session_id,
            peer_endpoint: config.peer_endpoint,
            assembler,
            latest_complete_au,
            coordinator,
            liveness: Liveness::new(config.liveness),
            telemetry,
            idle_timeout: config.idle_timeout,
        }
    }

    /// Exposes the decoded-frame slot so a renderer can poll it at its own
    /// cadence.
    pub fn latest_decoded_frame(&self) -> Arc<LatestSlot<camlink_codec::DecodedFrame>> {
        // `DecodeCoordinator` owns this slot; re-derive a handle through the
        // coordinator rather than duplicating storage.
        self.coordinator.latest_decoded_frame()
    }

    pub async fn run(mut self, cancellation: CancellationToken) -> ReceiverExit {
        // STREAMING entry action: request an IDR immediately.
        self.send_idr_request(IdrReason::Startup).await;

        let mut buf = vec![0u8; 2048];
        loop {
            if cancellation.is_cancelled() {
                return ReceiverExit::Cancelled;
            }

            let recv_result = tokio::select! {
                _ = cancellation.cancelled() => return ReceiverExit::Cancelled,
                result = self.socket.recv_one(&mut buf, POLL_INTERVAL) => result,
            };

            let now = Instant::now();
            match recv_result {
                Ok(Some((len, from))) => self.handle_datagram(&buf[..len], from, now).await,
                Ok(None) => {}
                Err(e) => warn!("receiver socket error: {e}"),
            }

            self.assembler.sweep_timeouts(now);

            if let Some(ka) =
                self.liveness
                    .maybe_build_keepalive(self.session_id, now, monotonic_ms())
            {
                self.telemetry.inc_packets_sent();
                self.socket.send_to(&ka.marshal(), self.peer_endpoint).await;
            }

            if self.assembler.needs_idr() {
                self.send_idr_request(IdrReason::Loss).await;
            }

            if let Some(au) = self.latest_complete_au.take().await {
                let action = self.coordinator.process(au, now).await;
                self.handle_coordinator_action(action).await;
            } else {
                let action = self.coordinator.tick(now);
                self.handle_coordinator_action(action).await;
            }

            if self.liveness.is_idle(now, self.idle_timeout) {
                return ReceiverExit::SessionIdle;
            }
        }
    }

    async fn handle_datagram(&mut self, data: &[u8], from: SocketAddr, now: Instant) {
        if from != self.peer_endpoint {
            trace!(%from, "datagram from unexpected source, dropped");
            self.telemetry.inc_invalid_packets();
            return;
        }
        self.telemetry.inc_packets_received();
        self.liveness.record_rx(now);

        match Message::parse(data) {
            Ok(Message::VideoFragment(frag)) => {
                if frag.session_id != self.session_id {
                    self.telemetry.inc_invalid_packets();
                    return;
                }
                self.assembler.add_fragment(&frag, now).await;
            }
            Ok(Message::KeepAlive(ka)) => {
                self.liveness.on_keepalive_received(&ka, now);
            }
            Ok(Message::Probe(_)) => {
                // Punching already resolved liveness; ignore stray probes
                // during STREAMING.
            }
            Ok(Message::IdrRequest(_)) | Ok(Message::Hello(_)) => {
                // Not meaningful inbound on the receiver side; ignore.
            }
            Err(e) => {
                trace!(%e, "dropped malformed datagram");
                self.telemetry.inc_invalid_packets();
            }
        }
    }

    async fn send_idr_request(&mut self, reason: IdrReason) {
        let now = Instant::now();
        if !self.liveness.should_send_idr_request(reason, now) {
            return;
        }
        let request = IdrRequest {
            session_id: self.session_id,
            seq: 0,
            ts_ms: monotonic_ms(),
            reason,
        };
        debug!(?reason, "sending IDR_REQUEST");
        self.telemetry.inc_packets_sent();
        self.socket
            .send_to(&request.marshal(), self.peer_endpoint)
            .await;
    }

    async fn handle_coordinator_action(&mut self, action: CoordinatorAction) {
        if let CoordinatorAction::RequestIdr(reason) = action {
            self.send_idr_request(reason).await;
        }
    }
}

fn monotonic_ms() -> u32 {
    use std::sync::OnceLock;
    static START: OnceLock<Instant> = OnceLock::new();
    let start = *START.get_or_init(Instant::now);
    start.elapsed().as_millis() as u32
}
