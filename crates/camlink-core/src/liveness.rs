//! Liveness & control: keepalive pacing, RTT estimation, idle detection,
//! and IDR-request rate limiting.
//!
//! A single KEEPALIVE message carries its own echo field rather than a
//! separate ping/pong pair, so one struct tracks both send pacing and RTT
//! estimation from the same datagram.

use std::time::{Duration, Instant};

use camlink_proto::{IdrReason, KeepAlive};
use tracing::trace;

#[derive(Debug, Clone, Copy)]
pub struct LivenessConfig {
    pub keepalive_interval: Duration,
    /// RTT EMA smoothing factor.
    pub rtt_alpha: f64,
    /// Minimum spacing between IDR_REQUESTs carrying the same reason code.
    pub idr_request_min_interval: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_millis(1000),
            rtt_alpha: 0.15,
            idr_request_min_interval: Duration::from_secs(1),
        }
    }
}

fn reason_index(reason: IdrReason) -> usize {
    match reason {
        IdrReason::Startup => 0,
        IdrReason::DecodeError => 1,
        IdrReason::Loss => 2,
        IdrReason::User => 3,
    }
}

/// Tracks liveness state for one session: when to send the next keepalive,
/// the running RTT estimate, last-inbound time for idle detection, and a
/// per-reason IDR request rate limiter.
pub struct Liveness {
    config: LivenessConfig,
    seq: u32,
    last_keepalive_sent_at: Option<Instant>,
    last_sent_ts_ms: Option<u32>,
    last_remote_ts_ms: u32,
    last_rx_time: Instant,
    rtt_ema_ms: Option<f64>,
    last_idr_request_at: [Option<Instant>; 4],
}

impl Liveness {
    pub fn new(config: LivenessConfig) -> Self {
        Self {
            config,
            seq: 0,
            last_keepalive_sent_at: None,
            last_sent_ts_ms: None,
            last_remote_ts_ms: 0,
            last_rx_time: Instant::now(),
            rtt_ema_ms: None,
            last_idr_request_at: [None; 4],
        }
    }

    pub fn rtt_ema_ms(&self) -> Option<f64> {
        self.rtt_ema_ms
    }

    /// Record that a datagram of any type arrived; updates `last_rx_time`.
    pub fn record_rx(&mut self, now: Instant) {
        self.last_rx_time = now;
    }

    pub fn is_idle(&self, now: Instant, idle_timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_rx_time) >= idle_timeout
    }

    /// Build the next KEEPALIVE if the pacing interval has elapsed, tracking
    /// the sent timestamp so a later echo can be matched for RTT.
    pub fn maybe_build_keepalive(
        &mut self,
        session_id: u32,
        now: Instant,
        now_ts_ms: u32,
    ) -> Option<KeepAlive> {
        let due = self
            .last_keepalive_sent_at
            .map(|t| now.saturating_duration_since(t) >= self.config.keepalive_interval)
            .unwrap_or(true);
        if !due {
            return None;
        }
        self.last_keepalive_sent_at = Some(now);
        self.last_sent_ts_ms = Some(now_ts_ms);
        self.seq = self.seq.wrapping_add(1);
        Some(KeepAlive {
            session_id,
            ts_ms: now_ts_ms,
            seq: self.seq,
            echo_ts_ms: self.last_remote_ts_ms,
        })
    }

    /// Process an inbound KEEPALIVE: update the remote clock we echo back,
    /// and if its echo matches our last sent ts, update the RTT EMA.
    pub fn on_keepalive_received(&mut self, ka: &KeepAlive, now: Instant) {
        self.record_rx(now);
        self.last_remote_ts_ms = ka.ts_ms;

        if ka.echo_ts_ms == 0 {
            return;
        }
        if Some(ka.echo_ts_ms) != self.last_sent_ts_ms {
            return;
        }
        // Can't compute real elapsed wall time from two peer ts_ms values
        // alone without a monotonic anchor; approximate using the sender's
        // own elapsed time since it sent that keepalive.
        let observed = match self.last_keepalive_sent_at {
            Some(sent_at) => now.saturating_duration_since(sent_at).as_secs_f64() * 1000.0,
            None => 0.0,
        };
        self.rtt_ema_ms = Some(match self.rtt_ema_ms {
            Some(prev) => prev + self.config.rtt_alpha * (observed - prev),
            None => observed,
        });
        trace!(rtt_ms = observed, "updated RTT estimate");
    }

    /// Whether an IDR_REQUEST with this reason may be sent now, given the
    /// per-reason rate limit: duplicate requests within the window are
    /// idempotent, each reason code tracked independently.
    pub fn should_send_idr_request(&mut self, reason: IdrReason, now: Instant) -> bool {
        let idx = reason_index(reason);
        let allowed = self.last_idr_request_at[idx]
            .map(|t| now.saturating_duration_since(t) >= self.config.idr_request_min_interval)
            .unwrap_or(true);
        if allowed {
            self.last_idr_request_at[idx] = Some(now);
        }
        allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keepalive_paced_by_interval() {
        let mut config = LivenessConfig::default();
        config.keepalive_interval = Duration::from_millis(50);
        let mut liveness = Liveness::new(config);
        let t0 = Instant::now();

        let first = liveness.maybe_build_keepalive(1, t0, 1000);
        assert!(first.is_some());
        assert_eq!(first.unwrap().seq, 1);

        let too_soon = liveness.maybe_build_keepalive(1, t0 + Duration::from_millis(10), 1010);
        assert!(too_soon.is_none());

        let later = liveness.maybe_build_keepalive(1, t0 + Duration::from_millis(60), 1060);
        assert!(later.is_some());
        assert_eq!(later.unwrap().seq, 2);
    }

    #[test]
    fn idle_detection_fires_after_timeout() {
        let mut liveness = Liveness::new(LivenessConfig::default());
        let t0 = Instant::now();
        liveness.record_rx(t0);
        assert!(!liveness.is_idle(t0 + Duration::from_millis(500), Duration::from_secs(1)));
        assert!(liveness.is_idle(t0 + Duration::from_millis(1500), Duration::from_secs(1)));
    }

    #[test]
    fn idr_request_rate_limited_per_reason() {
        let mut config = LivenessConfig::default();
        config.idr_request_min_interval = Duration::from_millis(100);
        let mut liveness = Liveness::new(config);
        let t0 = Instant::now();

        assert!(liveness.should_send_idr_request(IdrReason::Loss, t0));
        assert!(!liveness.should_send_idr_request(IdrReason::Loss, t0 + Duration::from_millis(10)));
        // A different reason code is not throttled by the first's timer.
        assert!(liveness.should_send_idr_request(IdrReason::DecodeError, t0 + Duration::from_millis(10)));
        assert!(liveness.should_send_idr_request(IdrReason::Loss, t0 + Duration::from_millis(150)));
    }

    #[test]
    fn rtt_estimate_updates_on_matching_echo() {
        let mut liveness = Liveness::new(LivenessConfig::default());
        let t0 = Instant::now();
        let ka_out = liveness.maybe_build_keepalive(1, t0, 5000).unwrap();

        let echoed_back = KeepAlive {
            session_id: 1,
            ts_ms: 6000,
            seq: 99,
            echo_ts_ms: ka_out.ts_ms,
        };
        liveness.on_keepalive_received(&echoed_back, t0 + Duration::from_millis(30));
        assert!(liveness.rtt_ema_ms().is_some());
    }

    #[test]
    fn mismatched_echo_does_not_update_rtt() {
        let mut liveness = Liveness::new(LivenessConfig::default());
        let t0 = Instant::now();
        liveness.maybe_build_keepalive(1, t0, 5000).unwrap();

        let unrelated = KeepAlive {
            session_id: 1,
            ts_ms: 6000,
            seq: 1,
            echo_ts_ms: 4242,
        };
        liveness.on_keepalive_received(&unrelated, t0 + Duration::from_millis(30));
        assert!(liveness.rtt_ema_ms().is_none());
    }
}
