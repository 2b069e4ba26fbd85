//! Telemetry counters. Plain `AtomicU64` fields with `Relaxed` ordering
//! throughout — these are independent point-in-time counters, not a
//! synchronization mechanism, so no stronger ordering is needed.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use serde::Serialize;

#[derive(Default)]
pub struct Telemetry {
    pub packets_received: AtomicU64,
    pub packets_sent: AtomicU64,
    pub invalid_packets: AtomicU64,
    pub fragments_received: AtomicU64,
    pub frames_completed: AtomicU64,
    pub frames_dropped_timeout: AtomicU64,
    pub frames_dropped_superseded: AtomicU64,
    pub frames_dropped_overflow: AtomicU64,
    pub duplicate_fragments: AtomicU64,
    pub decode_errors: AtomicU64,
    pub keyframes_decoded: AtomicU64,
    pub frames_rendered: AtomicU64,
    /// Age of `latest_complete_AU` in milliseconds, sampled on read.
    latest_complete_au_age_ms: AtomicI64,
    /// Age of the frame actually handed to the renderer, in milliseconds.
    frame_age_at_render_ms: AtomicI64,
}

/// A point-in-time copy of all counters, serializable for logging or a
/// diagnostics endpoint.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TelemetrySnapshot {
    pub packets_received: u64,
    pub packets_sent: u64,
    pub invalid_packets: u64,
    pub fragments_received: u64,
    pub frames_completed: u64,
    pub frames_dropped_timeout: u64,
    pub frames_dropped_superseded: u64,
    pub frames_dropped_overflow: u64,
    pub duplicate_fragments: u64,
    pub decode_errors: u64,
    pub keyframes_decoded: u64,
    pub frames_rendered: u64,
    pub latest_complete_au_age_ms: i64,
    pub frame_age_at_render_ms: i64,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_packets_received(&self) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_packets_sent(&self) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_invalid_packets(&self) {
        self.invalid_packets.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_fragments_received(&self) {
        self.fragments_received.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_frames_completed(&self) {
        self.frames_completed.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_frames_dropped_timeout(&self) {
        self.frames_dropped_timeout.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_frames_dropped_superseded(&self) {
        self.frames_dropped_superseded
            .fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_frames_dropped_overflow(&self) {
        self.frames_dropped_overflow.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_duplicate_fragments(&self) {
        self.duplicate_fragments.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_decode_errors(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_keyframes_decoded(&self) {
        self.keyframes_decoded.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_frames_rendered(&self) {
        self.frames_rendered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_latest_complete_au_age_ms(&self, age_ms: i64) {
        self.latest_complete_au_age_ms
            .store(age_ms, Ordering::Relaxed);
    }
    pub fn set_frame_age_at_render_ms(&self, age_ms: i64) {
        self.frame_age_at_render_ms.store(age_ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            invalid_packets: self.invalid_packets.load(Ordering::Relaxed),
            fragments_received: self.fragments_received.load(Ordering::Relaxed),
            frames_completed: self.frames_completed.load(Ordering::Relaxed),
            frames_dropped_timeout: self.frames_dropped_timeout.load(Ordering::Relaxed),
            frames_dropped_superseded: self.frames_dropped_superseded.load(Ordering::Relaxed),
            frames_dropped_overflow: self.frames_dropped_overflow.load(Ordering::Relaxed),
            duplicate_fragments: self.duplicate_fragments.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            keyframes_decoded: self.keyframes_decoded.load(Ordering::Relaxed),
            frames_rendered: self.frames_rendered.load(Ordering::Relaxed),
            latest_complete_au_age_ms: self.latest_complete_au_age_ms.load(Ordering::Relaxed),
            frame_age_at_render_ms: self.frame_age_at_render_ms.load(Ordering::Relaxed),
        }
    }

    /// Backlog-detection diagnostic: if the age of the latest
    /// complete AU grows past `threshold_ms`, a hidden queue likely exists
    /// somewhere upstream. Informational only, never a state transition.
    pub fn backlog_suspected(&self, threshold_ms: i64) -> bool {
        self.latest_complete_au_age_ms.load(Ordering::Relaxed) > threshold_ms
    }
}
