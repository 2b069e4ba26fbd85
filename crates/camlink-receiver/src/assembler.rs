//! Receiver assembler: fragment reassembly with a bounded, fixed-size slot
//! table, bounded AU buffers, and always-evict supersede.
//!
//! Each slot tracks its fragments with a per-fragment bitmap rather than a
//! bare received count, so reassembly is independent of arrival order, and
//! each slot carries its own timeout so a stalled frame gets evicted and
//! flagged for a keyframe request instead of sitting forever.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use camlink_core::{LatestSlot, Telemetry};
use camlink_proto::{is_newer, is_older, VideoFragment};
use tracing::trace;

/// Default MAX_INFLIGHT_FRAMES: a compile-/init-time constant, not a
/// growable structure.
pub const DEFAULT_MAX_INFLIGHT_FRAMES: usize = 4;
/// Reference value for higher resolutions with more fragments per frame.
pub const MAX_INFLIGHT_FRAMES_720P: usize = 12;
/// Default FRAME_TIMEOUT_MS.
pub const DEFAULT_FRAME_TIMEOUT_MS: u64 = 20;
/// Reference value for larger frames / jitterier links.
pub const FRAME_TIMEOUT_MS_RELAXED: u64 = 80;
/// MAX_AU_SIZE.
pub const MAX_AU_SIZE: usize = 128 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct AssemblerConfig {
    pub max_inflight_frames: usize,
    pub frame_timeout: Duration,
    pub max_au_size: usize,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            max_inflight_frames: DEFAULT_MAX_INFLIGHT_FRAMES,
            frame_timeout: Duration::from_millis(DEFAULT_FRAME_TIMEOUT_MS),
            max_au_size: MAX_AU_SIZE,
        }
    }
}

/// A completed Access Unit, handed off (moved) to the decode coordinator.
#[derive(Debug, Clone)]
pub struct CompleteAu {
    pub frame_id: u32,
    pub ts_ms: u32,
    pub is_keyframe: bool,
    pub has_spspps: bool,
    pub data: Vec<u8>,
    pub first_packet_time: Instant,
    pub assembly_complete_time: Instant,
}

struct Slot {
    frame_id: u32,
    ts_ms: u32,
    first_seen: Instant,
    frag_count: u16,
    received_count: u16,
    received: Vec<bool>,
    buffers: Vec<Vec<u8>>,
    is_keyframe: bool,
    has_spspps: bool,
    total_len: usize,
}

impl Slot {
    fn new(frag: &VideoFragment, now: Instant) -> Self {
        let frag_count = frag.frag_count as usize;
        Self {
            frame_id: frag.frame_id,
            ts_ms: frag.ts_ms,
            first_seen: now,
            frag_count: frag.frag_count,
            received_count: 0,
            received: vec![false; frag_count],
            buffers: vec![Vec::new(); frag_count],
            is_keyframe: false,
            has_spspps: false,
            total_len: 0,
        }
    }

    fn is_complete(&self) -> bool {
        self.received_count == self.frag_count
    }

    fn into_complete_au(self, now: Instant) -> CompleteAu {
        let mut data = Vec::with_capacity(self.total_len);
        for buf in &self.buffers {
            data.extend_from_slice(buf);
        }
        CompleteAu {
            frame_id: self.frame_id,
            ts_ms: self.ts_ms,
            is_keyframe: self.is_keyframe,
            has_spspps: self.has_spspps,
            data,
            first_packet_time: self.first_seen,
            assembly_complete_time: now,
        }
    }
}

/// Outcome of feeding one fragment into the assembler, for callers that
/// want to log or assert on it (tests; telemetry is updated internally
/// regardless).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentOutcome {
    /// Accepted into an in-progress slot; no AU completed yet.
    Accepted,
    /// The same fragment index had already been received.
    Duplicate,
    /// Older than the one-frame reorder window; dropped silently.
    TooOld,
    /// Rejected (oversize AU, bad index) — counted as invalid upstream.
    Rejected,
    /// Completed an AU, which was pushed into `latest_complete_AU`.
    Completed,
}

/// Fixed-size slot table plus the single-capacity `latest_complete_AU`
/// handoff.
pub struct Assembler {
    config: AssemblerConfig,
    slots: Vec<Option<Slot>>,
    newest_frame_id: Option<u32>,
    /// Highest frame_id that has left the slot table finalized — completed
    /// or timed out, as opposed to merely supersede-evicted. A fragment for
    /// this frame_id (or older) arriving with no live slot is a late
    /// duplicate, not a fresh assembly to start.
    last_finalized_frame_id: Option<u32>,
    needs_idr: Arc<AtomicBool>,
    latest_complete_au: Arc<LatestSlot<CompleteAu>>,
    telemetry: Arc<Telemetry>,
}

impl Assembler {
    pub fn new(
        config: AssemblerConfig,
        latest_complete_au: Arc<LatestSlot<CompleteAu>>,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        let mut slots = Vec::with_capacity(config.max_inflight_frames);
        slots.resize_with(config.max_inflight_frames, || None);
        Self {
            config,
            slots,
            newest_frame_id: None,
            last_finalized_frame_id: None,
            needs_idr: Arc::new(AtomicBool::new(false)),
            latest_complete_au,
            telemetry,
        }
    }

    /// Advance `last_finalized_frame_id` monotonically; never moves
    /// backward, matching the wrap-aware `newest_frame_id` bookkeeping.
    fn mark_finalized(&mut self, frame_id: u32) {
        let advance = self
            .last_finalized_frame_id
            .map(|finalized| is_newer(frame_id, finalized))
            .unwrap_or(true);
        if advance {
            self.last_finalized_frame_id = Some(frame_id);
        }
    }

    /// A handle the decode coordinator can use to read and clear the
    /// `needs_idr` flag without owning the assembler.
    pub fn needs_idr_handle(&self) -> Arc<AtomicBool> {
        self.needs_idr.clone()
    }

    pub fn needs_idr(&self) -> bool {
        self.needs_idr.load(Ordering::Relaxed)
    }

    fn live_slot_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub async fn add_fragment(&mut self, frag: &VideoFragment, now: Instant) -> FragmentOutcome {
        self.telemetry.inc_fragments_received();

        // Step 1: one-frame reorder window. `newest - 1` is the oldest
        // frame_id still acceptable.
        if let Some(newest) = self.newest_frame_id {
            let floor = newest.wrapping_sub(1);
            if is_older(frag.frame_id, floor) {
                trace!(frame_id = frag.frame_id, "fragment too old, dropped");
                return FragmentOutcome::TooOld;
            }
        }

        // Step 2: track the newest frame_id seen and always-evict supersede.
        if self
            .newest_frame_id
            .map(|newest| is_newer(frag.frame_id, newest))
            .unwrap_or(true)
        {
            self.newest_frame_id = Some(frag.frame_id);
            self.evict_superseded(frag.frame_id);
        }

        // Step 3: locate or create the slot. Always-evict supersede just
        // destroyed any slot for a frame_id older than the new newest, and a
        // frame_id at or below `last_finalized_frame_id` has already been
        // completed or timed out — either way, a fragment that finds no
        // surviving slot for it is stale, not fresh. Refuse to resurrect a
        // slot rather than starting a new (never-completable, or
        // already-delivered) assembly.
        let existing = self
            .slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|s| s.frame_id == frag.frame_id));
        if existing.is_none()
            && (self
                .newest_frame_id
                .is_some_and(|newest| is_older(frag.frame_id, newest))
                || self
                    .last_finalized_frame_id
                    .is_some_and(|finalized| !is_newer(frag.frame_id, finalized)))
        {
            trace!(frame_id = frag.frame_id, "stale fragment, no slot to resume");
            return FragmentOutcome::TooOld;
        }
        let slot_idx = self.locate_or_create_slot(frag, now);
        let Some(slot_idx) = slot_idx else {
            self.telemetry.inc_invalid_packets();
            return FragmentOutcome::Rejected;
        };

        let slot = self.slots[slot_idx].as_mut().expect("slot just created");

        let idx = frag.frag_index as usize;
        if idx >= slot.buffers.len() {
            self.telemetry.inc_invalid_packets();
            return FragmentOutcome::Rejected;
        }

        // Step 5: duplicate fragment.
        if slot.received[idx] {
            self.telemetry.inc_duplicate_fragments();
            return FragmentOutcome::Duplicate;
        }

        // Reject fragments that would push the AU buffer past MAX_AU_SIZE.
        let prospective_len = slot.total_len + frag.payload.len();
        if prospective_len > self.config.max_au_size {
            self.telemetry.inc_invalid_packets();
            return FragmentOutcome::Rejected;
        }

        // Step 6: copy payload in at its index; concatenation happens in
        // frag_index order on completion, matching the encoder's byte
        // stream bit-for-bit.
        slot.buffers[idx] = frag.payload.clone();
        slot.received[idx] = true;
        slot.received_count += 1;
        slot.total_len = prospective_len;
        if frag.is_keyframe {
            slot.is_keyframe = true;
        }
        if frag.has_spspps {
            slot.has_spspps = true;
        }

        // Step 7: completion.
        if slot.is_complete() {
            let slot = self.slots[slot_idx].take().expect("slot present");
            self.mark_finalized(slot.frame_id);
            let complete = slot.into_complete_au(now);
            self.telemetry.inc_frames_completed();
            self.latest_complete_au.put(complete).await;
            return FragmentOutcome::Completed;
        }

        FragmentOutcome::Accepted
    }

    fn locate_or_create_slot(&mut self, frag: &VideoFragment, now: Instant) -> Option<usize> {
        if let Some(idx) = self
            .slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|s| s.frame_id == frag.frame_id))
        {
            return Some(idx);
        }
        if let Some(idx) = self.slots.iter().position(|s| s.is_none()) {
            self.slots[idx] = Some(Slot::new(frag, now));
            return Some(idx);
        }
        // Overflow: evict the oldest slot by frame_id.
        let oldest_idx = self.oldest_slot_index()?;
        self.telemetry.inc_frames_dropped_overflow();
        self.slots[oldest_idx] = Some(Slot::new(frag, now));
        Some(oldest_idx)
    }

    fn oldest_slot_index(&self) -> Option<usize> {
        let mut oldest: Option<(usize, u32)> = None;
        for (idx, slot) in self.slots.iter().enumerate() {
            if let Some(slot) = slot {
                match oldest {
                    None => oldest = Some((idx, slot.frame_id)),
                    Some((_, oldest_id)) if is_older(slot.frame_id, oldest_id) => {
                        oldest = Some((idx, slot.frame_id))
                    }
                    _ => {}
                }
            }
        }
        oldest.map(|(idx, _)| idx)
    }

    /// Always-evict: drop every incomplete slot older than `new_newest`.
    fn evict_superseded(&mut self, new_newest: u32) {
        for slot in self.slots.iter_mut() {
            let should_evict = slot
                .as_ref()
                .is_some_and(|s| is_older(s.frame_id, new_newest));
            if should_evict {
                *slot = None;
                self.telemetry.inc_frames_dropped_superseded();
            }
        }
    }

    /// Walk the slot table discarding anything older than
    /// `config.frame_timeout`. Sets `needs_idr` on every timeout — a
    /// stalled slot is the signal that packets actually went missing,
    /// unlike a fast supersede from a healthy stream.
    pub fn sweep_timeouts(&mut self, now: Instant) -> usize {
        let mut expired_frame_ids = Vec::new();
        for slot in self.slots.iter_mut() {
            let expired = slot
                .as_ref()
                .is_some_and(|s| now.saturating_duration_since(s.first_seen) > self.config.frame_timeout);
            if expired {
                expired_frame_ids.push(slot.take().expect("checked Some above").frame_id);
            }
        }
        let timed_out = expired_frame_ids.len();
        if timed_out > 0 {
            for frame_id in expired_frame_ids {
                self.mark_finalized(frame_id);
                self.telemetry.inc_frames_dropped_timeout();
            }
            self.needs_idr.store(true, Ordering::Relaxed);
        }
        timed_out
    }

    #[cfg(test)]
    fn live_slot_count_for_test(&self) -> usize {
        self.live_slot_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn fragment(frame_id: u32, frag_index: u16, frag_count: u16, payload: &[u8]) -> VideoFragment {
        VideoFragment {
            session_id: 1,
            stream_id: 1,
            frame_id,
            frag_index,
            frag_count,
            ts_ms: 0,
            is_keyframe: frag_index == 0,
            has_spspps: frag_index == 0,
            codec: 1,
            payload: payload.to_vec(),
        }
    }

    fn new_assembler(config: AssemblerConfig) -> Assembler {
        Assembler::new(
            config,
            Arc::new(LatestSlot::new()),
            Arc::new(Telemetry::new()),
        )
    }

    #[tokio::test]
    async fn single_fragment_au_completes_immediately() {
        let mut assembler = new_assembler(AssemblerConfig::default());
        let now = Instant::now();
        let frag = fragment(1, 0, 1, b"hello");
        let outcome = assembler.add_fragment(&frag, now).await;
        assert_eq!(outcome, FragmentOutcome::Completed);
    }

    #[tokio::test]
    async fn multi_fragment_au_completes_in_order_regardless_of_arrival_order() {
        let mut assembler = new_assembler(AssemblerConfig::default());
        let now = Instant::now();

        let f1 = fragment(5, 1, 2, b"WORLD");
        let outcome = assembler.add_fragment(&f1, now).await;
        assert_eq!(outcome, FragmentOutcome::Accepted);

        let f0 = fragment(5, 0, 2, b"HELLO");
        let outcome = assembler.add_fragment(&f0, now).await;
        assert_eq!(outcome, FragmentOutcome::Completed);

        let telemetry = Arc::new(Telemetry::new());
        let latest = Arc::new(LatestSlot::new());
        let mut assembler2 = Assembler::new(AssemblerConfig::default(), latest.clone(), telemetry);
        assembler2.add_fragment(&f1, now).await;
        assembler2.add_fragment(&f0, now).await;
        let complete = latest.take().await.unwrap();
        assert_eq!(complete.data, b"HELLOWORLD");
    }

    #[tokio::test]
    async fn duplicate_fragment_is_idempotent() {
        let latest = Arc::new(LatestSlot::new());
        let telemetry = Arc::new(Telemetry::new());
        let mut assembler =
            Assembler::new(AssemblerConfig::default(), latest.clone(), telemetry.clone());
        let now = Instant::now();
        let f0 = fragment(1, 0, 2, b"AB");
        let f1 = fragment(1, 1, 2, b"CD");

        assembler.add_fragment(&f0, now).await;
        let dup_outcome = assembler.add_fragment(&f0, now).await;
        assert_eq!(dup_outcome, FragmentOutcome::Duplicate);
        assembler.add_fragment(&f1, now).await;

        let complete = latest.take().await.unwrap();
        assert_eq!(complete.data, b"ABCD");
        assert_eq!(telemetry.snapshot().duplicate_fragments, 1);
    }

    #[tokio::test]
    async fn duplicate_of_a_completed_single_fragment_au_is_not_resurrected() {
        let latest = Arc::new(LatestSlot::new());
        let telemetry = Arc::new(Telemetry::new());
        let mut assembler =
            Assembler::new(AssemblerConfig::default(), latest.clone(), telemetry.clone());
        let now = Instant::now();
        let frag = fragment(1, 0, 1, b"hello");

        let outcome = assembler.add_fragment(&frag, now).await;
        assert_eq!(outcome, FragmentOutcome::Completed);
        let complete = latest.take().await.unwrap();
        assert_eq!(complete.data, b"hello");

        // A duplicate of the already-completed frame arrives before any
        // newer frame: must not spin up a fresh, never-completable slot.
        let outcome = assembler.add_fragment(&frag, now).await;
        assert_eq!(outcome, FragmentOutcome::TooOld);
        assert_eq!(assembler.live_slot_count_for_test(), 0);
        assert!(latest.take().await.is_none());
        assert_eq!(telemetry.snapshot().frames_completed, 1);
    }

    #[tokio::test]
    async fn supersede_evicts_older_incomplete_frames() {
        let mut assembler = new_assembler(AssemblerConfig::default());
        let now = Instant::now();

        // frame 100 idx0, frame 101 idx0, frame 100 idx1 (late, dropped).
        assembler.add_fragment(&fragment(100, 0, 2, b"A"), now).await;
        assembler
            .add_fragment(&fragment(101, 0, 2, b"B"), now)
            .await;
        assert_eq!(assembler.live_slot_count_for_test(), 1);

        let outcome = assembler
            .add_fragment(&fragment(100, 1, 2, b"late"), now)
            .await;
        assert_eq!(outcome, FragmentOutcome::TooOld);
        assert_eq!(
            assembler.telemetry.snapshot().frames_dropped_superseded,
            1
        );
        assert!(!assembler.needs_idr());
    }

    #[tokio::test]
    async fn timeout_discards_slot_and_requests_idr() {
        let mut config = AssemblerConfig::default();
        config.frame_timeout = Duration::from_millis(1);
        let mut assembler = new_assembler(config);
        let now = Instant::now();
        assembler
            .add_fragment(&fragment(1, 0, 2, b"partial"), now)
            .await;

        let later = now + Duration::from_millis(5);
        let timed_out = assembler.sweep_timeouts(later);
        assert_eq!(timed_out, 1);
        assert!(assembler.needs_idr());
        assert_eq!(assembler.telemetry.snapshot().frames_dropped_timeout, 1);
    }

    #[tokio::test]
    async fn overflow_evicts_oldest_slot_by_frame_id() {
        let mut config = AssemblerConfig::default();
        config.max_inflight_frames = 2;
        let mut assembler = new_assembler(config);
        let now = Instant::now();

        assembler.add_fragment(&fragment(1, 0, 2, b"a"), now).await;
        assembler.add_fragment(&fragment(2, 0, 2, b"b"), now).await;
        assembler.add_fragment(&fragment(3, 0, 2, b"c"), now).await;

        assert_eq!(assembler.live_slot_count_for_test(), 2);
        assert_eq!(assembler.telemetry.snapshot().frames_dropped_overflow, 1);
    }

    #[tokio::test]
    async fn frame_id_wrap_around_is_handled() {
        let mut assembler = new_assembler(AssemblerConfig::default());
        let now = Instant::now();

        assembler
            .add_fragment(&fragment(u32::MAX - 1, 0, 1, b"a"), now)
            .await;
        assembler
            .add_fragment(&fragment(u32::MAX, 0, 1, b"b"), now)
            .await;
        let outcome = assembler.add_fragment(&fragment(0, 0, 1, b"c"), now).await;
        assert_eq!(outcome, FragmentOutcome::Completed);
        assert_eq!(assembler.newest_frame_id, Some(0));
    }

    #[tokio::test]
    async fn oversized_au_is_rejected() {
        let mut config = AssemblerConfig::default();
        config.max_au_size = 4;
        let mut assembler = new_assembler(config);
        let now = Instant::now();
        let outcome = assembler
            .add_fragment(&fragment(1, 0, 2, b"too many bytes"), now)
            .await;
        assert_eq!(outcome, FragmentOutcome::Rejected);
    }

}
