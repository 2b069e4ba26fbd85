//! Decode coordinator: single-slot AU -> decoded-frame handoff, the
//! `need_keyframe` FSM, and IDR-request triggering on decode stall.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use camlink_codec::{DecodeError, DecoderBackend, DecodedFrame};
use camlink_core::{LatestSlot, Telemetry};
use tracing::{info, warn};

use crate::assembler::CompleteAu;

/// At most one outstanding IDR request per this window.
pub const IDR_REQUEST_RATE_LIMIT: Duration = Duration::from_secs(1);
/// No successful decode for this long means sustained loss the assembler's
/// own timeout path missed.
pub const DECODE_STALL_THRESHOLD: Duration = Duration::from_secs(1);

/// What the coordinator wants the caller to do after processing one
/// iteration (send an IDR_REQUEST, or nothing).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorAction {
    None,
    RequestIdr(camlink_proto::IdrReason),
}

/// Owns the `latest_AU_to_decode` read-and-clear handoff (actually the
/// assembler's `latest_complete_AU`, read here), the `latest_decoded_frame`
/// single-slot output, and the `need_keyframe` FSM.
pub struct DecodeCoordinator<D: DecoderBackend> {
    decoder: D,
    need_keyframe: bool,
    latest_decoded_frame: Arc<LatestSlot<DecodedFrame>>,
    assembler_needs_idr: Arc<AtomicBool>,
    telemetry: Arc<Telemetry>,
    last_successful_decode: Option<Instant>,
    last_idr_request_at: Option<Instant>,
}

impl<D: DecoderBackend> DecodeCoordinator<D> {
    pub fn new(
        decoder: D,
        latest_decoded_frame: Arc<LatestSlot<DecodedFrame>>,
        assembler_needs_idr: Arc<AtomicBool>,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            decoder,
            need_keyframe: true,
            latest_decoded_frame,
            assembler_needs_idr,
            telemetry,
            last_successful_decode: None,
            last_idr_request_at: None,
        }
    }

    pub fn need_keyframe(&self) -> bool {
        self.need_keyframe
    }

    /// A handle to the decoded-frame output slot, for a renderer to poll
    /// independently of the decode loop.
    pub fn latest_decoded_frame(&self) -> Arc<LatestSlot<DecodedFrame>> {
        self.latest_decoded_frame.clone()
    }

    /// Process one complete AU pulled from the assembler.
    pub async fn process(&mut self, au: CompleteAu, now: Instant) -> CoordinatorAction {
        if self.need_keyframe && !au.is_keyframe {
            return self.check_stall(now);
        }

        match self
            .decoder
            .decode(&au.data, au.frame_id, au.ts_ms, au.is_keyframe)
        {
            Ok(frame) => {
                if au.is_keyframe {
                    if self.need_keyframe {
                        info!(frame_id = au.frame_id, "keyframe decoded, stream recovered");
                    }
                    self.need_keyframe = false;
                    self.telemetry.inc_keyframes_decoded();
                    self.assembler_needs_idr.store(false, Ordering::Relaxed);
                }
                self.last_successful_decode = Some(now);
                let age_ms = now
                    .saturating_duration_since(au.first_packet_time)
                    .as_millis() as i64;
                self.telemetry.set_latest_complete_au_age_ms(age_ms);
                self.latest_decoded_frame.put(frame).await;
                CoordinatorAction::None
            }
            Err(err) => {
                warn!(frame_id = au.frame_id, %err, "decode failed");
                self.telemetry.inc_decode_errors();
                self.need_keyframe = true;
                self.decoder.needs_keyframe_reset();
                self.try_request_idr(camlink_proto::IdrReason::DecodeError, now)
            }
        }
    }

    /// Emit an IDR_REQUEST if no successful decode has occurred in a while,
    /// for a session that is streaming with a known peer.
    fn check_stall(&mut self, now: Instant) -> CoordinatorAction {
        let stalled = match self.last_successful_decode {
            Some(last) => now.saturating_duration_since(last) >= DECODE_STALL_THRESHOLD,
            None => true,
        };
        if stalled {
            return self.try_request_idr(camlink_proto::IdrReason::Loss, now);
        }
        CoordinatorAction::None
    }

    fn try_request_idr(&mut self, reason: camlink_proto::IdrReason, now: Instant) -> CoordinatorAction {
        let allowed = self
            .last_idr_request_at
            .map(|t| now.saturating_duration_since(t) >= IDR_REQUEST_RATE_LIMIT)
            .unwrap_or(true);
        if !allowed {
            return CoordinatorAction::None;
        }
        self.last_idr_request_at = Some(now);
        CoordinatorAction::RequestIdr(reason)
    }

    /// Driven by a periodic ticker even when no AU arrived at all, so a
    /// total blackout (e.g. the entire first IDR lost) still triggers the
    /// decode-stall IDR_REQUEST.
    pub fn tick(&mut self, now: Instant) -> CoordinatorAction {
        self.check_stall(now)
    }
}
