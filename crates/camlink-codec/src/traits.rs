use thiserror::Error;

/// One displayable time unit of H.264 Annex-B bytes.
#[derive(Debug, Clone)]
pub struct AccessUnit {
    /// Annex-B bytes, inline SPS/PPS present on every keyframe.
    pub data: Vec<u8>,
    pub is_keyframe: bool,
    pub has_spspps: bool,
    /// Monotonic sender clock, milliseconds, 32-bit wrapping.
    pub ts_ms: u32,
}

/// A sequence of Access Units handed to the sender framer by the external
/// encoder. Implementations are expected to be
/// cheap to poll; a camera/encoder pipeline runs on its own thread and this
/// trait is the handoff point.
pub trait EncoderSource: Send {
    /// Pull the next Access Unit, if the encoder has produced one. Returns
    /// `None` when the encoder is (temporarily or permanently) idle — the
    /// caller must not block waiting for it.
    fn try_next_au(&mut self) -> Option<AccessUnit>;

    /// Ask the encoder to emit an IDR as soon as possible, if it exposes
    /// that control. A no-op for encoders that only support periodic IDR
    /// cadence.
    fn request_idr(&mut self);

    /// Whether the Access Unit sequence has permanently ended (as opposed
    /// to `try_next_au` returning `None` because the encoder is merely
    /// between frames). A live capture/encoder pipeline never ends; a
    /// canned/file-backed source does once played through without looping.
    fn is_exhausted(&self) -> bool {
        false
    }
}

/// Decoded pixel data, abstracted over whatever the platform decoder hands
/// back. `Cpu` is used by [`crate::NullDecoder`] and the optional
/// `openh264-decoder` backend; a platform integration exposing a
/// GPU-resident surface would add a variant here without touching the rest
/// of the transport.
#[derive(Debug, Clone)]
pub enum FrameHandle {
    /// Planar I420 (Y + U + V) pixel data.
    CpuI420(Vec<u8>),
}

/// The most recent output of the external decoder, plus pass-through timing.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub width: u32,
    pub height: u32,
    pub handle: FrameHandle,
    pub frame_id: u32,
    pub ts_ms: u32,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("decoder rejected the access unit: {0}")]
    Rejected(String),
    #[error("decoder is not initialized (no SPS/PPS seen yet)")]
    NotInitialized,
}

/// The decoder the receiver hands complete Access Units to. Implementations
/// are synchronous and called once per complete AU — the coordinator never
/// batches.
pub trait DecoderBackend: Send {
    fn decode(
        &mut self,
        au_bytes: &[u8],
        frame_id: u32,
        ts_ms: u32,
        is_keyframe: bool,
    ) -> Result<DecodedFrame, DecodeError>;

    /// Called after a fatal decode error; the next `decode()` call should
    /// expect to need a fresh keyframe before it can recover.
    fn needs_keyframe_reset(&mut self);
}
