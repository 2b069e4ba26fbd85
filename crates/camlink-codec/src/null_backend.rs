use crate::annexb::{contains_idr, contains_spspps};
use crate::traits::{DecodeError, DecodedFrame, DecoderBackend, FrameHandle};

/// A `DecoderBackend` that never actually decodes pixels — it inspects NAL
/// unit headers well enough to honor the keyframe/SPS-PPS contract, and
/// returns a zeroed I420 buffer of the configured size. Used by tests that
/// want to exercise [`crate::DecoderBackend`] call patterns without linking
/// a real codec.
pub struct NullDecoder {
    width: u32,
    height: u32,
    seen_spspps: bool,
    /// When set, the next `decode()` call fails regardless of input.
    pub fail_next: bool,
}

impl NullDecoder {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            seen_spspps: false,
            fail_next: false,
        }
    }
}

impl DecoderBackend for NullDecoder {
    fn decode(
        &mut self,
        au_bytes: &[u8],
        frame_id: u32,
        ts_ms: u32,
        is_keyframe: bool,
    ) -> Result<DecodedFrame, DecodeError> {
        if self.fail_next {
            self.fail_next = false;
            return Err(DecodeError::Rejected("forced failure".into()));
        }

        if is_keyframe {
            if !contains_idr(au_bytes) || !contains_spspps(au_bytes) {
                return Err(DecodeError::Rejected(
                    "keyframe AU missing IDR slice or SPS/PPS".into(),
                ));
            }
            self.seen_spspps = true;
        }

        if !self.seen_spspps {
            return Err(DecodeError::NotInitialized);
        }

        let plane_size = (self.width * self.height) as usize;
        let chroma_size = plane_size / 4;
        let data = vec![0u8; plane_size + 2 * chroma_size];

        Ok(DecodedFrame {
            width: self.width,
            height: self.height,
            handle: FrameHandle::CpuI420(data),
            frame_id,
            ts_ms,
        })
    }

    fn needs_keyframe_reset(&mut self) {
        self.seen_spspps = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annexb::{build_annexb_au, NAL_TYPE_IDR_SLICE, NAL_TYPE_PPS, NAL_TYPE_SPS};

    fn keyframe_au() -> Vec<u8> {
        build_annexb_au(&[
            (NAL_TYPE_SPS, &[1]),
            (NAL_TYPE_PPS, &[2]),
            (NAL_TYPE_IDR_SLICE, &[3, 4]),
        ])
    }

    #[test]
    fn rejects_delta_before_keyframe() {
        let mut dec = NullDecoder::new(64, 64);
        let delta = build_annexb_au(&[(1, &[9])]);
        let err = dec.decode(&delta, 0, 0, false).unwrap_err();
        assert!(matches!(err, DecodeError::NotInitialized));
    }

    #[test]
    fn decodes_keyframe_then_delta() {
        let mut dec = NullDecoder::new(64, 64);
        let frame = dec.decode(&keyframe_au(), 1, 100, true).unwrap();
        assert_eq!(frame.width, 64);
        assert_eq!(frame.frame_id, 1);

        let delta = build_annexb_au(&[(1, &[9])]);
        let frame = dec.decode(&delta, 2, 200, false).unwrap();
        assert_eq!(frame.frame_id, 2);
    }

    #[test]
    fn needs_keyframe_reset_forces_reinit() {
        let mut dec = NullDecoder::new(32, 32);
        dec.decode(&keyframe_au(), 1, 0, true).unwrap();
        dec.needs_keyframe_reset();

        let delta = build_annexb_au(&[(1, &[9])]);
        let err = dec.decode(&delta, 2, 0, false).unwrap_err();
        assert!(matches!(err, DecodeError::NotInitialized));
    }

    #[test]
    fn rejects_malformed_keyframe() {
        let mut dec = NullDecoder::new(32, 32);
        let bad_keyframe = build_annexb_au(&[(NAL_TYPE_IDR_SLICE, &[1])]); // no SPS/PPS
        let err = dec.decode(&bad_keyframe, 1, 0, true).unwrap_err();
        assert!(matches!(err, DecodeError::Rejected(_)));
    }
}
