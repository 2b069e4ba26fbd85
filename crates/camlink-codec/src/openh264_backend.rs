//! Software H.264 decoder backend built on `openh264`, gated behind the
//! `openh264-decoder` feature: feed Annex-B bytes in, copy I420 planes out.
//!
//! This is a reference decoder for development and CI, not a claim that
//! software HEVC/AVC decode meets the dash-cam latency budget — a real
//! deployment plugs in the platform's hardware decoder behind
//! [`crate::DecoderBackend`] instead.

use openh264::decoder::Decoder;
use openh264::formats::YUVSource;
use openh264::OpenH264API;
use tracing::debug;

use crate::traits::{DecodeError, DecodedFrame, DecoderBackend, FrameHandle};

pub struct OpenH264Decoder {
    decoder: Decoder,
}

impl OpenH264Decoder {
    pub fn new() -> Result<Self, DecodeError> {
        let api = OpenH264API::from_source();
        let decoder =
            Decoder::new(api).map_err(|e| DecodeError::Rejected(format!("init failed: {e:?}")))?;
        Ok(Self { decoder })
    }
}

impl DecoderBackend for OpenH264Decoder {
    fn decode(
        &mut self,
        au_bytes: &[u8],
        frame_id: u32,
        ts_ms: u32,
        _is_keyframe: bool,
    ) -> Result<DecodedFrame, DecodeError> {
        match self.decoder.decode(au_bytes) {
            Ok(Some(yuv)) => {
                let (w, h) = yuv.dimension_rgb();
                let y_size = w * h;
                let uv_size = (w / 2) * (h / 2);
                let mut data = vec![0u8; y_size + uv_size * 2];

                let y_stride = yuv.y().len() / h;
                for row in 0..h {
                    let src = row * y_stride;
                    let dst = row * w;
                    data[dst..dst + w].copy_from_slice(&yuv.y()[src..src + w]);
                }

                let half_w = w / 2;
                let half_h = h / 2;
                let u_stride = yuv.u().len() / half_h;
                for row in 0..half_h {
                    let src = row * u_stride;
                    let dst = y_size + row * half_w;
                    data[dst..dst + half_w].copy_from_slice(&yuv.u()[src..src + half_w]);
                }
                let v_stride = yuv.v().len() / half_h;
                for row in 0..half_h {
                    let src = row * v_stride;
                    let dst = y_size + uv_size + row * half_w;
                    data[dst..dst + half_w].copy_from_slice(&yuv.v()[src..src + half_w]);
                }

                Ok(DecodedFrame {
                    width: w as u32,
                    height: h as u32,
                    handle: FrameHandle::CpuI420(data),
                    frame_id,
                    ts_ms,
                })
            }
            Ok(None) => Err(DecodeError::NotInitialized),
            Err(e) => {
                debug!("openh264 decode error: {:?}", e);
                Err(DecodeError::Rejected(format!("{e:?}")))
            }
        }
    }

    fn needs_keyframe_reset(&mut self) {
        // openh264 recovers on its own once a fresh IDR arrives; nothing to
        // reset on our side beyond waiting for `decode` to stop erroring.
    }
}
