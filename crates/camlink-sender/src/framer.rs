//! Sender framer: splits one Access Unit into ordered, MTU-sized
//! `VIDEO_FRAGMENT` datagrams, fitting a 1200-byte datagram budget and a
//! 28-byte `VIDEO_FRAGMENT` header, with keyframe/SPS-PPS state carried in
//! a `flags` bitfield on each fragment rather than a separate message type.

use camlink_codec::AccessUnit;
use camlink_proto::{VideoFragment, CODEC_H264_ANNEX_B};

/// Wire datagram budget: 1200 bytes total, minus the 28-byte
/// `VIDEO_FRAGMENT` header.
pub const MAX_DATAGRAM_BYTES: usize = 1200;
pub const PAYLOAD_MAX: usize = MAX_DATAGRAM_BYTES - 28;

/// `stream_id` is fixed to 1 in the current protocol;
/// parsers must accept any value, but this is the only value the sender
/// ever emits.
pub const STREAM_ID: u32 = 1;

/// Assigns monotonically increasing (wrapping) `frame_id`s and splits each
/// Access Unit into fragments no larger than [`PAYLOAD_MAX`] bytes of
/// payload.
pub struct Framer {
    next_frame_id: u32,
}

impl Framer {
    pub fn new() -> Self {
        Self { next_frame_id: 0 }
    }

    /// Split `au` into ordered fragments carrying the next `frame_id`.
    /// `ts_ms` is the sender's monotonic clock reading at send time, not
    /// anything carried on `au`.
    pub fn frame(&mut self, au: &AccessUnit, session_id: u32, ts_ms: u32) -> Vec<VideoFragment> {
        let frame_id = self.next_frame_id;
        self.next_frame_id = self.next_frame_id.wrapping_add(1);

        let total_len = au.data.len();
        let frag_count = total_len.div_ceil(PAYLOAD_MAX).max(1);

        (0..frag_count)
            .map(|i| {
                let start = i * PAYLOAD_MAX;
                let end = (start + PAYLOAD_MAX).min(total_len);
                VideoFragment {
                    session_id,
                    stream_id: STREAM_ID,
                    frame_id,
                    frag_index: i as u16,
                    frag_count: frag_count as u16,
                    ts_ms,
                    is_keyframe: au.is_keyframe,
                    has_spspps: au.has_spspps,
                    codec: CODEC_H264_ANNEX_B,
                    payload: au.data[start..end].to_vec(),
                }
            })
            .collect()
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn au(len: usize, is_keyframe: bool) -> AccessUnit {
        AccessUnit {
            data: vec![0xAB; len],
            is_keyframe,
            has_spspps: is_keyframe,
            ts_ms: 0,
        }
    }

    #[test]
    fn single_fragment_for_small_au() {
        let mut framer = Framer::new();
        let fragments = framer.frame(&au(100, false), 1, 1000);
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].frag_count, 1);
        assert_eq!(fragments[0].frag_index, 0);
        assert_eq!(fragments[0].payload.len(), 100);
    }

    #[test]
    fn multi_fragment_au_splits_at_payload_max() {
        let mut framer = Framer::new();
        let fragments = framer.frame(&au(PAYLOAD_MAX + 1, true), 1, 0);
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].payload.len(), PAYLOAD_MAX);
        assert_eq!(fragments[1].payload.len(), 1);
        assert!(fragments.iter().all(|f| f.is_keyframe));
        assert!(fragments.iter().all(|f| f.has_spspps));
        for (i, f) in fragments.iter().enumerate() {
            assert_eq!(f.frag_index, i as u16);
            assert_eq!(f.frag_count, 2);
        }
    }

    #[test]
    fn every_fragment_fits_the_datagram_budget() {
        let mut framer = Framer::new();
        let fragments = framer.frame(&au(5000, false), 1, 0);
        for f in &fragments {
            assert!(28 + f.payload.len() <= MAX_DATAGRAM_BYTES);
        }
    }

    #[test]
    fn frame_id_increments_and_wraps() {
        let mut framer = Framer::new();
        framer.next_frame_id = u32::MAX;
        let first = framer.frame(&au(10, false), 1, 0);
        assert_eq!(first[0].frame_id, u32::MAX);
        let second = framer.frame(&au(10, false), 1, 0);
        assert_eq!(second[0].frame_id, 0);
    }

    #[test]
    fn concatenated_payloads_reproduce_original_bytes() {
        let mut framer = Framer::new();
        let original: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
        let fragments = framer.frame(
            &AccessUnit {
                data: original.clone(),
                is_keyframe: false,
                has_spspps: false,
                ts_ms: 0,
            },
            1,
            0,
        );
        let mut reassembled = Vec::new();
        for f in &fragments {
            reassembled.extend_from_slice(&f.payload);
        }
        assert_eq!(reassembled, original);
    }
}
