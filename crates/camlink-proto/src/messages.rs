use crate::error::ProtocolError;
use crate::header::{
    CommonHeader, HEADER_LEN_HELLO, HEADER_LEN_IDR_REQUEST, HEADER_LEN_KEEPALIVE,
    HEADER_LEN_PROBE, HEADER_LEN_VIDEO_FRAGMENT, MSG_HELLO, MSG_IDR_REQUEST, MSG_KEEPALIVE,
    MSG_PROBE, MSG_VIDEO_FRAGMENT, PROTOCOL_VERSION,
};

/// The one codec identifier this revision of the wire protocol understands.
pub const CODEC_H264_ANNEX_B: u8 = 1;

/// `flags` bit for `VIDEO_FRAGMENT`: the fragment belongs to a keyframe AU.
pub const FLAG_KEY: u8 = 0b0000_0001;
/// `flags` bit for `VIDEO_FRAGMENT`: the AU carries inline SPS/PPS.
pub const FLAG_SPSPPS: u8 = 0b0000_0010;

/// `reason` codes for `IDR_REQUEST`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IdrReason {
    Startup = 1,
    DecodeError = 2,
    Loss = 3,
    User = 4,
}

impl IdrReason {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Startup),
            2 => Some(Self::DecodeError),
            3 => Some(Self::Loss),
            4 => Some(Self::User),
            _ => None,
        }
    }
}

/// `role` field carried on `PROBE`, identifying which end of the session sent it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum Role {
    Sender = 0,
    Receiver = 1,
}

impl Role {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Sender),
            1 => Some(Self::Receiver),
            _ => None,
        }
    }
}

/// A fragment of one Access Unit's byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFragment {
    pub session_id: u32,
    pub stream_id: u32,
    pub frame_id: u32,
    pub frag_index: u16,
    pub frag_count: u16,
    pub ts_ms: u32,
    pub is_keyframe: bool,
    pub has_spspps: bool,
    pub codec: u8,
    pub payload: Vec<u8>,
}

impl VideoFragment {
    fn flags(&self) -> u8 {
        let mut f = 0u8;
        if self.is_keyframe {
            f |= FLAG_KEY;
        }
        if self.has_spspps {
            f |= FLAG_SPSPPS;
        }
        f
    }

    pub fn marshal(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN_VIDEO_FRAGMENT as usize + self.payload.len());
        CommonHeader {
            msg_type: MSG_VIDEO_FRAGMENT,
            version: PROTOCOL_VERSION,
            header_len: HEADER_LEN_VIDEO_FRAGMENT,
            session_id: self.session_id,
        }
        .marshal(&mut buf);
        buf.extend_from_slice(&self.stream_id.to_be_bytes());
        buf.extend_from_slice(&self.frame_id.to_be_bytes());
        buf.extend_from_slice(&self.frag_index.to_be_bytes());
        buf.extend_from_slice(&self.frag_count.to_be_bytes());
        buf.extend_from_slice(&self.ts_ms.to_be_bytes());
        buf.push(self.flags());
        buf.push(self.codec);
        buf.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse the type-specific body. `data` is the full datagram; `header`
    /// has already been validated by [`CommonHeader::parse`].
    pub fn parse(data: &[u8], header: &CommonHeader) -> Result<Self, ProtocolError> {
        if data.len() < HEADER_LEN_VIDEO_FRAGMENT as usize {
            return Err(ProtocolError::TooShort {
                expected: HEADER_LEN_VIDEO_FRAGMENT as usize,
                got: data.len(),
            });
        }
        let stream_id = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);
        let frame_id = u32::from_be_bytes([data[12], data[13], data[14], data[15]]);
        let frag_index = u16::from_be_bytes([data[16], data[17]]);
        let frag_count = u16::from_be_bytes([data[18], data[19]]);
        let ts_ms = u32::from_be_bytes([data[20], data[21], data[22], data[23]]);
        let flags = data[24];
        let codec = data[25];
        let payload_len = u16::from_be_bytes([data[26], data[27]]);

        if codec != CODEC_H264_ANNEX_B {
            return Err(ProtocolError::UnsupportedCodec(codec));
        }
        if frag_count == 0 {
            return Err(ProtocolError::ZeroFragmentCount);
        }
        if frag_index >= frag_count {
            return Err(ProtocolError::FragmentIndexOutOfRange {
                index: frag_index,
                count: frag_count,
            });
        }

        let actual_payload = data.len() - HEADER_LEN_VIDEO_FRAGMENT as usize;
        if payload_len as usize != actual_payload {
            return Err(ProtocolError::PayloadLenMismatch {
                declared: payload_len,
                actual: actual_payload,
            });
        }

        Ok(Self {
            session_id: header.session_id,
            stream_id,
            frame_id,
            frag_index,
            frag_count,
            ts_ms,
            is_keyframe: flags & FLAG_KEY != 0,
            has_spspps: flags & FLAG_SPSPPS != 0,
            codec,
            payload: data[HEADER_LEN_VIDEO_FRAGMENT as usize..].to_vec(),
        })
    }
}

/// A liveness heartbeat, carrying an RTT-probing echo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAlive {
    pub session_id: u32,
    pub ts_ms: u32,
    pub seq: u32,
    pub echo_ts_ms: u32,
}

impl KeepAlive {
    pub fn marshal(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN_KEEPALIVE as usize);
        CommonHeader {
            msg_type: MSG_KEEPALIVE,
            version: PROTOCOL_VERSION,
            header_len: HEADER_LEN_KEEPALIVE,
            session_id: self.session_id,
        }
        .marshal(&mut buf);
        buf.extend_from_slice(&self.ts_ms.to_be_bytes());
        buf.extend_from_slice(&self.seq.to_be_bytes());
        buf.extend_from_slice(&self.echo_ts_ms.to_be_bytes());
        buf
    }

    pub fn parse(data: &[u8], header: &CommonHeader) -> Result<Self, ProtocolError> {
        if data.len() < HEADER_LEN_KEEPALIVE as usize {
            return Err(ProtocolError::TooShort {
                expected: HEADER_LEN_KEEPALIVE as usize,
                got: data.len(),
            });
        }
        Ok(Self {
            session_id: header.session_id,
            ts_ms: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            seq: u32::from_be_bytes([data[12], data[13], data[14], data[15]]),
            echo_ts_ms: u32::from_be_bytes([data[16], data[17], data[18], data[19]]),
        })
    }
}

/// A request that the remote sender emit an IDR as soon as possible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdrRequest {
    pub session_id: u32,
    pub seq: u32,
    pub ts_ms: u32,
    pub reason: IdrReason,
}

impl IdrRequest {
    pub fn marshal(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN_IDR_REQUEST as usize);
        CommonHeader {
            msg_type: MSG_IDR_REQUEST,
            version: PROTOCOL_VERSION,
            header_len: HEADER_LEN_IDR_REQUEST,
            session_id: self.session_id,
        }
        .marshal(&mut buf);
        buf.extend_from_slice(&self.seq.to_be_bytes());
        buf.extend_from_slice(&self.ts_ms.to_be_bytes());
        buf.push(self.reason as u8);
        buf.extend_from_slice(&[0u8; 3]);
        buf
    }

    pub fn parse(data: &[u8], header: &CommonHeader) -> Result<Self, ProtocolError> {
        if data.len() < HEADER_LEN_IDR_REQUEST as usize {
            return Err(ProtocolError::TooShort {
                expected: HEADER_LEN_IDR_REQUEST as usize,
                got: data.len(),
            });
        }
        let reason = IdrReason::from_byte(data[16]).unwrap_or(IdrReason::Loss);
        Ok(Self {
            session_id: header.session_id,
            seq: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            ts_ms: u32::from_be_bytes([data[12], data[13], data[14], data[15]]),
            reason,
        })
    }
}

/// A hole-punching probe, exchanged during `PUNCHING`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Probe {
    pub session_id: u32,
    pub ts_ms: u32,
    pub probe_seq: u32,
    pub nonce: u64,
    pub role: Role,
    pub ack_requested: bool,
}

impl Probe {
    pub fn marshal(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN_PROBE as usize);
        CommonHeader {
            msg_type: MSG_PROBE,
            version: PROTOCOL_VERSION,
            header_len: HEADER_LEN_PROBE,
            session_id: self.session_id,
        }
        .marshal(&mut buf);
        buf.extend_from_slice(&self.ts_ms.to_be_bytes());
        buf.extend_from_slice(&self.probe_seq.to_be_bytes());
        buf.extend_from_slice(&self.nonce.to_be_bytes());
        buf.push(self.role as u8);
        buf.push(if self.ack_requested { 0b0000_0001 } else { 0 });
        buf.extend_from_slice(&[0u8; 2]);
        buf
    }

    pub fn parse(data: &[u8], header: &CommonHeader) -> Result<Self, ProtocolError> {
        if data.len() < HEADER_LEN_PROBE as usize {
            return Err(ProtocolError::TooShort {
                expected: HEADER_LEN_PROBE as usize,
                got: data.len(),
            });
        }
        let role = Role::from_byte(data[24]).unwrap_or(Role::Sender);
        Ok(Self {
            session_id: header.session_id,
            ts_ms: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            probe_seq: u32::from_be_bytes([data[12], data[13], data[14], data[15]]),
            nonce: u64::from_be_bytes([
                data[16], data[17], data[18], data[19], data[20], data[21], data[22], data[23],
            ]),
            role,
            ack_requested: data[25] & 0b0000_0001 != 0,
        })
    }
}

/// Sender capability advertisement, sent once per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Hello {
    pub session_id: u32,
    pub width: u16,
    pub height: u16,
    pub fps_x10: u16,
    pub bitrate_bps: u32,
    pub avc_profile: u8,
    pub avc_level: u8,
    pub idr_interval_frames: u32,
}

impl Hello {
    pub fn marshal(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN_HELLO as usize);
        CommonHeader {
            msg_type: MSG_HELLO,
            version: PROTOCOL_VERSION,
            header_len: HEADER_LEN_HELLO,
            session_id: self.session_id,
        }
        .marshal(&mut buf);
        buf.extend_from_slice(&self.width.to_be_bytes());
        buf.extend_from_slice(&self.height.to_be_bytes());
        buf.extend_from_slice(&self.fps_x10.to_be_bytes());
        buf.extend_from_slice(&self.bitrate_bps.to_be_bytes());
        buf.push(self.avc_profile);
        buf.push(self.avc_level);
        buf.extend_from_slice(&self.idr_interval_frames.to_be_bytes());
        buf.extend_from_slice(&[0u8; 8]);
        buf
    }

    pub fn parse(data: &[u8], header: &CommonHeader) -> Result<Self, ProtocolError> {
        if data.len() < HEADER_LEN_HELLO as usize {
            return Err(ProtocolError::TooShort {
                expected: HEADER_LEN_HELLO as usize,
                got: data.len(),
            });
        }
        Ok(Self {
            session_id: header.session_id,
            width: u16::from_be_bytes([data[8], data[9]]),
            height: u16::from_be_bytes([data[10], data[11]]),
            fps_x10: u16::from_be_bytes([data[12], data[13]]),
            bitrate_bps: u32::from_be_bytes([data[14], data[15], data[16], data[17]]),
            avc_profile: data[18],
            avc_level: data[19],
            idr_interval_frames: u32::from_be_bytes([data[20], data[21], data[22], data[23]]),
        })
    }
}

/// Closed set of message variants, demultiplexed on `msg_type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    VideoFragment(VideoFragment),
    KeepAlive(KeepAlive),
    IdrRequest(IdrRequest),
    Probe(Probe),
    Hello(Hello),
}

impl Message {
    pub fn marshal(&self) -> Vec<u8> {
        match self {
            Message::VideoFragment(m) => m.marshal(),
            Message::KeepAlive(m) => m.marshal(),
            Message::IdrRequest(m) => m.marshal(),
            Message::Probe(m) => m.marshal(),
            Message::Hello(m) => m.marshal(),
        }
    }

    pub fn session_id(&self) -> u32 {
        match self {
            Message::VideoFragment(m) => m.session_id,
            Message::KeepAlive(m) => m.session_id,
            Message::IdrRequest(m) => m.session_id,
            Message::Probe(m) => m.session_id,
            Message::Hello(m) => m.session_id,
        }
    }

    /// Validate the common header and parse the type-specific body.
    /// Does not check `session_id` against any particular session — callers
    /// in `camlink-core` apply that policy (with the punch-window exception).
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        let header = CommonHeader::parse(data)?;
        match header.msg_type {
            crate::header::MSG_VIDEO_FRAGMENT => {
                Ok(Message::VideoFragment(VideoFragment::parse(data, &header)?))
            }
            crate::header::MSG_KEEPALIVE => Ok(Message::KeepAlive(KeepAlive::parse(data, &header)?)),
            crate::header::MSG_IDR_REQUEST => {
                Ok(Message::IdrRequest(IdrRequest::parse(data, &header)?))
            }
            crate::header::MSG_PROBE => Ok(Message::Probe(Probe::parse(data, &header)?)),
            crate::header::MSG_HELLO => Ok(Message::Hello(Hello::parse(data, &header)?)),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}
