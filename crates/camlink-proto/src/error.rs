use thiserror::Error;

/// Errors raised while parsing or validating a wire datagram.
///
/// Every variant here corresponds to a "drop silently, count it" case at the
/// call site — nothing in this crate panics on malformed input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("datagram too short: expected at least {expected} bytes, got {got}")]
    TooShort { expected: usize, got: usize },

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("header_len {header_len} is smaller than the common header (8 bytes)")]
    HeaderTooSmall { header_len: u16 },

    #[error("header_len {header_len} exceeds packet length {packet_len}")]
    HeaderLargerThanPacket { header_len: u16, packet_len: usize },

    #[error("unknown message type: 0x{0:02x}")]
    UnknownMessageType(u8),

    #[error("unsupported codec id: {0}")]
    UnsupportedCodec(u8),

    #[error("fragment_count is zero")]
    ZeroFragmentCount,

    #[error("fragment_index {index} is out of range for fragment_count {count}")]
    FragmentIndexOutOfRange { index: u16, count: u16 },

    #[error("payload_len {declared} does not match the actual remaining bytes {actual}")]
    PayloadLenMismatch { declared: u16, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_values() {
        let e = ProtocolError::TooShort { expected: 8, got: 3 };
        let msg = e.to_string();
        assert!(msg.contains('8'));
        assert!(msg.contains('3'));
    }
}
