//! Wire codec for the camlink realtime video transport.
//!
//! Fixed big-endian binary headers, no padding. Every message type is a
//! closed variant of [`messages::Message`], demultiplexed on `msg_type`.
//! Parsing never panics: malformed input always comes back as a
//! [`error::ProtocolError`] for the caller to count and drop.

pub mod error;
pub mod header;
pub mod messages;

pub use error::ProtocolError;
pub use header::{is_newer, is_older, CommonHeader, PROTOCOL_VERSION};
pub use messages::{Hello, IdrRequest, IdrReason, KeepAlive, Message, Probe, Role, VideoFragment};

/// Hard ceiling on one UDP datagram, chosen to stay under typical path MTUs
/// including VPN overhead.
pub const MAX_DATAGRAM_SIZE: usize = 1200;

/// Maximum `VIDEO_FRAGMENT` payload bytes once the 28-byte header is
/// subtracted from [`MAX_DATAGRAM_SIZE`].
pub const MAX_VIDEO_PAYLOAD_SIZE: usize =
    MAX_DATAGRAM_SIZE - header::HEADER_LEN_VIDEO_FRAGMENT as usize;
