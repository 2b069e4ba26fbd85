pub mod error;
pub mod handshake;
pub mod liveness;
pub mod session;
pub mod signaling;
pub mod slot;
pub mod socket;
pub mod stun;
pub mod telemetry;

pub use error::CoreError;
pub use handshake::{run_direct_handshake, run_handshake, HandshakeOutcome};
pub use liveness::{Liveness, LivenessConfig};
pub use session::{
    AcceptedProbe, PeerCandidates, Session, SessionConfig, SessionState, ordered_candidate_list,
};
pub use signaling::{
    FileSignalingChannel, LoopbackSignalingChannel, SignalingChannel, SignalingError,
    SignalingRecord,
};
pub use slot::LatestSlot;
pub use socket::{SendOutcome, SocketEndpoint};
pub use stun::discover_public_endpoint;
pub use telemetry::{Telemetry, TelemetrySnapshot};
