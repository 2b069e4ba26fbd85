use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("STUN binding timed out against every configured server")]
    StunTimeout,

    #[error("hole punch window expired before the peer proved liveness")]
    PunchTimeout,

    #[error("session idle for longer than the configured timeout")]
    SessionIdle,

    #[error("invalid bind address: {0}")]
    InvalidAddress(String),

    #[error("sending on a torn-down socket")]
    SocketTornDown,
}
