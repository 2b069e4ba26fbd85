//! Signaling interface: the record a session publishes once STUN
//! completes and receives back from its peer, plus the `SignalingChannel`
//! trait so a binary can plug in a real rendezvous transport or (for tests
//! and LAN/loopback runs) a local stand-in. The transport carrying this
//! exchange is deliberately abstract — any request/response or
//! publish/subscribe mechanism over TLS suffices.
//!
//! Serialized with `serde` + `postcard`.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use camlink_proto::{Hello, Role};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("signaling serialization failed: {0}")]
    Serialization(#[from] postcard::Error),
    #[error("signaling channel closed")]
    Closed,
    #[error("signaling I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Published once STUN completes: identity, role, and discovered
/// endpoints, optionally with capability negotiation via `hello`. Never
/// carries video payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalingRecord {
    pub session_id: u32,
    pub nonce: u64,
    pub role: Role,
    pub srflx_endpoint: SocketAddr,
    pub local_endpoint: Option<SocketAddr>,
    pub hello: Option<Hello>,
}

impl SignalingRecord {
    pub fn to_bytes(&self) -> Result<Vec<u8>, SignalingError> {
        Ok(postcard::to_allocvec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SignalingError> {
        Ok(postcard::from_bytes(bytes)?)
    }
}

/// Publish/subscribe boundary for exchanging `SignalingRecord`s with a peer.
/// The transport backing this (TLS request/response, a pubsub topic, a file
/// for local testing) is deliberately out of scope.
pub trait SignalingChannel: Send {
    fn publish(&mut self, record: &SignalingRecord) -> Result<(), SignalingError>;
    fn try_receive(&mut self) -> Result<Option<SignalingRecord>, SignalingError>;
}

/// An in-memory loopback channel for LAN/local testing. Two
/// `LoopbackSignalingChannel` handles sharing the same queues let a test
/// or a same-host sender/receiver pair exchange records without a real
/// rendezvous service.
#[derive(Clone)]
pub struct LoopbackSignalingChannel {
    outbox: Arc<Mutex<VecDeque<SignalingRecord>>>,
    inbox: Arc<Mutex<VecDeque<SignalingRecord>>>,
}

impl LoopbackSignalingChannel {
    /// Build a connected pair: whatever one side publishes, the other side's
    /// `try_receive` observes.
    pub fn pair() -> (Self, Self) {
        let a_to_b = Arc::new(Mutex::new(VecDeque::new()));
        let b_to_a = Arc::new(Mutex::new(VecDeque::new()));
        let side_a = Self {
            outbox: a_to_b.clone(),
            inbox: b_to_a.clone(),
        };
        let side_b = Self {
            outbox: b_to_a,
            inbox: a_to_b,
        };
        (side_a, side_b)
    }
}

impl SignalingChannel for LoopbackSignalingChannel {
    fn publish(&mut self, record: &SignalingRecord) -> Result<(), SignalingError> {
        self.outbox
            .lock()
            .map_err(|_| SignalingError::Closed)?
            .push_back(record.clone());
        Ok(())
    }

    fn try_receive(&mut self) -> Result<Option<SignalingRecord>, SignalingError> {
        Ok(self
            .inbox
            .lock()
            .map_err(|_| SignalingError::Closed)?
            .pop_front())
    }
}

/// A filesystem-backed `SignalingChannel`: each side writes its own record
/// to a well-known path and polls the peer's path, without standing up a
/// real rendezvous service. Suitable for two processes sharing a filesystem
/// (same host, or a shared mount) — not a substitute for a production
/// signaling service.
pub struct FileSignalingChannel {
    own_path: PathBuf,
    peer_path: PathBuf,
}

impl FileSignalingChannel {
    /// `dir` holds one file per role; `own_role` determines which file this
    /// side writes to and which it reads from.
    pub fn new(dir: PathBuf, own_role: Role) -> Self {
        let (own_name, peer_name) = match own_role {
            Role::Sender => ("sender.record", "receiver.record"),
            Role::Receiver => ("receiver.record", "sender.record"),
        };
        Self {
            own_path: dir.join(own_name),
            peer_path: dir.join(peer_name),
        }
    }
}

impl SignalingChannel for FileSignalingChannel {
    fn publish(&mut self, record: &SignalingRecord) -> Result<(), SignalingError> {
        let bytes = record.to_bytes()?;
        // Write-then-rename keeps a concurrent reader from ever observing a
        // partially-written file.
        let tmp_path = self.own_path.with_extension("tmp");
        std::fs::write(&tmp_path, &bytes)?;
        std::fs::rename(&tmp_path, &self.own_path)?;
        Ok(())
    }

    fn try_receive(&mut self) -> Result<Option<SignalingRecord>, SignalingError> {
        match std::fs::read(&self.peer_path) {
            Ok(bytes) => Ok(Some(SignalingRecord::from_bytes(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn sample_record(session_id: u32) -> SignalingRecord {
        SignalingRecord {
            session_id,
            nonce: 42,
            role: Role::Sender,
            srflx_endpoint: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 5)), 4000),
            local_endpoint: None,
            hello: None,
        }
    }

    #[test]
    fn record_roundtrips_through_bytes() {
        let record = sample_record(7);
        let bytes = record.to_bytes().unwrap();
        let decoded = SignalingRecord::from_bytes(&bytes).unwrap();
        assert_eq!(record, decoded);
    }

    #[test]
    fn loopback_pair_delivers_in_one_direction() {
        let (mut a, mut b) = LoopbackSignalingChannel::pair();
        assert!(b.try_receive().unwrap().is_none());

        a.publish(&sample_record(1)).unwrap();
        let received = b.try_receive().unwrap().unwrap();
        assert_eq!(received.session_id, 1);
        assert!(b.try_receive().unwrap().is_none());
    }

    #[test]
    fn loopback_pair_is_bidirectional() {
        let (mut a, mut b) = LoopbackSignalingChannel::pair();
        b.publish(&sample_record(2)).unwrap();
        assert_eq!(a.try_receive().unwrap().unwrap().session_id, 2);
        assert!(a.try_receive().unwrap().is_none());
    }

    #[test]
    fn file_channel_exchanges_records_both_ways() {
        let dir = std::env::temp_dir().join(format!(
            "camlink-signaling-test-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();

        let mut sender_side = FileSignalingChannel::new(dir.clone(), Role::Sender);
        let mut receiver_side = FileSignalingChannel::new(dir.clone(), Role::Receiver);

        assert!(receiver_side.try_receive().unwrap().is_none());
        sender_side.publish(&sample_record(9)).unwrap();
        let received = receiver_side.try_receive().unwrap().unwrap();
        assert_eq!(received.session_id, 9);

        let mut receiver_record = sample_record(9);
        receiver_record.role = Role::Receiver;
        receiver_side.publish(&receiver_record).unwrap();
        let echoed = sender_side.try_receive().unwrap().unwrap();
        assert_eq!(echoed.role, Role::Receiver);

        std::fs::remove_dir_all(&dir).ok();
    }
}
