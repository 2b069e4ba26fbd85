//! Minimal classic STUN binding request/response: header encode/decode and
//! XOR-MAPPED-ADDRESS handling only. No ICE priority/USERNAME/
//! MESSAGE-INTEGRITY/FINGERPRINT, no TURN, no long-term credentials — those
//! back ICE connectivity checks, out of scope for a server-reflexive address
//! lookup.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::error::CoreError;
use crate::socket::SocketEndpoint;

const MAGIC_COOKIE: u32 = 0x2112_A442;
const STUN_HEADER_SIZE: usize = 20;
const BINDING_REQUEST: u16 = 0x0001;
const BINDING_RESPONSE: u16 = 0x0101;
const ATTR_MAPPED_ADDRESS: u16 = 0x0001;
const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;

pub const STUN_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(1);
pub const STUN_ATTEMPTS_PER_SERVER: u32 = 3;

fn generate_transaction_id() -> [u8; 12] {
    let mut txn = [0u8; 12];
    rand::thread_rng().fill(&mut txn);
    txn
}

fn build_binding_request(transaction_id: &[u8; 12]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(STUN_HEADER_SIZE);
    buf.extend_from_slice(&BINDING_REQUEST.to_be_bytes());
    buf.extend_from_slice(&0u16.to_be_bytes()); // attribute length = 0
    buf.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
    buf.extend_from_slice(transaction_id);
    buf
}

fn is_binding_response(data: &[u8]) -> bool {
    data.len() >= STUN_HEADER_SIZE
        && u16::from_be_bytes([data[0], data[1]]) == BINDING_RESPONSE
        && u32::from_be_bytes([data[4], data[5], data[6], data[7]]) == MAGIC_COOKIE
}

fn transaction_id_of(data: &[u8]) -> Option<[u8; 12]> {
    if data.len() < STUN_HEADER_SIZE {
        return None;
    }
    let mut txn = [0u8; 12];
    txn.copy_from_slice(&data[8..20]);
    Some(txn)
}

fn decode_mapped_address(value: &[u8]) -> Option<SocketAddr> {
    if value.len() < 8 || value[1] != 0x01 {
        return None;
    }
    let port = u16::from_be_bytes([value[2], value[3]]);
    let ip = Ipv4Addr::new(value[4], value[5], value[6], value[7]);
    Some(SocketAddr::new(IpAddr::V4(ip), port))
}

fn decode_xor_mapped_address(value: &[u8]) -> Option<SocketAddr> {
    if value.len() < 8 || value[1] != 0x01 {
        return None;
    }
    let xport = u16::from_be_bytes([value[2], value[3]]);
    let port = xport ^ (MAGIC_COOKIE >> 16) as u16;
    let cookie = MAGIC_COOKIE.to_be_bytes();
    let ip = Ipv4Addr::new(
        value[4] ^ cookie[0],
        value[5] ^ cookie[1],
        value[6] ^ cookie[2],
        value[7] ^ cookie[3],
    );
    Some(SocketAddr::new(IpAddr::V4(ip), port))
}

/// Walk the TLV attribute list looking for XOR-MAPPED-ADDRESS, falling back
/// to plain MAPPED-ADDRESS.
fn parse_binding_response(data: &[u8]) -> Option<SocketAddr> {
    if !is_binding_response(data) {
        return None;
    }
    let attrs_len = u16::from_be_bytes([data[2], data[3]]) as usize;
    let attrs_end = (STUN_HEADER_SIZE + attrs_len).min(data.len());
    let mut offset = STUN_HEADER_SIZE;
    let mut mapped_fallback = None;

    while offset + 4 <= attrs_end {
        let attr_type = u16::from_be_bytes([data[offset], data[offset + 1]]);
        let attr_len = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
        let value_start = offset + 4;
        let value_end = value_start + attr_len;
        if value_end > attrs_end {
            break;
        }
        let value = &data[value_start..value_end];

        if attr_type == ATTR_XOR_MAPPED_ADDRESS {
            if let Some(addr) = decode_xor_mapped_address(value) {
                return Some(addr);
            }
        } else if attr_type == ATTR_MAPPED_ADDRESS {
            mapped_fallback = decode_mapped_address(value);
        }

        // Attributes are padded to a 4-byte boundary.
        let padded_len = (attr_len + 3) & !3;
        offset = value_start + padded_len;
    }

    mapped_fallback
}

/// Run a classic STUN binding exchange against one server, retrying up to
/// `attempts` times with `per_attempt_timeout` each.
async fn bind_against_server(
    socket: &SocketEndpoint,
    server: SocketAddr,
    attempts: u32,
    per_attempt_timeout: Duration,
) -> Option<SocketAddr> {
    for attempt in 0..attempts {
        let txn_id = generate_transaction_id();
        let request = build_binding_request(&txn_id);

        if matches!(
            socket.send_to(&request, server).await,
            crate::socket::SendOutcome::Backpressure
        ) {
            debug!(%server, attempt, "STUN request send failed");
            continue;
        }

        let mut buf = [0u8; 256];
        match socket.recv_one(&mut buf, per_attempt_timeout).await {
            Ok(Some((len, from))) if from == server => {
                let data = &buf[..len];
                if transaction_id_of(data) == Some(txn_id) {
                    if let Some(addr) = parse_binding_response(data) {
                        return Some(addr);
                    }
                }
            }
            Ok(_) => {
                debug!(%server, attempt, "STUN response missing or from unexpected source");
            }
            Err(e) => {
                debug!(%server, attempt, "STUN recv error: {e}");
            }
        }
    }
    None
}

/// Discover our public (server-reflexive) endpoint by trying each server in
/// order, `attempts` times each, until one succeeds. Fails with
/// [`CoreError::StunTimeout`] once the whole list is exhausted — fatal for
/// the session unless reconnect logic re-runs it.
pub async fn discover_public_endpoint(
    socket: &SocketEndpoint,
    servers: &[SocketAddr],
    attempts: u32,
    per_attempt_timeout: Duration,
) -> Result<SocketAddr, CoreError> {
    for &server in servers {
        if let Some(addr) = bind_against_server(socket, server, attempts, per_attempt_timeout).await
        {
            return Ok(addr);
        }
    }
    Err(CoreError::StunTimeout)
}
