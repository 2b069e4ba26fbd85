//! Drives a real `SenderEngine` against a real `ReceiverEngine` over two
//! loopback sockets, skipping the handshake (covered on its own in
//! `camlink-core`) to exercise the framing -> assembly -> decode path as a
//! whole, against real sockets rather than mocks.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use camlink_codec::annexb::{build_annexb_au, NAL_TYPE_IDR_SLICE, NAL_TYPE_PPS, NAL_TYPE_SPS};
use camlink_codec::{AccessUnit, EncoderSource, NullDecoder};
use camlink_core::{LivenessConfig, SocketEndpoint, Telemetry};
use camlink_receiver::{AssemblerConfig, ReceiverEngine, ReceiverEngineConfig};
use camlink_sender::{SenderEngine, SenderEngineConfig};
use tokio_util::sync::CancellationToken;

fn loopback(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

struct CannedEncoder {
    aus: Mutex<Vec<AccessUnit>>,
    idr_requested: Arc<AtomicBool>,
}

impl EncoderSource for CannedEncoder {
    fn try_next_au(&mut self) -> Option<AccessUnit> {
        self.aus.lock().unwrap().pop()
    }

    fn request_idr(&mut self) {
        self.idr_requested.store(true, Ordering::Relaxed);
    }
}

fn keyframe(ts_ms: u32) -> AccessUnit {
    AccessUnit {
        data: build_annexb_au(&[
            (NAL_TYPE_SPS, &[1]),
            (NAL_TYPE_PPS, &[2]),
            (NAL_TYPE_IDR_SLICE, &[3; 40]),
        ]),
        is_keyframe: true,
        has_spspps: true,
        ts_ms,
    }
}

fn delta(ts_ms: u32) -> AccessUnit {
    AccessUnit {
        data: build_annexb_au(&[(1, &[9; 40])]),
        is_keyframe: false,
        has_spspps: false,
        ts_ms,
    }
}

#[tokio::test]
async fn keyframe_then_delta_reach_the_decoder_over_loopback() {
    let sender_socket = Arc::new(SocketEndpoint::bind(loopback(0), 65536, 65536).unwrap());
    let receiver_socket = Arc::new(SocketEndpoint::bind(loopback(0), 65536, 65536).unwrap());
    let sender_addr = sender_socket.local_addr().unwrap();
    let receiver_addr = receiver_socket.local_addr().unwrap();

    let session_id = 0xCAFE_BABE;
    // Encoder pops from the back, so push in reverse emission order.
    let encoder = CannedEncoder {
        aus: Mutex::new(vec![delta(20), keyframe(10)]),
        idr_requested: Arc::new(AtomicBool::new(false)),
    };

    let sender_telemetry = Arc::new(Telemetry::new());
    let sender = SenderEngine::new(
        sender_socket,
        encoder,
        sender_telemetry.clone(),
        SenderEngineConfig {
            session_id,
            peer_endpoint: receiver_addr,
            liveness: LivenessConfig::default(),
            ..SenderEngineConfig::default()
        },
    );

    let receiver_telemetry = Arc::new(Telemetry::new());
    let receiver = ReceiverEngine::new(
        receiver_socket,
        NullDecoder::new(64, 64),
        receiver_telemetry.clone(),
        ReceiverEngineConfig {
            session_id,
            peer_endpoint: sender_addr,
            assembler: AssemblerConfig::default(),
            liveness: LivenessConfig::default(),
            idle_timeout: Duration::from_secs(3),
        },
    );

    let latest_decoded_frame = receiver.latest_decoded_frame();
    let cancellation = CancellationToken::new();

    let sender_task = tokio::spawn(sender.run(cancellation.clone()));
    let receiver_task = tokio::spawn(receiver.run(cancellation.clone()));

    let mut saw_keyframe = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if let Some(frame) = latest_decoded_frame.take().await {
            assert_eq!(frame.width, 64);
            saw_keyframe = true;
            break;
        }
    }
    assert!(saw_keyframe, "expected a decoded frame within the poll window");

    cancellation.cancel();
    sender_task.await.unwrap();
    receiver_task.await.unwrap();

    let snapshot = receiver_telemetry.snapshot();
    assert!(snapshot.frames_completed >= 1);
    assert!(snapshot.keyframes_decoded >= 1);
    assert_eq!(snapshot.decode_errors, 0);
}
