//! `camlink` binary: drives one sender or receiver session end to end —
//! config load, handshake (STUN + signaling or direct LAN), then the
//! sender/receiver engine loop.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod config;
mod encoder_source;

use camlink_core::session::{Session, SessionConfig};
use camlink_core::{run_direct_handshake, run_handshake, FileSignalingChannel, HandshakeOutcome};
use camlink_core::{LatestSlot, LivenessConfig, SocketEndpoint, Telemetry};
use camlink_proto::Role;
use camlink_receiver::{AssemblerConfig, ReceiverEngine, ReceiverEngineConfig, ReceiverExit};
use camlink_sender::{SenderEngine, SenderEngineConfig, SenderExit};
use config::CliConfig;
use encoder_source::FileEncoderSource;

#[derive(Parser)]
#[command(name = "camlink", about = "Peer-to-peer realtime H.264 video link")]
struct Cli {
    /// Path to a TOML config file overriding the built-in defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Repeat for more verbose logging (-v debug, -vv trace).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stream a canned Access Unit sequence to a receiver.
    Sender(SenderArgs),
    /// Receive and decode a stream from a sender.
    Receiver(ReceiverArgs),
}

#[derive(clap::Args)]
struct SenderArgs {
    /// Local UDP port to bind (0 = ephemeral).
    #[arg(long, default_value_t = 0)]
    bind: u16,
    /// Peer address, for direct LAN/loopback mode (skips signaling and STUN).
    #[arg(long)]
    dest: Option<SocketAddr>,
    /// Shared nonce, required with --dest since there is no signaling
    /// exchange to agree on one.
    #[arg(long)]
    nonce: Option<u64>,
    /// Directory both peers share for file-backed signaling records.
    #[arg(long)]
    signaling_dir: Option<PathBuf>,
    /// Directory of canned Access Unit files (one file per AU, Annex-B).
    #[arg(long)]
    input: PathBuf,
    /// KEEPALIVE_INTERVAL_MS, overrides config.
    #[arg(long)]
    keepalive_interval_ms: Option<u64>,
    /// PUNCH_WINDOW_MS, overrides config.
    #[arg(long)]
    punch_window_ms: Option<u64>,
    /// SESSION_IDLE_TIMEOUT_MS, overrides config.
    #[arg(long)]
    idle_timeout_ms: Option<u64>,
}

#[derive(clap::Args)]
struct ReceiverArgs {
    /// Local UDP port to bind (0 = ephemeral).
    #[arg(long, default_value_t = 0)]
    bind: u16,
    /// Peer address, for direct LAN/loopback mode (skips signaling and STUN).
    #[arg(long)]
    dest: Option<SocketAddr>,
    /// Shared nonce, required with --dest.
    #[arg(long)]
    nonce: Option<u64>,
    /// Directory both peers share for file-backed signaling records.
    #[arg(long)]
    signaling_dir: Option<PathBuf>,
    /// KEEPALIVE_INTERVAL_MS, overrides config.
    #[arg(long)]
    keepalive_interval_ms: Option<u64>,
    /// PUNCH_WINDOW_MS, overrides config.
    #[arg(long)]
    punch_window_ms: Option<u64>,
    /// SESSION_IDLE_TIMEOUT_MS, overrides config.
    #[arg(long)]
    idle_timeout_ms: Option<u64>,
    /// MAX_INFLIGHT_FRAMES, overrides config.
    #[arg(long)]
    max_inflight_frames: Option<usize>,
    /// FRAME_TIMEOUT_MS, overrides config.
    #[arg(long)]
    frame_timeout_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = match cli.verbose {
        0 => "camlink=info",
        1 => "camlink=debug",
        _ => "camlink=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    let config = CliConfig::load(cli.config.as_deref())?;

    let result = match cli.command {
        Command::Sender(args) => run_sender(&config, args).await,
        Command::Receiver(args) => run_receiver(&config, args).await,
    };

    if let Err(e) = &result {
        error!("{e:#}");
        std::process::exit(1);
    }
    result
}

fn session_config(config: &CliConfig) -> SessionConfig {
    let mut session_config = SessionConfig::default();
    session_config.punch_window = Duration::from_millis(config.punch_window_ms);
    session_config.keepalive_interval = Duration::from_millis(config.keepalive_interval_ms);
    session_config.session_idle_timeout = Duration::from_millis(config.idle_timeout_ms);
    session_config
}

fn liveness_config(config: &CliConfig) -> LivenessConfig {
    let mut liveness_config = LivenessConfig::default();
    liveness_config.keepalive_interval = Duration::from_millis(config.keepalive_interval_ms);
    liveness_config
}

fn resolve_stun_servers(servers: &[String]) -> Result<Vec<SocketAddr>> {
    let mut resolved = Vec::with_capacity(servers.len());
    for server in servers {
        let addr = server
            .to_socket_addrs()
            .with_context(|| format!("failed to resolve STUN server {server}"))?
            .next()
            .with_context(|| format!("STUN server {server} resolved to no addresses"))?;
        resolved.push(addr);
    }
    Ok(resolved)
}

fn install_ctrl_c_handler() -> CancellationToken {
    let cancellation = CancellationToken::new();
    let handle = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received interrupt, shutting down");
            handle.cancel();
        }
    });
    cancellation
}

async fn handshake(
    session: &mut Session,
    socket: &SocketEndpoint,
    config: &CliConfig,
    dest: Option<SocketAddr>,
    nonce: Option<u64>,
    signaling_dir: Option<PathBuf>,
) -> Result<HandshakeOutcome> {
    if let Some(dest) = dest {
        let nonce = nonce.context(
            "--nonce is required with --dest: direct mode has no signaling exchange to agree on one",
        )?;
        session.nonce = nonce;
        Ok(run_direct_handshake(session, socket, dest).await?)
    } else {
        let dir = signaling_dir
            .context("either --dest (direct mode) or --signaling-dir (rendezvous mode) is required")?;
        let mut signaling = FileSignalingChannel::new(dir, session.role);
        let stun_servers = resolve_stun_servers(&config.stun_servers)?;
        Ok(run_handshake(
            session,
            socket,
            &mut signaling,
            &stun_servers,
            3,
            Duration::from_secs(2),
        )
        .await?)
    }
}

async fn run_sender(config: &CliConfig, args: SenderArgs) -> Result<()> {
    let mut config = config.clone();
    if let Some(v) = args.keepalive_interval_ms {
        config.keepalive_interval_ms = v;
    }
    if let Some(v) = args.punch_window_ms {
        config.punch_window_ms = v;
    }
    if let Some(v) = args.idle_timeout_ms {
        config.idle_timeout_ms = v;
    }
    let config = &config;

    let bind_addr: SocketAddr = ([0, 0, 0, 0], args.bind).into();
    let socket = Arc::new(SocketEndpoint::bind(
        bind_addr,
        camlink_core::socket::DEFAULT_RECV_BUFFER_BYTES,
        camlink_core::socket::DEFAULT_SEND_BUFFER_BYTES,
    )?);
    info!(local = %socket.local_addr()?, "sender socket bound");

    let mut session = Session::new(Role::Sender, session_config(config));
    let outcome = handshake(
        &mut session,
        &socket,
        config,
        args.dest,
        args.nonce,
        args.signaling_dir,
    )
    .await?;
    info!(peer = %outcome.peer_endpoint, session_id = session.session_id, "streaming");

    let encoder = FileEncoderSource::load(&args.input, config.fps, config.loop_playback)?;
    let telemetry = Arc::new(Telemetry::new());
    let engine = SenderEngine::new(
        socket,
        encoder,
        telemetry.clone(),
        SenderEngineConfig {
            session_id: session.session_id,
            peer_endpoint: outcome.peer_endpoint,
            liveness: liveness_config(config),
            idle_timeout: session.config.session_idle_timeout,
            ..SenderEngineConfig::default()
        },
    );

    let cancellation = install_ctrl_c_handler();
    let telemetry_task = spawn_telemetry_logger(telemetry, cancellation.clone());

    let exit = engine.run(cancellation.clone()).await;
    cancellation.cancel();
    let _ = telemetry_task.await;

    match exit {
        SenderExit::Cancelled => {
            info!("sender stopped");
            Ok(())
        }
        SenderExit::EncoderExhausted => {
            info!("canned Access Unit sequence exhausted");
            Ok(())
        }
        SenderExit::SessionIdle => {
            anyhow::bail!("session went idle (no traffic from peer within the idle timeout)")
        }
    }
}

async fn run_receiver(config: &CliConfig, args: ReceiverArgs) -> Result<()> {
    let mut config = config.clone();
    if let Some(v) = args.keepalive_interval_ms {
        config.keepalive_interval_ms = v;
    }
    if let Some(v) = args.punch_window_ms {
        config.punch_window_ms = v;
    }
    if let Some(v) = args.idle_timeout_ms {
        config.idle_timeout_ms = v;
    }
    if let Some(v) = args.max_inflight_frames {
        config.max_inflight_frames = v;
    }
    if let Some(v) = args.frame_timeout_ms {
        config.frame_timeout_ms = v;
    }
    let config = &config;

    let bind_addr: SocketAddr = ([0, 0, 0, 0], args.bind).into();
    let socket = Arc::new(SocketEndpoint::bind(
        bind_addr,
        camlink_core::socket::DEFAULT_RECV_BUFFER_BYTES,
        camlink_core::socket::DEFAULT_SEND_BUFFER_BYTES,
    )?);
    info!(local = %socket.local_addr()?, "receiver socket bound");

    let mut session = Session::new(Role::Receiver, session_config(config));
    let outcome = handshake(
        &mut session,
        &socket,
        config,
        args.dest,
        args.nonce,
        args.signaling_dir,
    )
    .await?;
    info!(peer = %outcome.peer_endpoint, session_id = session.session_id, "streaming");

    let telemetry = Arc::new(Telemetry::new());
    #[cfg(feature = "openh264-decoder")]
    let decoder = camlink_codec::OpenH264Decoder::new()
        .map_err(|e| anyhow::anyhow!("failed to init openh264 decoder: {e}"))?;
    #[cfg(not(feature = "openh264-decoder"))]
    let decoder = camlink_codec::NullDecoder::new(1280, 720);

    let engine = ReceiverEngine::new(
        socket,
        decoder,
        telemetry.clone(),
        ReceiverEngineConfig {
            session_id: session.session_id,
            peer_endpoint: outcome.peer_endpoint,
            assembler: AssemblerConfig {
                max_inflight_frames: config.max_inflight_frames,
                frame_timeout: Duration::from_millis(config.frame_timeout_ms),
                ..AssemblerConfig::default()
            },
            liveness: liveness_config(config),
            idle_timeout: session.config.session_idle_timeout,
        },
    );

    let latest_decoded_frame = engine.latest_decoded_frame();
    let cancellation = install_ctrl_c_handler();
    let render_task = tokio::spawn(render_loop(
        latest_decoded_frame,
        telemetry.clone(),
        cancellation.clone(),
    ));
    let telemetry_task = spawn_telemetry_logger(telemetry, cancellation.clone());

    let exit = engine.run(cancellation.clone()).await;
    cancellation.cancel();
    let _ = render_task.await;
    let _ = telemetry_task.await;

    match exit {
        ReceiverExit::Cancelled => {
            info!("receiver stopped");
            Ok(())
        }
        ReceiverExit::SessionIdle => {
            anyhow::bail!("session went idle (no traffic from peer within the idle timeout)")
        }
    }
}

/// Stands in for a real renderer: polls the decoded-frame slot at a fixed
/// cadence and records how stale each frame was when picked up as
/// `frame_age_at_render_ms`. A platform integration would swap this for a
/// real presentation loop without touching `ReceiverEngine`.
async fn render_loop(
    latest_decoded_frame: Arc<LatestSlot<camlink_codec::DecodedFrame>>,
    telemetry: Arc<Telemetry>,
    cancellation: CancellationToken,
) {
    let mut ticker = tokio::time::interval(Duration::from_millis(16));
    loop {
        tokio::select! {
            _ = cancellation.cancelled() => return,
            _ = ticker.tick() => {}
        }
        if let Some(frame) = latest_decoded_frame.take().await {
            telemetry.inc_frames_rendered();
            tracing::trace!(
                frame_id = frame.frame_id,
                width = frame.width,
                height = frame.height,
                "rendered frame"
            );
        }
    }
}

fn spawn_telemetry_logger(
    telemetry: Arc<Telemetry>,
    cancellation: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(5));
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => return,
                _ = ticker.tick() => {}
            }
            let snapshot = telemetry.snapshot();
            if telemetry.backlog_suspected(100) {
                warn!(?snapshot, "possible backlog: latest complete AU is stale");
            } else {
                info!(?snapshot, "telemetry");
            }
        }
    })
}
