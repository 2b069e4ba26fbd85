pub mod assembler;
pub mod coordinator;
pub mod engine;

pub use assembler::{
    Assembler, AssemblerConfig, CompleteAu, FragmentOutcome, DEFAULT_FRAME_TIMEOUT_MS,
    DEFAULT_MAX_INFLIGHT_FRAMES, FRAME_TIMEOUT_MS_RELAXED, MAX_AU_SIZE, MAX_INFLIGHT_FRAMES_720P,
};
pub use coordinator::{
    CoordinatorAction, DecodeCoordinator, DECODE_STALL_THRESHOLD, IDR_REQUEST_RATE_LIMIT,
};
pub use engine::{ReceiverEngine, ReceiverEngineConfig, ReceiverExit, DEFAULT_IDLE_TIMEOUT, POLL_INTERVAL};
