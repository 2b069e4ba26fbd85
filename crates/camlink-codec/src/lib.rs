//! Encoder/decoder interface boundary. The camera, the H.264 encoder, and
//! the platform hardware decoder are external collaborators — this crate
//! only defines the traits the transport calls across that boundary, plus
//! fixtures for exercising them in tests.

pub mod annexb;
mod null_backend;
mod traits;

#[cfg(feature = "openh264-decoder")]
mod openh264_backend;

pub use null_backend::NullDecoder;
pub use traits::{AccessUnit, DecodeError, DecodedFrame, DecoderBackend, EncoderSource, FrameHandle};

#[cfg(feature = "openh264-decoder")]
pub use openh264_backend::OpenH264Decoder;
