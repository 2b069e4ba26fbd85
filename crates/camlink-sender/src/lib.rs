//! Sender framer and the loop that drives it: AU -> ordered fragments,
//! back-pressure-as-drop, keepalive pacing, IDR_REQUEST honoring.

pub mod engine;
pub mod framer;

pub use engine::{SenderEngine, SenderEngineConfig, SenderExit};
pub use framer::Framer;
