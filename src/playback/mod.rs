//! Frame-accurate playback onto a voice sink.

pub mod oneshot;
pub mod player;
pub mod sink;
#[cfg(test)]
pub(crate) mod testing;

pub use oneshot::play_once;
pub use player::FramePlayer;
pub use sink::{FrameSink, send_silence};
