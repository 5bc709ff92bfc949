pub mod constants;
pub mod encoder;
pub mod format;
pub mod frames;
pub mod resample;
pub mod transcode;

pub use format::AudioFormat;
pub use frames::{AudioFrameStream, FrameIter, FrameWriter, PlaybackCursor, read_frame};
pub use transcode::{transcode, transcode_async, transcode_file};
