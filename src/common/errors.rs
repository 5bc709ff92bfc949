use thiserror::Error;

use crate::common::types::{AnyError, GuildId};

/// Failures while turning an upload into an [`AudioFrameStream`](crate::audio::AudioFrameStream).
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("upload is {size} bytes, limit is {limit} bytes")]
    TooLarge { size: usize, limit: usize },

    #[error("unsupported audio format: {0:?}")]
    UnsupportedFormat(String),

    #[error("no audio track found in container")]
    NoTrack,

    #[error("failed to decode audio: {0}")]
    Decode(#[from] symphonia::core::errors::Error),

    #[error("failed to encode audio: {0}")]
    Encode(String),

    #[error("no audio produced")]
    NoAudio,

    #[error("failed to read audio: {0}")]
    Io(#[from] std::io::Error),

    #[error("transcode worker failed: {0}")]
    Worker(String),
}

/// Problems with a raw frame buffer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame stream contains no decodable frames")]
    Empty,

    #[error("frame of {0} bytes cannot be length-prefixed")]
    InvalidFrameLength(usize),
}

/// Voice transport failures. None of these are fatal to a running session.
#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("[{0}] voice connection was not ready in time")]
    JoinTimeout(GuildId),

    #[error("[{0}] no ready voice connection")]
    NotConnected(GuildId),

    #[error("[{guild_id}] signaling failed: {source}")]
    Signal {
        guild_id: GuildId,
        #[source]
        source: AnyError,
    },

    #[error("[{0}] operation timed out")]
    Timeout(GuildId),

    #[error("voice send failed: {0}")]
    Send(AnyError),
}

/// Frame player misuse.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlayerError {
    #[error("track list is empty")]
    NoTracks,
}
