//! Central constants for the audio path.
//!
//! These are the fixed encode parameters of the voice platform and are not
//! configurable per call.

// ── Sample / PCM ─────────────────────────────────────────────────────────────

/// Output sample rate sent to Discord (Hz).
pub const TARGET_SAMPLE_RATE: u32 = 48_000;

/// Output channel count (stereo).
pub const TARGET_CHANNELS: usize = 2;

/// Samples per channel in one 20 ms frame at 48 kHz.
pub const FRAME_SAMPLES_PER_CHANNEL: usize = 960;

/// Interleaved samples in one stereo frame (960 × 2).
pub const FRAME_SIZE_SAMPLES: usize = FRAME_SAMPLES_PER_CHANNEL * TARGET_CHANNELS;

/// Duration of one frame in milliseconds.
pub const FRAME_DURATION_MS: u64 = 20;

// ── Codec ─────────────────────────────────────────────────────────────────────

/// Opus bitrate for transcoded uploads (bits per second).
pub const OPUS_BITRATE: i32 = 64_000;

/// Upper bound for a single encoded Opus packet.
pub const MAX_OPUS_PACKET_SIZE: usize = 4_000;

/// Opus "silence" packet (a single 20 ms DTX frame).
pub const SILENCE_FRAME: [u8; 3] = [0xF8, 0xFF, 0xFE];

/// Silence frames sent on pause / after a one-shot sound, so the remote decoder
/// does not interpolate from the last audible frame.
pub const SILENCE_BURST_FRAMES: usize = 5;

// ── Upload ───────────────────────────────────────────────────────────────────

/// Uploaded audio is rejected above this size before any decoding.
pub const MAX_UPLOAD_BYTES: usize = 25 * 1_024 * 1_024;
