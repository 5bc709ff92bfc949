/// Discord Voice Gateway version to use in the WebSocket URL.
pub const VOICE_GATEWAY_VERSION: u8 = 8;

/// Maximum reconnect attempts before giving up on a voice session.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Base delay (ms) for the exponential backoff on reconnect.
pub const BACKOFF_BASE_MS: u64 = 1_000;

/// Fixed delay (ms) before a fresh Identify after a session-invalid close.
pub const RECONNECT_DELAY_FRESH_MS: u64 = 500;

/// Timeout (ms) allowed for the WS write task to shut down gracefully.
pub const WRITE_TASK_SHUTDOWN_MS: u64 = 500;

/// Heartbeat interval used if Hello omits one.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;

// ── UDP ──────────────────────────────────────────────────────────────────────

/// IP discovery request/response size.
pub const DISCOVERY_PACKET_SIZE: usize = 74;

pub const IP_DISCOVERY_TIMEOUT_SECS: u64 = 5;

pub const RTP_VERSION_BYTE: u8 = 0x80;

pub const RTP_OPUS_PAYLOAD_TYPE: u8 = 0x78;

/// RTP timestamp advance per 20 ms frame at 48 kHz.
pub const RTP_TIMESTAMP_STEP: u32 = 960;

pub const UDP_PACKET_BUF_CAPACITY: usize = 1_500;

// ── Encryption ───────────────────────────────────────────────────────────────

pub const MODE_AES256_GCM: &str = "aead_aes256_gcm_rtpsize";
pub const MODE_XSALSA20_POLY1305: &str = "xsalsa20_poly1305";

/// Encryption modes in order of preference.
pub const PREFERRED_MODES: [&str; 2] = [MODE_AES256_GCM, MODE_XSALSA20_POLY1305];

pub const DEFAULT_VOICE_MODE: &str = MODE_XSALSA20_POLY1305;

/// Voice gateway opcodes used by this client.
pub mod op {
    pub const IDENTIFY: u8 = 0;
    pub const SELECT_PROTOCOL: u8 = 1;
    pub const READY: u8 = 2;
    pub const HEARTBEAT: u8 = 3;
    pub const SESSION_DESCRIPTION: u8 = 4;
    pub const SPEAKING: u8 = 5;
    pub const HEARTBEAT_ACK: u8 = 6;
    pub const RESUME: u8 = 7;
    pub const HELLO: u8 = 8;
    pub const RESUMED: u8 = 9;
    pub const CLIENT_DISCONNECT: u8 = 13;
}
