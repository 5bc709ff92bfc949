use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::types::AnyError;

#[derive(Serialize, Deserialize, Debug)]
pub struct VoiceGatewayMessage {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<i64>,
}

impl VoiceGatewayMessage {
    pub fn new(op: u8, d: Value) -> Self {
        Self { op, d, seq: None }
    }
}

/// Outcome of a single WS session, telling the outer loop what to do next.
#[derive(Debug, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Reconnectable disconnect; try Op 7 resume.
    Reconnect,
    /// Session invalid; start over with a fresh Op 0 Identify.
    Identify,
    /// Fatal close or cancellation; stop entirely.
    Shutdown,
}

/// Close codes that allow Op-7 resume.
///
/// `1006` is a *local* abnormal-close marker set by the WebSocket library and
/// is handled in the read-error arm, not here.
pub fn is_reconnectable_close(code: u16) -> bool {
    matches!(code, 4009 | 4015)
}

/// Close codes that require a fresh Identify (Op 0) instead of Resume (Op 7).
pub fn is_reidentify_close(code: u16) -> bool {
    matches!(code, 4006)
}

/// Close codes that mean the session is dead and must not be retried.
///
/// - `4004`: Authentication failed
/// - `4014`: Disconnected (channel deleted, kicked, or moved away)
/// - `4017`: End-to-end encryption required, which this client does not speak
pub fn is_fatal_close(code: u16) -> bool {
    matches!(code, 4004 | 4014 | CLOSE_E2EE_REQUIRED)
}

/// The voice server only accepts end-to-end encrypted (DAVE) sessions.
pub const CLOSE_E2EE_REQUIRED: u16 = 4017;

/// Maps a close code to what the outer loop should do next.
pub fn classify_close(code: u16) -> SessionOutcome {
    if is_reidentify_close(code) {
        SessionOutcome::Identify
    } else if is_fatal_close(code) {
        SessionOutcome::Shutdown
    } else {
        SessionOutcome::Reconnect
    }
}

/// Converts any `Display`-able value into the project's boxed error type.
#[inline]
pub fn map_boxed_err<E: std::fmt::Display>(e: E) -> AnyError {
    Box::new(std::io::Error::other(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_codes_map_to_outcomes() {
        assert_eq!(classify_close(4015), SessionOutcome::Reconnect);
        assert_eq!(classify_close(4009), SessionOutcome::Reconnect);
        assert_eq!(classify_close(4006), SessionOutcome::Identify);
        assert_eq!(classify_close(4004), SessionOutcome::Shutdown);
        assert_eq!(classify_close(4014), SessionOutcome::Shutdown);
        assert_eq!(classify_close(CLOSE_E2EE_REQUIRED), SessionOutcome::Shutdown);
        assert_eq!(classify_close(1000), SessionOutcome::Reconnect);
    }

    #[test]
    fn message_parses_with_sequence() {
        let msg: VoiceGatewayMessage =
            serde_json::from_str(r#"{"op":8,"d":{"heartbeat_interval":41250},"seq":12}"#).unwrap();
        assert_eq!(msg.op, 8);
        assert_eq!(msg.seq, Some(12));
        assert_eq!(msg.d["heartbeat_interval"], 41250);
    }

    #[test]
    fn outgoing_message_omits_sequence() {
        let json = serde_json::to_string(&VoiceGatewayMessage::new(3, serde_json::json!({}))).unwrap();
        assert_eq!(json, r#"{"op":3,"d":{}}"#);
    }
}
