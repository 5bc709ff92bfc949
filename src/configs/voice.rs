use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct VoiceConfig {
    /// The bot's own user id; voice states for other users are not forwarded
    /// to the transport.
    #[serde(default)]
    pub user_id: u64,
    /// First readiness wait after signaling. Matches the connect timeout of
    /// typical voice clients.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Readiness polling window after the signaling retry.
    #[serde(default = "default_retry_timeout_ms")]
    pub retry_timeout_ms: u64,
    #[serde(default = "default_ready_poll_interval_ms")]
    pub ready_poll_interval_ms: u64,
    /// Upper bound for one join signal on the main gateway.
    #[serde(default = "default_signal_timeout_ms")]
    pub signal_timeout_ms: u64,
    #[serde(default = "default_leave_timeout_ms")]
    pub leave_timeout_ms: u64,
    /// Extra time allowed on top of a one-shot sound's own length.
    #[serde(default = "default_sound_grace_ms")]
    pub sound_grace_ms: u64,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            user_id: 0,
            connect_timeout_ms: default_connect_timeout_ms(),
            retry_timeout_ms: default_retry_timeout_ms(),
            ready_poll_interval_ms: default_ready_poll_interval_ms(),
            signal_timeout_ms: default_signal_timeout_ms(),
            leave_timeout_ms: default_leave_timeout_ms(),
            sound_grace_ms: default_sound_grace_ms(),
        }
    }
}

impl VoiceConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn retry_timeout(&self) -> Duration {
        Duration::from_millis(self.retry_timeout_ms)
    }

    pub fn ready_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ready_poll_interval_ms.max(10))
    }

    pub fn signal_timeout(&self) -> Duration {
        Duration::from_millis(self.signal_timeout_ms)
    }

    pub fn leave_timeout(&self) -> Duration {
        Duration::from_millis(self.leave_timeout_ms)
    }

    pub fn sound_grace(&self) -> Duration {
        Duration::from_millis(self.sound_grace_ms)
    }
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_retry_timeout_ms() -> u64 {
    30_000
}

fn default_ready_poll_interval_ms() -> u64 {
    250
}

fn default_signal_timeout_ms() -> u64 {
    5_000
}

fn default_leave_timeout_ms() -> u64 {
    5_000
}

fn default_sound_grace_ms() -> u64 {
    5_000
}
