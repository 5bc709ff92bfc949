use serde::{Deserialize, Serialize};

/// Timer shape of a focus session.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    #[serde(default = "default_work_minutes")]
    pub work_minutes: u32,
    #[serde(default = "default_break_minutes")]
    pub break_minutes: u32,
    /// Work/break cycles before the session completes.
    #[serde(default = "default_max_cycles")]
    pub max_cycles: u32,
    /// Length of one timer "minute". Only shortened in tests and demos.
    #[serde(default = "default_tick_seconds")]
    pub tick_seconds: u64,
    /// Panel refresh cadence between phase transitions. Message edits are rate
    /// limited, so this stays well above one.
    #[serde(default = "default_panel_update_minutes")]
    pub panel_update_minutes: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            work_minutes: default_work_minutes(),
            break_minutes: default_break_minutes(),
            max_cycles: default_max_cycles(),
            tick_seconds: default_tick_seconds(),
            panel_update_minutes: default_panel_update_minutes(),
        }
    }
}

impl SessionConfig {
    pub fn tick(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.tick_seconds.max(1))
    }
}

fn default_work_minutes() -> u32 {
    25
}

fn default_break_minutes() -> u32 {
    5
}

fn default_max_cycles() -> u32 {
    4
}

fn default_tick_seconds() -> u64 {
    60
}

fn default_panel_update_minutes() -> u32 {
    5
}
