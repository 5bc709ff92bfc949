use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::common::types::{AnyResult, ChannelId, GuildId, MessageId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Working,
    Break,
    Paused,
    Complete,
}

impl Phase {
    /// Phases in which the timer task runs.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Working | Self::Break)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Working => "working",
            Self::Break => "break",
            Self::Paused => "paused",
            Self::Complete => "complete",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of a session, as shown on its status panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub phase: Phase,
    pub minutes_remaining: u32,
    pub current_cycle: u32,
    pub total_cycles: u32,
    pub has_music: bool,
}

/// The message a session keeps edited with its status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelRef {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
}

#[async_trait]
pub trait StatusPanel: Send + Sync {
    async fn update(&self, panel: PanelRef, snapshot: &SessionSnapshot) -> AnyResult<()>;
}
