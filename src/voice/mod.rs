//! Voice connection management between focus sessions and the transport.

pub mod bridge;
pub mod events;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::{
    audio::AudioFrameStream,
    common::{
        errors::VoiceError,
        types::{AnyResult, ChannelId, GuildId},
    },
    playback::FrameSink,
};

pub use bridge::{Bridge, ConnectionState};
pub use events::{VoiceServerUpdate, VoiceStateUpdate};

/// Main gateway signaling: asks Discord to move the bot's voice state.
#[async_trait]
pub trait SignalSender: Send + Sync {
    /// `channel_id = None` leaves voice.
    async fn update_voice_state(
        &self,
        guild_id: GuildId,
        channel_id: Option<ChannelId>,
        self_mute: bool,
        self_deaf: bool,
    ) -> AnyResult<()>;
}

/// The media side of a voice connection, fed by gateway events.
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    fn update_state(&self, guild_id: GuildId, channel_id: Option<ChannelId>, session_id: &str);

    /// `endpoint = None` means the voice server went away.
    fn update_server(&self, guild_id: GuildId, token: &str, endpoint: Option<&str>);

    /// Whether the guild has a ready connection negotiated for `channel_id`.
    fn is_ready(&self, guild_id: GuildId, channel_id: ChannelId) -> bool;

    /// Waits until the guild's connection is ready on `channel_id`. Returns
    /// `false` on timeout.
    async fn wait_ready(&self, guild_id: GuildId, channel_id: ChannelId, timeout: Duration) -> bool;

    fn sink(&self, guild_id: GuildId) -> Option<Arc<dyn FrameSink>>;

    async fn close(&self, guild_id: GuildId);
}

/// What a focus session needs from voice.
#[async_trait]
pub trait VoiceControl: Send + Sync {
    async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<(), VoiceError>;

    async fn leave(&self, guild_id: GuildId);

    /// Plays `sound` once and returns when it has finished.
    async fn play_sound(&self, guild_id: GuildId, sound: &AudioFrameStream)
    -> Result<(), VoiceError>;

    fn sink(&self, guild_id: GuildId) -> Option<Arc<dyn FrameSink>>;
}
