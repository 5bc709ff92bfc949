use serde::{Deserialize, Serialize};

use crate::common::types::{ChannelId, GuildId, UserId};

/// `VOICE_STATE_UPDATE` dispatch, trimmed to what voice handling reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceStateUpdate {
    pub guild_id: GuildId,
    pub channel_id: Option<ChannelId>,
    pub user_id: UserId,
    pub session_id: String,
    /// Set when the member is a bot account.
    #[serde(default)]
    pub bot: bool,
}

/// `VOICE_SERVER_UPDATE` dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceServerUpdate {
    pub guild_id: GuildId,
    pub token: String,
    /// `None` while Discord reallocates the voice server.
    pub endpoint: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_state_dispatch() {
        let json = r#"{
            "guild_id": "41771983423143937",
            "channel_id": "127121515262115840",
            "user_id": "80351110224678912",
            "session_id": "90326bd25d71d39b9ef95b299e3872ff",
            "deaf": false,
            "mute": false
        }"#;
        let update: VoiceStateUpdate = serde_json::from_str(json).unwrap();
        assert_eq!(update.guild_id, GuildId(41771983423143937));
        assert_eq!(update.channel_id, Some(ChannelId(127121515262115840)));
        assert!(!update.bot);
    }

    #[test]
    fn null_channel_means_left() {
        let json = r#"{"guild_id":"1","channel_id":null,"user_id":"2","session_id":"s","bot":true}"#;
        let update: VoiceStateUpdate = serde_json::from_str(json).unwrap();
        assert_eq!(update.channel_id, None);
        assert!(update.bot);
    }

    #[test]
    fn server_update_without_endpoint() {
        let json = r#"{"token":"abc","guild_id":"9","endpoint":null}"#;
        let update: VoiceServerUpdate = serde_json::from_str(json).unwrap();
        assert_eq!(update.endpoint, None);
        assert_eq!(update.token, "abc");
    }
}
