//! Routes Discord voice dispatches to the voice bridge and session registry.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::{
    common::types::{AnyResult, ChannelId, GuildId},
    session::SessionRegistry,
    voice::{Bridge, SignalSender, VoiceServerUpdate, VoiceStateUpdate, VoiceTransport},
};

pub struct VoiceEventRouter<S, T> {
    bridge: Arc<Bridge<S, T>>,
    sessions: Arc<SessionRegistry>,
}

impl<S: SignalSender, T: VoiceTransport> VoiceEventRouter<S, T> {
    pub fn new(bridge: Arc<Bridge<S, T>>, sessions: Arc<SessionRegistry>) -> Self {
        Self { bridge, sessions }
    }

    /// Returns the channel whose session was closed because it emptied.
    pub async fn voice_state_update(&self, update: &VoiceStateUpdate) -> Option<ChannelId> {
        self.bridge.on_voice_state_update(update);
        let emptied = self.sessions.on_voice_state_update(update).await;
        if let Some(channel_id) = emptied {
            info!("[{}] Last listener left; session removed", channel_id);
        }
        emptied
    }

    pub fn voice_server_update(&self, update: &VoiceServerUpdate) {
        self.bridge.on_voice_server_update(update);
    }

    /// Handles a raw gateway dispatch by event name. Unrelated events are
    /// ignored.
    pub async fn dispatch(&self, event: &str, data: Value) -> AnyResult<()> {
        match event {
            "VOICE_STATE_UPDATE" => {
                let update = parse_voice_state(data)?;
                self.voice_state_update(&update).await;
            }
            "GUILD_CREATE" => {
                let guild_id: GuildId = serde_json::from_value(data["id"].clone())?;
                let mut states = Vec::new();
                for raw in data["voice_states"].as_array().into_iter().flatten() {
                    // entries here omit the guild they belong to
                    let mut raw = raw.clone();
                    if let Some(fields) = raw.as_object_mut() {
                        fields.insert("guild_id".into(), Value::String(guild_id.to_string()));
                    }
                    states.push(parse_voice_state(raw)?);
                }
                self.sessions.seed_voice_states(guild_id, &states);
            }
            "VOICE_SERVER_UPDATE" => {
                let update: VoiceServerUpdate = serde_json::from_value(data)?;
                self.voice_server_update(&update);
            }
            other => debug!("Ignoring dispatch {}", other),
        }
        Ok(())
    }
}

fn parse_voice_state(data: Value) -> AnyResult<VoiceStateUpdate> {
    let mut update: VoiceStateUpdate = serde_json::from_value(data.clone())?;
    // the flag lives on the nested member's user object
    if let Some(bot) = data["member"]["user"]["bot"].as_bool() {
        update.bot |= bot;
    }
    Ok(update)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::{
        common::types::UserId,
        configs::{SessionConfig, VoiceConfig},
        gateway::GatewayTransport,
        session::{Chimes, SessionContext},
    };

    struct NoopSignal;

    #[async_trait]
    impl SignalSender for NoopSignal {
        async fn update_voice_state(
            &self,
            _guild_id: GuildId,
            _channel_id: Option<ChannelId>,
            _self_mute: bool,
            _self_deaf: bool,
        ) -> AnyResult<()> {
            Ok(())
        }
    }

    fn router() -> (VoiceEventRouter<NoopSignal, GatewayTransport>, Arc<SessionRegistry>) {
        let bridge = Arc::new(Bridge::new(
            UserId(500),
            Arc::new(NoopSignal),
            Arc::new(GatewayTransport::new(UserId(500))),
            VoiceConfig::default(),
        ));
        let ctx = Arc::new(SessionContext {
            voice: bridge.clone(),
            panel: None,
            chimes: Arc::new(Chimes::default()),
            config: SessionConfig::default(),
        });
        let sessions = Arc::new(SessionRegistry::new(ctx));
        (VoiceEventRouter::new(bridge, sessions.clone()), sessions)
    }

    #[tokio::test]
    async fn member_bot_flag_is_honored() {
        let (router, sessions) = router();
        router
            .dispatch(
                "VOICE_STATE_UPDATE",
                json!({
                    "guild_id": "1",
                    "channel_id": "2",
                    "user_id": "3",
                    "session_id": "abc",
                    "member": { "user": { "id": "3", "bot": true } }
                }),
            )
            .await
            .unwrap();
        assert_eq!(sessions.occupancy(ChannelId(2)), 0);

        router
            .dispatch(
                "VOICE_STATE_UPDATE",
                json!({ "guild_id": "1", "channel_id": "2", "user_id": "4", "session_id": "def" }),
            )
            .await
            .unwrap();
        assert_eq!(sessions.occupancy(ChannelId(2)), 1);
    }

    #[tokio::test]
    async fn bot_voice_state_reaches_transport() {
        let (router, _) = router();
        router
            .dispatch(
                "VOICE_STATE_UPDATE",
                json!({ "guild_id": "1", "channel_id": "2", "user_id": "500", "session_id": "s", "bot": true }),
            )
            .await
            .unwrap();
        assert_eq!(router.bridge.transport().guild_count(), 1);
    }

    #[tokio::test]
    async fn malformed_and_unrelated_dispatches() {
        let (router, _) = router();
        assert!(router.dispatch("VOICE_SERVER_UPDATE", json!({ "token": 5 })).await.is_err());
        assert!(router.dispatch("MESSAGE_CREATE", json!({})).await.is_ok());
    }

    #[tokio::test]
    async fn guild_create_seeds_existing_listeners() {
        let (router, sessions) = router();
        router
            .dispatch(
                "GUILD_CREATE",
                json!({
                    "id": "1",
                    "voice_states": [
                        { "channel_id": "2", "user_id": "3", "session_id": "a" },
                        { "channel_id": "2", "user_id": "4", "session_id": "b",
                          "member": { "user": { "id": "4", "bot": true } } },
                        { "channel_id": "5", "user_id": "6", "session_id": "c" }
                    ]
                }),
            )
            .await
            .unwrap();
        assert_eq!(sessions.occupancy(ChannelId(2)), 1);
        assert_eq!(sessions.occupancy(ChannelId(5)), 1);

        // a guild without anyone in voice still parses
        router
            .dispatch("GUILD_CREATE", json!({ "id": "9" }))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn leaving_last_listener_closes_session() {
        let (router, sessions) = router();
        let join = VoiceStateUpdate {
            guild_id: GuildId(1),
            channel_id: Some(ChannelId(2)),
            user_id: UserId(4),
            session_id: "s".into(),
            bot: false,
        };
        router.voice_state_update(&join).await;
        sessions.get_or_create_session(GuildId(1), ChannelId(2));

        let leave = VoiceStateUpdate {
            channel_id: None,
            ..join
        };
        assert_eq!(router.voice_state_update(&leave).await, Some(ChannelId(2)));
        assert!(sessions.get_session(ChannelId(2)).is_none());
    }
}
