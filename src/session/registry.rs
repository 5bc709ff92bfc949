//! Process-wide set of focus sessions, keyed by voice channel.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use crate::{
    common::types::{ChannelId, GuildId, UserId},
    session::focus::{Session, SessionContext},
    voice::VoiceStateUpdate,
};

pub struct SessionRegistry {
    ctx: Arc<SessionContext>,
    sessions: DashMap<ChannelId, Arc<Session>>,
    /// Voice channel each human member currently sits in.
    occupants: DashMap<(GuildId, UserId), ChannelId>,
}

impl SessionRegistry {
    pub fn new(ctx: Arc<SessionContext>) -> Self {
        Self {
            ctx,
            sessions: DashMap::new(),
            occupants: DashMap::new(),
        }
    }

    pub fn get_or_create_session(&self, guild_id: GuildId, channel_id: ChannelId) -> Arc<Session> {
        self.sessions
            .entry(channel_id)
            .or_insert_with(|| {
                debug!("[{}] Creating session", channel_id);
                Arc::new(Session::new(guild_id, channel_id, self.ctx.clone()))
            })
            .clone()
    }

    pub fn get_session(&self, channel_id: ChannelId) -> Option<Arc<Session>> {
        self.sessions.get(&channel_id).map(|s| s.clone())
    }

    pub fn remove_session(&self, channel_id: ChannelId) -> Option<Arc<Session>> {
        self.sessions.remove(&channel_id).map(|(_, s)| s)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Humans currently in `channel_id`.
    pub fn occupancy(&self, channel_id: ChannelId) -> usize {
        self.occupants
            .iter()
            .filter(|entry| *entry.value() == channel_id)
            .count()
    }

    /// Replaces the guild's occupancy with a full snapshot, such as the
    /// voice states delivered with `GUILD_CREATE`. Members who joined before
    /// the bot connected are only known from here. Never closes sessions.
    pub fn seed_voice_states(&self, guild_id: GuildId, states: &[VoiceStateUpdate]) {
        self.occupants.retain(|(guild, _), _| *guild != guild_id);
        for state in states.iter().filter(|s| !s.bot && s.guild_id == guild_id) {
            if let Some(channel_id) = state.channel_id {
                self.occupants.insert((guild_id, state.user_id), channel_id);
            }
        }
        debug!(
            "[{}] Seeded {} voice occupants",
            guild_id,
            self.occupants.iter().filter(|e| e.key().0 == guild_id).count()
        );
    }

    /// Tracks human occupancy. When a member's departure leaves a channel
    /// with no humans, its session is reset and removed before this returns.
    /// Returns the emptied channel, if any.
    pub async fn on_voice_state_update(&self, update: &VoiceStateUpdate) -> Option<ChannelId> {
        if update.bot {
            return None;
        }

        let key = (update.guild_id, update.user_id);
        let previous = match update.channel_id {
            Some(channel_id) => self.occupants.insert(key, channel_id),
            None => self.occupants.remove(&key).map(|(_, c)| c),
        };

        let left = previous.filter(|&prev| Some(prev) != update.channel_id)?;
        if self.occupancy(left) > 0 {
            return None;
        }
        self.channel_emptied(left).await.then_some(left)
    }

    /// Resets and drops the channel's session. Returns whether one existed.
    pub async fn channel_emptied(&self, channel_id: ChannelId) -> bool {
        let Some(session) = self.remove_session(channel_id) else {
            return false;
        };
        session.reset().await;
        info!("[{}] Channel emptied; session closed", channel_id);
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::{
        audio::AudioFrameStream,
        common::errors::VoiceError,
        configs::SessionConfig,
        playback::FrameSink,
        session::{chimes::Chimes, panel::Phase},
        voice::VoiceControl,
    };

    const GUILD: GuildId = GuildId(1);
    const ROOM: ChannelId = ChannelId(10);
    const OTHER_ROOM: ChannelId = ChannelId(11);

    #[derive(Default)]
    struct QuietVoice {
        leaves: AtomicUsize,
    }

    #[async_trait]
    impl VoiceControl for QuietVoice {
        async fn join(&self, _guild_id: GuildId, _channel_id: ChannelId) -> Result<(), VoiceError> {
            Ok(())
        }

        async fn leave(&self, _guild_id: GuildId) {
            self.leaves.fetch_add(1, Ordering::Relaxed);
        }

        async fn play_sound(
            &self,
            guild_id: GuildId,
            _sound: &AudioFrameStream,
        ) -> Result<(), VoiceError> {
            Err(VoiceError::NotConnected(guild_id))
        }

        fn sink(&self, _guild_id: GuildId) -> Option<Arc<dyn FrameSink>> {
            None
        }
    }

    fn registry() -> (SessionRegistry, Arc<QuietVoice>) {
        let voice = Arc::new(QuietVoice::default());
        let ctx = Arc::new(SessionContext {
            voice: voice.clone(),
            panel: None,
            chimes: Arc::new(Chimes::default()),
            config: SessionConfig::default(),
        });
        (SessionRegistry::new(ctx), voice)
    }

    fn state(user: u64, channel: Option<ChannelId>) -> VoiceStateUpdate {
        VoiceStateUpdate {
            guild_id: GUILD,
            channel_id: channel,
            user_id: UserId(user),
            session_id: format!("s{user}"),
            bot: false,
        }
    }

    #[tokio::test]
    async fn one_session_per_channel() {
        let (registry, _) = registry();
        let a = registry.get_or_create_session(GUILD, ROOM);
        let b = registry.get_or_create_session(GUILD, ROOM);
        assert!(Arc::ptr_eq(&a, &b));
        registry.get_or_create_session(GUILD, OTHER_ROOM);
        assert_eq!(registry.len(), 2);

        assert!(registry.remove_session(ROOM).is_some());
        assert!(registry.get_session(ROOM).is_none());
        assert!(registry.get_session(OTHER_ROOM).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn emptied_channel_resets_and_removes_working_session() {
        let (registry, voice) = registry();
        registry.on_voice_state_update(&state(1, Some(ROOM))).await;
        registry.on_voice_state_update(&state(2, Some(ROOM))).await;

        let session = registry.get_or_create_session(GUILD, ROOM);
        session.start().await;
        assert_eq!(session.state().phase, Phase::Working);

        // one member left, one still there
        assert_eq!(registry.on_voice_state_update(&state(1, None)).await, None);
        assert!(registry.get_session(ROOM).is_some());

        // last member moves elsewhere
        let emptied = registry
            .on_voice_state_update(&state(2, Some(OTHER_ROOM)))
            .await;
        assert_eq!(emptied, Some(ROOM));
        assert!(registry.get_session(ROOM).is_none());
        assert_eq!(session.state().phase, Phase::Idle);
        assert_eq!(session.task_counts().running(), 0);
        assert_eq!(voice.leaves.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn bots_do_not_count_as_occupants() {
        let (registry, _) = registry();
        registry.on_voice_state_update(&state(1, Some(ROOM))).await;
        let mut bot = state(99, Some(ROOM));
        bot.bot = true;
        registry.on_voice_state_update(&bot).await;
        assert_eq!(registry.occupancy(ROOM), 1);

        registry.get_or_create_session(GUILD, ROOM);
        assert_eq!(
            registry.on_voice_state_update(&state(1, None)).await,
            Some(ROOM)
        );
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn emptied_channel_without_session_is_ignored() {
        let (registry, voice) = registry();
        registry.on_voice_state_update(&state(1, Some(ROOM))).await;
        assert_eq!(registry.on_voice_state_update(&state(1, None)).await, None);
        assert!(!registry.channel_emptied(ROOM).await);
        assert_eq!(voice.leaves.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn seeded_members_keep_the_channel_open() {
        let (registry, voice) = registry();
        let mut bot = state(99, Some(ROOM));
        bot.bot = true;
        registry.seed_voice_states(
            GUILD,
            &[state(1, Some(ROOM)), state(2, Some(ROOM)), state(3, None), bot],
        );
        assert_eq!(registry.occupancy(ROOM), 2);

        registry.get_or_create_session(GUILD, ROOM);
        // member 2 was never announced through an update, yet still counts
        assert_eq!(registry.on_voice_state_update(&state(1, None)).await, None);
        assert!(registry.get_session(ROOM).is_some());
        assert_eq!(
            registry.on_voice_state_update(&state(2, None)).await,
            Some(ROOM)
        );
        assert_eq!(voice.leaves.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn reseeding_replaces_only_that_guild() {
        let (registry, _) = registry();
        let mut elsewhere = state(7, Some(OTHER_ROOM));
        elsewhere.guild_id = GuildId(2);
        registry.on_voice_state_update(&elsewhere).await;
        registry.on_voice_state_update(&state(1, Some(ROOM))).await;

        registry.seed_voice_states(GUILD, &[state(5, Some(ROOM))]);
        assert_eq!(registry.occupancy(ROOM), 1);
        assert_eq!(registry.occupancy(OTHER_ROOM), 1);
        // stale member 1 is gone; their leave empties nothing
        assert_eq!(registry.on_voice_state_update(&state(1, None)).await, None);
        assert_eq!(registry.occupancy(ROOM), 1);
    }

    #[tokio::test]
    async fn staying_in_place_does_not_empty_the_channel() {
        let (registry, _) = registry();
        registry.get_or_create_session(GUILD, ROOM);
        registry.on_voice_state_update(&state(1, Some(ROOM))).await;
        // mute/deafen updates repeat the same channel
        assert_eq!(
            registry.on_voice_state_update(&state(1, Some(ROOM))).await,
            None
        );
        assert_eq!(registry.len(), 1);
    }
}
