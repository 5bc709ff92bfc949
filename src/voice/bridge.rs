//! Join/leave/play-sound on top of two cooperating voice participants.
//!
//! Signaling goes over the main gateway connection ([`SignalSender`]); the
//! media handshake is owned by a [`VoiceTransport`]. The bridge only moves
//! events between them and tracks where each guild stands.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    audio::AudioFrameStream,
    common::{
        errors::VoiceError,
        types::{ChannelId, GuildId, UserId},
    },
    configs::VoiceConfig,
    playback::{FrameSink, play_once},
    voice::{SignalSender, VoiceControl, VoiceServerUpdate, VoiceStateUpdate, VoiceTransport},
};

/// Where a guild's voice connection stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    SignalSent { channel_id: ChannelId },
    Connected { channel_id: ChannelId, ready: bool },
}

impl ConnectionState {
    pub fn channel_id(&self) -> Option<ChannelId> {
        match *self {
            Self::Disconnected => None,
            Self::SignalSent { channel_id } | Self::Connected { channel_id, .. } => {
                Some(channel_id)
            }
        }
    }
}

struct GuildConnection {
    state: ConnectionState,
    /// Identifies the join attempt that owns this entry.
    attempt: u64,
    signals_sent: u32,
}

pub struct Bridge<S, T> {
    user_id: UserId,
    signal: Arc<S>,
    transport: Arc<T>,
    config: VoiceConfig,
    guilds: DashMap<GuildId, GuildConnection>,
    attempts: AtomicU64,
}

impl<S: SignalSender, T: VoiceTransport> Bridge<S, T> {
    pub fn new(user_id: UserId, signal: Arc<S>, transport: Arc<T>, config: VoiceConfig) -> Self {
        Self {
            user_id,
            signal,
            transport,
            config,
            guilds: DashMap::new(),
            attempts: AtomicU64::new(0),
        }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn state(&self, guild_id: GuildId) -> ConnectionState {
        self.guilds
            .get(&guild_id)
            .map(|c| c.state)
            .unwrap_or(ConnectionState::Disconnected)
    }

    /// Gateway `VOICE_STATE_UPDATE`. Only the bot's own state matters here.
    pub fn on_voice_state_update(&self, update: &VoiceStateUpdate) {
        if update.user_id != self.user_id {
            return;
        }

        self.transport
            .update_state(update.guild_id, update.channel_id, &update.session_id);

        if let Some(mut conn) = self.guilds.get_mut(&update.guild_id) {
            conn.state = match (update.channel_id, conn.state) {
                (None, _) => ConnectionState::Disconnected,
                (Some(channel_id), ConnectionState::Connected { channel_id: c, ready })
                    if c == channel_id =>
                {
                    ConnectionState::Connected { channel_id, ready }
                }
                (Some(channel_id), _) => ConnectionState::Connected {
                    channel_id,
                    ready: false,
                },
            };
            debug!("[{}] Voice state now {:?}", update.guild_id, conn.state);
        }
    }

    /// Gateway `VOICE_SERVER_UPDATE`.
    pub fn on_voice_server_update(&self, update: &VoiceServerUpdate) {
        self.transport
            .update_server(update.guild_id, &update.token, update.endpoint.as_deref());
    }

    /// The transport's sink, provided it serves the channel this guild joined.
    fn ready_sink(&self, guild_id: GuildId) -> Option<Arc<dyn FrameSink>> {
        let channel_id = self.state(guild_id).channel_id()?;
        if !self.transport.is_ready(guild_id, channel_id) {
            return None;
        }
        self.transport.sink(guild_id)
    }

    fn already_joined(&self, guild_id: GuildId, channel_id: ChannelId) -> bool {
        let Some(mut conn) = self.guilds.get_mut(&guild_id) else {
            return false;
        };
        if conn.state.channel_id() != Some(channel_id)
            || !self.transport.is_ready(guild_id, channel_id)
        {
            return false;
        }
        conn.state = ConnectionState::Connected {
            channel_id,
            ready: true,
        };
        true
    }

    fn begin_attempt(&self, guild_id: GuildId, channel_id: ChannelId) -> u64 {
        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        self.guilds.insert(
            guild_id,
            GuildConnection {
                state: ConnectionState::SignalSent { channel_id },
                attempt,
                signals_sent: 0,
            },
        );
        attempt
    }

    fn is_current(&self, guild_id: GuildId, attempt: u64) -> bool {
        self.guilds
            .get(&guild_id)
            .is_some_and(|c| c.attempt == attempt)
    }

    async fn signal_join(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        attempt: u64,
    ) -> Result<(), VoiceError> {
        let signal = self
            .signal
            .update_voice_state(guild_id, Some(channel_id), false, true);
        match tokio::time::timeout(self.config.signal_timeout(), signal).await {
            Ok(Ok(())) => {}
            Ok(Err(source)) => return Err(VoiceError::Signal { guild_id, source }),
            Err(_) => {
                warn!("[{}] Join signal timed out", guild_id);
                return Err(VoiceError::Timeout(guild_id));
            }
        }

        if let Some(mut conn) = self.guilds.get_mut(&guild_id) {
            if conn.attempt == attempt {
                conn.signals_sent += 1;
            }
        }
        Ok(())
    }

    fn mark_ready(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        attempt: u64,
    ) -> Result<(), VoiceError> {
        let Some(mut conn) = self.guilds.get_mut(&guild_id) else {
            return Err(VoiceError::NotConnected(guild_id));
        };
        if conn.attempt != attempt {
            return Err(VoiceError::NotConnected(guild_id));
        }
        conn.state = ConnectionState::Connected {
            channel_id,
            ready: true,
        };
        info!(
            "[{}] Joined voice channel {} after {} signal(s)",
            guild_id, channel_id, conn.signals_sent
        );
        Ok(())
    }

    /// Second chance after the first readiness wait ran out. The connection
    /// may be healthy a moment later, so nothing is torn down here: signaling
    /// is repeated and readiness is polled over a longer window.
    async fn retry_join(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        attempt: u64,
    ) -> Result<(), VoiceError> {
        if let Some(mut conn) = self.guilds.get_mut(&guild_id) {
            if conn.attempt == attempt {
                conn.state = ConnectionState::SignalSent { channel_id };
            }
        }
        self.signal_join(guild_id, channel_id, attempt).await?;

        let deadline = Instant::now() + self.config.retry_timeout();
        loop {
            if !self.is_current(guild_id, attempt) {
                return Err(VoiceError::NotConnected(guild_id));
            }
            if self.transport.is_ready(guild_id, channel_id) {
                return self.mark_ready(guild_id, channel_id, attempt);
            }
            if Instant::now() >= deadline {
                return Err(VoiceError::JoinTimeout(guild_id));
            }
            tokio::time::sleep(self.config.ready_poll_interval()).await;
        }
    }
}

#[async_trait]
impl<S: SignalSender, T: VoiceTransport> VoiceControl for Bridge<S, T> {
    async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<(), VoiceError> {
        if self.already_joined(guild_id, channel_id) {
            debug!("[{}] Reusing voice connection to {}", guild_id, channel_id);
            return Ok(());
        }

        let attempt = self.begin_attempt(guild_id, channel_id);
        debug!("[{}] Joining voice channel {}", guild_id, channel_id);
        if let Err(e) = self.signal_join(guild_id, channel_id, attempt).await {
            self.guilds.remove_if(&guild_id, |_, c| c.attempt == attempt);
            return Err(e);
        }

        if self
            .transport
            .wait_ready(guild_id, channel_id, self.config.connect_timeout())
            .await
        {
            return self.mark_ready(guild_id, channel_id, attempt);
        }
        if !self.is_current(guild_id, attempt) {
            return Err(VoiceError::NotConnected(guild_id));
        }

        warn!(
            "[{}] Voice not ready after {:?}; signaling again",
            guild_id,
            self.config.connect_timeout()
        );
        let result = self.retry_join(guild_id, channel_id, attempt).await;
        if let Err(e) = &result {
            warn!("[{}] Join failed: {}", guild_id, e);
        }
        result
    }

    async fn leave(&self, guild_id: GuildId) {
        let Some((_, conn)) = self.guilds.remove(&guild_id) else {
            debug!("[{}] Leave for a guild with no voice connection", guild_id);
            return;
        };

        match tokio::time::timeout(
            self.config.leave_timeout(),
            self.signal.update_voice_state(guild_id, None, false, false),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("[{}] Leave signal failed: {}", guild_id, e),
            Err(_) => warn!("[{}] Leave signal timed out", guild_id),
        }

        self.transport.close(guild_id).await;
        info!("[{}] Left voice (was {:?})", guild_id, conn.state);
    }

    async fn play_sound(
        &self,
        guild_id: GuildId,
        sound: &AudioFrameStream,
    ) -> Result<(), VoiceError> {
        let sink = self
            .ready_sink(guild_id)
            .ok_or(VoiceError::NotConnected(guild_id))?;

        let budget = sound.duration() + self.config.sound_grace();
        match tokio::time::timeout(budget, play_once(sink.as_ref(), sound)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(VoiceError::Send(e)),
            Err(_) => {
                let _ = sink.set_speaking(false).await;
                Err(VoiceError::Timeout(guild_id))
            }
        }
    }

    fn sink(&self, guild_id: GuildId) -> Option<Arc<dyn FrameSink>> {
        self.ready_sink(guild_id)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicBool, AtomicUsize},
        time::Duration,
    };

    use parking_lot::Mutex;

    use super::*;
    use crate::{
        common::types::AnyResult,
        playback::testing::{RecordingSink, marked_stream},
    };

    const BOT: UserId = UserId(99);
    const GUILD: GuildId = GuildId(1);
    const CHANNEL: ChannelId = ChannelId(2);

    #[derive(Default)]
    struct MockSignal {
        calls: Mutex<Vec<(GuildId, Option<ChannelId>)>>,
        fail: AtomicBool,
        hang: AtomicBool,
    }

    #[async_trait]
    impl SignalSender for MockSignal {
        async fn update_voice_state(
            &self,
            guild_id: GuildId,
            channel_id: Option<ChannelId>,
            _self_mute: bool,
            _self_deaf: bool,
        ) -> AnyResult<()> {
            if self.hang.load(Ordering::Relaxed) {
                std::future::pending::<()>().await;
            }
            if self.fail.load(Ordering::Relaxed) {
                return Err("gateway closed".into());
            }
            self.calls.lock().push((guild_id, channel_id));
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockTransport {
        /// Channel the mock link was negotiated for, if any.
        ready_on: Mutex<Option<ChannelId>>,
        closes: AtomicUsize,
        states: Mutex<Vec<(GuildId, Option<ChannelId>, String)>>,
        servers: Mutex<Vec<(GuildId, String, Option<String>)>>,
        sink: Arc<RecordingSink>,
    }

    impl MockTransport {
        fn set_ready(&self, channel_id: Option<ChannelId>) {
            *self.ready_on.lock() = channel_id;
        }
    }

    #[async_trait]
    impl VoiceTransport for MockTransport {
        fn update_state(&self, guild_id: GuildId, channel_id: Option<ChannelId>, session_id: &str) {
            self.states
                .lock()
                .push((guild_id, channel_id, session_id.to_owned()));
        }

        fn update_server(&self, guild_id: GuildId, token: &str, endpoint: Option<&str>) {
            self.servers
                .lock()
                .push((guild_id, token.to_owned(), endpoint.map(str::to_owned)));
        }

        fn is_ready(&self, _guild_id: GuildId, channel_id: ChannelId) -> bool {
            *self.ready_on.lock() == Some(channel_id)
        }

        async fn wait_ready(&self, guild_id: GuildId, channel_id: ChannelId, timeout: Duration) -> bool {
            tokio::time::timeout(timeout, async {
                while !self.is_ready(guild_id, channel_id) {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await
            .is_ok()
        }

        fn sink(&self, _guild_id: GuildId) -> Option<Arc<dyn FrameSink>> {
            Some(self.sink.clone() as Arc<dyn FrameSink>)
        }

        async fn close(&self, _guild_id: GuildId) {
            self.set_ready(None);
            self.closes.fetch_add(1, Ordering::Relaxed);
        }
    }

    type TestBridge = Bridge<MockSignal, MockTransport>;

    fn bridge() -> (Arc<TestBridge>, Arc<MockSignal>, Arc<MockTransport>) {
        let signal = Arc::new(MockSignal::default());
        let transport = Arc::new(MockTransport::default());
        let bridge = Bridge::new(BOT, signal.clone(), transport.clone(), VoiceConfig::default());
        (Arc::new(bridge), signal, transport)
    }

    fn becomes_ready_after(transport: &Arc<MockTransport>, delay: Duration) {
        let transport = transport.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            transport.set_ready(Some(CHANNEL));
        });
    }

    #[tokio::test(start_paused = true)]
    async fn join_signals_once_and_becomes_ready() {
        let (bridge, signal, transport) = bridge();
        becomes_ready_after(&transport, Duration::from_secs(1));

        bridge.join(GUILD, CHANNEL).await.unwrap();
        assert_eq!(*signal.calls.lock(), vec![(GUILD, Some(CHANNEL))]);
        assert_eq!(
            bridge.state(GUILD),
            ConnectionState::Connected {
                channel_id: CHANNEL,
                ready: true
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn second_join_reuses_ready_connection() {
        let (bridge, signal, transport) = bridge();
        transport.set_ready(Some(CHANNEL));

        bridge.join(GUILD, CHANNEL).await.unwrap();
        bridge.join(GUILD, CHANNEL).await.unwrap();
        assert_eq!(signal.calls.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handshake_is_retried_without_close() {
        let (bridge, signal, transport) = bridge();
        // ready only after the first 10 s window has passed
        becomes_ready_after(&transport, Duration::from_secs(15));

        bridge.join(GUILD, CHANNEL).await.unwrap();
        assert_eq!(signal.calls.lock().len(), 2);
        assert_eq!(transport.closes.load(Ordering::Relaxed), 0);
        assert!(matches!(
            bridge.state(GUILD),
            ConnectionState::Connected { ready: true, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn join_times_out_after_retry_window() {
        let (bridge, signal, transport) = bridge();
        let start = Instant::now();

        let err = bridge.join(GUILD, CHANNEL).await.unwrap_err();
        assert!(matches!(err, VoiceError::JoinTimeout(g) if g == GUILD));
        assert!(start.elapsed() >= Duration::from_secs(40));
        assert_eq!(signal.calls.lock().len(), 2);
        assert_eq!(transport.closes.load(Ordering::Relaxed), 0);
        // metadata from the attempt is kept for the next join or leave
        assert_eq!(
            bridge.state(GUILD),
            ConnectionState::SignalSent { channel_id: CHANNEL }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn signal_failure_surfaces_and_resets_state() {
        let (bridge, signal, _transport) = bridge();
        signal.fail.store(true, Ordering::Relaxed);

        let err = bridge.join(GUILD, CHANNEL).await.unwrap_err();
        assert!(matches!(err, VoiceError::Signal { .. }));
        assert_eq!(bridge.state(GUILD), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_signal_is_bounded() {
        let (bridge, signal, _transport) = bridge();
        signal.hang.store(true, Ordering::Relaxed);
        let start = Instant::now();

        let err = bridge.join(GUILD, CHANNEL).await.unwrap_err();
        assert!(matches!(err, VoiceError::Timeout(g) if g == GUILD));
        let bound = VoiceConfig::default().signal_timeout();
        assert!(start.elapsed() >= bound && start.elapsed() < bound * 2);
        assert_eq!(bridge.state(GUILD), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn join_elsewhere_waits_for_the_new_channel() {
        let (bridge, signal, transport) = bridge();
        transport.set_ready(Some(CHANNEL));
        bridge.join(GUILD, CHANNEL).await.unwrap();

        let other = ChannelId(3);
        let join = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.join(GUILD, other).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!join.is_finished(), "old channel's link must not satisfy the join");
        assert_eq!(bridge.state(GUILD), ConnectionState::SignalSent { channel_id: other });
        assert!(bridge.sink(GUILD).is_none());

        transport.set_ready(Some(other));
        join.await.unwrap().unwrap();
        assert_eq!(signal.calls.lock().last(), Some(&(GUILD, Some(other))));
        assert_eq!(
            bridge.state(GUILD),
            ConnectionState::Connected {
                channel_id: other,
                ready: true
            }
        );
        assert!(bridge.sink(GUILD).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn leave_from_connected_closes_transport() {
        let (bridge, signal, transport) = bridge();
        transport.set_ready(Some(CHANNEL));
        bridge.join(GUILD, CHANNEL).await.unwrap();

        bridge.leave(GUILD).await;
        assert_eq!(signal.calls.lock().last(), Some(&(GUILD, None)));
        assert_eq!(transport.closes.load(Ordering::Relaxed), 1);
        assert_eq!(bridge.state(GUILD), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn leave_for_unknown_guild_is_a_noop() {
        let (bridge, signal, transport) = bridge();
        bridge.leave(GUILD).await;
        assert!(signal.calls.lock().is_empty());
        assert_eq!(transport.closes.load(Ordering::Relaxed), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn leave_during_join_cancels_the_join() {
        let (bridge, _signal, transport) = bridge();
        let join = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.join(GUILD, CHANNEL).await })
        };
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert!(matches!(bridge.state(GUILD), ConnectionState::SignalSent { .. }));

        bridge.leave(GUILD).await;
        let err = join.await.unwrap().unwrap_err();
        assert!(matches!(err, VoiceError::NotConnected(_)));
        assert_eq!(transport.closes.load(Ordering::Relaxed), 1);
        assert_eq!(bridge.state(GUILD), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn play_sound_requires_ready_connection() {
        let (bridge, _signal, transport) = bridge();
        let sound = marked_stream(&[1, 2]);
        assert!(matches!(
            bridge.play_sound(GUILD, &sound).await,
            Err(VoiceError::NotConnected(_))
        ));

        // a link without a join for its channel is not ours to use
        transport.set_ready(Some(CHANNEL));
        assert!(bridge.sink(GUILD).is_none());

        bridge.join(GUILD, CHANNEL).await.unwrap();
        bridge.play_sound(GUILD, &sound).await.unwrap();
        assert_eq!(transport.sink.audio_marks(), vec![1, 2]);
        assert_eq!(*transport.sink.speaking.lock(), vec![true, false]);
    }

    #[tokio::test]
    async fn only_bot_voice_state_reaches_transport() {
        let (bridge, _signal, transport) = bridge();
        let mut update = VoiceStateUpdate {
            guild_id: GUILD,
            channel_id: Some(CHANNEL),
            user_id: UserId(5),
            session_id: "human".into(),
            bot: false,
        };
        bridge.on_voice_state_update(&update);
        assert!(transport.states.lock().is_empty());

        update.user_id = BOT;
        update.session_id = "bot".into();
        bridge.on_voice_state_update(&update);
        assert_eq!(
            *transport.states.lock(),
            vec![(GUILD, Some(CHANNEL), "bot".to_owned())]
        );

        bridge.on_voice_server_update(&VoiceServerUpdate {
            guild_id: GUILD,
            token: "tok".into(),
            endpoint: Some("voice.example:443".into()),
        });
        assert_eq!(
            *transport.servers.lock(),
            vec![(GUILD, "tok".to_owned(), Some("voice.example:443".to_owned()))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn bot_state_moves_connection_state() {
        let (bridge, _signal, transport) = bridge();
        transport.set_ready(Some(CHANNEL));
        bridge.join(GUILD, CHANNEL).await.unwrap();

        bridge.on_voice_state_update(&VoiceStateUpdate {
            guild_id: GUILD,
            channel_id: None,
            user_id: BOT,
            session_id: "bot".into(),
            bot: true,
        });
        assert_eq!(bridge.state(GUILD), ConnectionState::Disconnected);
    }
}
