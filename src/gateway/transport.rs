use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    common::types::{ChannelId, GuildId, UserId},
    gateway::{
        VoiceLink,
        session::{LinkSlot, VoiceGateway, VoiceSessionInfo},
    },
    playback::FrameSink,
    voice::VoiceTransport,
};

#[derive(Debug, Clone, PartialEq, Eq)]
struct ServerInfo {
    token: String,
    endpoint: String,
}

/// Upper bound for a cancelled gateway to wind down.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

struct ActiveGateway {
    info: VoiceSessionInfo,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct GuildVoice {
    channel_id: Option<ChannelId>,
    session_id: Option<String>,
    server: Option<ServerInfo>,
    active: Option<ActiveGateway>,
    link: LinkSlot,
}

impl GuildVoice {
    fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            channel_id: None,
            session_id: None,
            server: None,
            active: None,
            link: Arc::new(tx),
        }
    }

    /// Everything a voice gateway session needs, once it is all known.
    fn session_info(&self, guild_id: GuildId, user_id: UserId) -> Option<VoiceSessionInfo> {
        let server = self.server.as_ref()?;
        Some(VoiceSessionInfo {
            guild_id,
            user_id,
            channel_id: self.channel_id?,
            session_id: self.session_id.clone()?,
            token: server.token.clone(),
            endpoint: server.endpoint.clone(),
        })
    }

    fn stop_gateway(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
        }
        self.link.send_replace(None);
    }
}

/// Voice participant that owns one gateway session per guild.
pub struct GatewayTransport {
    user_id: UserId,
    guilds: DashMap<GuildId, GuildVoice>,
}

impl GatewayTransport {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            guilds: DashMap::new(),
        }
    }

    /// Starts a gateway session for the guild if credentials are complete and
    /// differ from the one already running.
    fn reconcile(&self, guild_id: GuildId, voice: &mut GuildVoice) {
        let Some(info) = voice.session_info(guild_id, self.user_id) else {
            return;
        };

        if let Some(active) = &voice.active {
            if active.info == info && !active.task.is_finished() {
                debug!("[{}] Voice credentials unchanged; keeping session", guild_id);
                return;
            }
        }

        voice.stop_gateway();
        info!(
            "[{}] Starting voice session on {} (channel {})",
            guild_id, info.endpoint, info.channel_id
        );

        let cancel = CancellationToken::new();
        let gateway = VoiceGateway::new(info.clone(), voice.link.clone(), cancel.clone());
        let task = tokio::spawn(async move {
            if let Err(e) = gateway.run().await {
                warn!("[{}] Voice session ended with error: {}", guild_id, e);
            }
        });
        voice.active = Some(ActiveGateway { info, cancel, task });
    }

    fn link(&self, guild_id: GuildId) -> Option<Arc<VoiceLink>> {
        self.guilds
            .get(&guild_id)
            .and_then(|g| g.link.borrow().clone())
    }

    pub fn guild_count(&self) -> usize {
        self.guilds.len()
    }
}

#[async_trait]
impl VoiceTransport for GatewayTransport {
    fn update_state(&self, guild_id: GuildId, channel_id: Option<ChannelId>, session_id: &str) {
        let mut voice = self.guilds.entry(guild_id).or_insert_with(GuildVoice::new);
        match channel_id {
            None => {
                debug!("[{}] Bot left voice; dropping session", guild_id);
                voice.channel_id = None;
                voice.session_id = None;
                voice.stop_gateway();
            }
            Some(channel_id) => {
                voice.channel_id = Some(channel_id);
                voice.session_id = Some(session_id.to_owned());
                self.reconcile(guild_id, &mut voice);
            }
        }
    }

    fn update_server(&self, guild_id: GuildId, token: &str, endpoint: Option<&str>) {
        let mut voice = self.guilds.entry(guild_id).or_insert_with(GuildVoice::new);
        match endpoint {
            None => {
                debug!("[{}] Voice server unavailable; waiting for a new one", guild_id);
                voice.server = None;
                voice.stop_gateway();
            }
            Some(endpoint) => {
                voice.server = Some(ServerInfo {
                    token: token.to_owned(),
                    endpoint: endpoint.to_owned(),
                });
                self.reconcile(guild_id, &mut voice);
            }
        }
    }

    fn is_ready(&self, guild_id: GuildId, channel_id: ChannelId) -> bool {
        self.link(guild_id)
            .is_some_and(|link| link.channel_id() == channel_id)
    }

    async fn wait_ready(&self, guild_id: GuildId, channel_id: ChannelId, timeout: Duration) -> bool {
        let mut rx = self
            .guilds
            .entry(guild_id)
            .or_insert_with(GuildVoice::new)
            .link
            .subscribe();

        matches!(
            tokio::time::timeout(
                timeout,
                rx.wait_for(|link| link.as_ref().is_some_and(|l| l.channel_id() == channel_id))
            )
            .await,
            Ok(Ok(_))
        )
    }

    fn sink(&self, guild_id: GuildId) -> Option<Arc<dyn FrameSink>> {
        self.link(guild_id).map(|link| link as Arc<dyn FrameSink>)
    }

    async fn close(&self, guild_id: GuildId) {
        let Some((_, mut voice)) = self.guilds.remove(&guild_id) else {
            return;
        };
        voice.link.send_replace(None);
        let Some(active) = voice.active.take() else {
            return;
        };

        active.cancel.cancel();
        let mut task = active.task;
        if tokio::time::timeout(CLOSE_TIMEOUT, &mut task).await.is_err() {
            warn!("[{}] Voice session did not stop in time; aborting", guild_id);
            task.abort();
        }
        debug!("[{}] Voice transport closed", guild_id);
    }
}
