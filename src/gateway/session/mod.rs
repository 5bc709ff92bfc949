use std::sync::{
    Arc,
    atomic::{AtomicI64, Ordering},
};

use futures::{SinkExt, StreamExt};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    common::types::{AnyResult, ChannelId, GuildId, UserId},
    gateway::{
        VoiceLink,
        constants::{RECONNECT_DELAY_FRESH_MS, VOICE_GATEWAY_VERSION, WRITE_TASK_SHUTDOWN_MS, op},
    },
};

pub mod backoff;
pub mod handler;
pub mod heartbeat;
pub mod types;
pub mod voice;

use self::{
    backoff::Backoff,
    types::{
        CLOSE_E2EE_REQUIRED, SessionOutcome, VoiceGatewayMessage, classify_close, map_boxed_err,
    },
};

/// Slot through which a gateway publishes its ready link (or its absence).
pub type LinkSlot = Arc<watch::Sender<Option<Arc<VoiceLink>>>>;

/// Credentials for one voice gateway session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceSessionInfo {
    pub guild_id: GuildId,
    pub user_id: UserId,
    pub channel_id: ChannelId,
    pub session_id: String,
    pub token: String,
    pub endpoint: String,
}

/// Drives one voice gateway session: connect, handshake, resume on drops.
///
/// The ready link is published into `link` once a session description
/// arrives, and cleared whenever the session is lost for good.
pub struct VoiceGateway {
    guild_id: GuildId,
    info: VoiceSessionInfo,
    link: LinkSlot,
    ping: Arc<AtomicI64>,
    cancel_token: CancellationToken,
}

impl VoiceGateway {
    pub fn new(info: VoiceSessionInfo, link: LinkSlot, cancel_token: CancellationToken) -> Self {
        Self {
            guild_id: info.guild_id,
            info,
            link,
            ping: Arc::new(AtomicI64::new(-1)),
            cancel_token,
        }
    }

    /// Last measured heartbeat round trip in ms, `-1` before the first ack.
    pub fn ping(&self) -> i64 {
        self.ping.load(Ordering::Relaxed)
    }

    pub(crate) fn publish(&self, link: Option<Arc<VoiceLink>>) {
        self.link.send_replace(link);
    }

    pub(crate) fn current_link(&self) -> Option<Arc<VoiceLink>> {
        self.link.borrow().clone()
    }

    pub async fn run(self) -> AnyResult<()> {
        let result = self.run_inner().await;
        self.publish(None);
        result
    }

    async fn run_inner(&self) -> AnyResult<()> {
        let mut backoff = Backoff::new();
        let mut is_resume = false;
        let seq_ack = Arc::new(AtomicI64::new(-1));

        loop {
            if self.cancel_token.is_cancelled() {
                return Ok(());
            }

            let outcome = self.connect(is_resume, seq_ack.clone()).await;
            if self.current_link().is_some() {
                backoff.reset();
            }

            match outcome {
                Ok(SessionOutcome::Shutdown) => {
                    debug!("[{}] Gateway shutting down cleanly", self.guild_id);
                    return Ok(());
                }
                Ok(SessionOutcome::Reconnect) => {
                    if backoff.is_exhausted() {
                        warn!("[{}] Max reconnect attempts reached", self.guild_id);
                        return Ok(());
                    }
                    let delay = backoff.next();
                    debug!(
                        "[{}] Reconnecting in {:?} (resume=true)",
                        self.guild_id, delay
                    );
                    if self.sleep_or_cancel(delay).await {
                        return Ok(());
                    }
                    is_resume = true;
                }
                Ok(SessionOutcome::Identify) => {
                    if backoff.is_exhausted() {
                        warn!("[{}] Max re-identify attempts reached", self.guild_id);
                        return Ok(());
                    }
                    self.publish(None);
                    is_resume = false;
                    seq_ack.store(-1, Ordering::Relaxed);
                    let delay = std::time::Duration::from_millis(RECONNECT_DELAY_FRESH_MS);
                    debug!(
                        "[{}] Session invalid; identifying fresh in {:?}",
                        self.guild_id, delay
                    );
                    backoff.next();
                    if self.sleep_or_cancel(delay).await {
                        return Ok(());
                    }
                }
                Err(e) => {
                    self.publish(None);
                    if backoff.is_exhausted() {
                        error!(
                            "[{}] Connection error after max attempts: {}",
                            self.guild_id, e
                        );
                        return Err(e);
                    }
                    let delay = backoff.next();
                    warn!(
                        "[{}] Connection error: {}. Retrying in {:?}",
                        self.guild_id, e, delay
                    );
                    if self.sleep_or_cancel(delay).await {
                        return Ok(());
                    }
                    is_resume = false;
                }
            }
        }
    }

    /// Returns `true` if cancelled while waiting.
    async fn sleep_or_cancel(&self, delay: std::time::Duration) -> bool {
        tokio::select! {
            _ = self.cancel_token.cancelled() => true,
            _ = tokio::time::sleep(delay) => false,
        }
    }

    async fn connect(&self, is_resume: bool, seq_ack: Arc<AtomicI64>) -> AnyResult<SessionOutcome> {
        let url = format!("wss://{}/?v={}", self.info.endpoint, VOICE_GATEWAY_VERSION);
        debug!("[{}] Connecting to voice gateway: {}", self.guild_id, url);

        let (ws_stream, _) = tokio::select! {
            _ = self.cancel_token.cancelled() => return Ok(SessionOutcome::Shutdown),
            res = tokio_tungstenite::connect_async(&url) => res.map_err(map_boxed_err)?,
        };
        let (mut write, mut read) = ws_stream.split();

        let msg = if is_resume {
            self.resume_message(seq_ack.load(Ordering::Relaxed))
        } else {
            self.identify_message()
        };

        let json = serde_json::to_string(&msg).map_err(map_boxed_err)?;
        write
            .send(Message::Text(json.into()))
            .await
            .map_err(map_boxed_err)?;

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Message>();

        // scoped to this connection so a reconnect gets a fresh writer
        let conn_cancel = self.cancel_token.child_token();
        let writer_cancel = conn_cancel.clone();
        let guild_id = self.guild_id;
        let write_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_cancel.cancelled() => break,
                    msg = rx.recv() => {
                        let Some(msg) = msg else { break };
                        if let Err(e) = write.send(msg).await {
                            warn!("[{}] WS write error: {}", guild_id, e);
                            break;
                        }
                    }
                }
            }
            let _ = write.close().await;
        });

        let mut state = handler::SessionState::new(self, tx.clone(), seq_ack.clone());

        let outcome = loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    break SessionOutcome::Shutdown;
                }
                msg = read.next() => {
                    let msg = match msg {
                        Some(Ok(msg)) => msg,
                        Some(Err(e)) => {
                            warn!("[{}] WS read error: {}", self.guild_id, e);
                            break SessionOutcome::Reconnect;
                        }
                        None => {
                            debug!("[{}] WS stream ended", self.guild_id);
                            break SessionOutcome::Reconnect;
                        }
                    };

                    match msg {
                        Message::Text(text) => {
                            if let Some(outcome) = state.handle_text(text.as_str()).await {
                                break outcome;
                            }
                        }
                        Message::Binary(bin) => {
                            debug!("[{}] Ignoring {} byte binary frame", self.guild_id, bin.len());
                        }
                        Message::Close(frame) => {
                            let (code, reason) = frame
                                .map(|cf| (cf.code.into(), cf.reason.to_string()))
                                .unwrap_or((1000u16, "No reason".into()));

                            if code == CLOSE_E2EE_REQUIRED {
                                error!(
                                    "[{}] Voice server requires end-to-end encryption (DAVE), which is not supported; giving up",
                                    self.guild_id
                                );
                            } else {
                                info!(
                                    "[{}] WS closed: code={}, reason='{}'",
                                    self.guild_id, code, reason
                                );
                            }
                            break classify_close(code);
                        }
                        _ => {}
                    }
                }
            }
        };

        drop(state);
        conn_cancel.cancel();
        drop(tx);
        let _ = tokio::time::timeout(
            std::time::Duration::from_millis(WRITE_TASK_SHUTDOWN_MS),
            write_task,
        )
        .await;

        Ok(outcome)
    }

    pub(crate) fn identify_message(&self) -> VoiceGatewayMessage {
        VoiceGatewayMessage::new(
            op::IDENTIFY,
            serde_json::json!({
                "server_id": self.guild_id,
                "user_id": self.info.user_id,
                "session_id": self.info.session_id,
                "token": self.info.token,
            }),
        )
    }

    pub(crate) fn resume_message(&self, seq_ack: i64) -> VoiceGatewayMessage {
        VoiceGatewayMessage::new(
            op::RESUME,
            serde_json::json!({
                "server_id": self.guild_id,
                "session_id": self.info.session_id,
                "token": self.info.token,
                "seq_ack": seq_ack,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> VoiceGateway {
        let info = VoiceSessionInfo {
            guild_id: GuildId(10),
            user_id: UserId(20),
            channel_id: ChannelId(30),
            session_id: "sess".into(),
            token: "tok".into(),
            endpoint: "example.invalid:443".into(),
        };
        let (tx, _) = watch::channel(None);
        VoiceGateway::new(info, Arc::new(tx), CancellationToken::new())
    }

    #[test]
    fn identify_carries_credentials_as_strings() {
        let msg = gateway().identify_message();
        assert_eq!(msg.op, op::IDENTIFY);
        assert_eq!(msg.d["server_id"], "10");
        assert_eq!(msg.d["user_id"], "20");
        assert_eq!(msg.d["session_id"], "sess");
        assert_eq!(msg.d["token"], "tok");
    }

    #[test]
    fn resume_acknowledges_sequence() {
        let msg = gateway().resume_message(17);
        assert_eq!(msg.op, op::RESUME);
        assert_eq!(msg.d["seq_ack"], 17);
        assert_eq!(msg.d["server_id"], "10");
    }

    #[tokio::test]
    async fn cancelled_gateway_exits_without_link() {
        let gateway = gateway();
        let cancel = gateway.cancel_token.clone();
        let slot = gateway.link.clone();
        cancel.cancel();
        gateway.run().await.unwrap();
        assert!(slot.borrow().is_none());
    }
}
