use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::{
    common::types::{AnyResult, ChannelId, GuildId},
    gateway::{
        UdpBackend,
        constants::op,
        session::types::{VoiceGatewayMessage, map_boxed_err},
    },
    playback::FrameSink,
};

/// A voice connection that finished its handshake and can carry audio.
///
/// Frames go out over UDP; the speaking flag goes over the gateway socket,
/// which is swapped in place when the session resumes on a new connection.
pub struct VoiceLink {
    guild_id: GuildId,
    channel_id: ChannelId,
    ssrc: u32,
    udp: tokio::sync::Mutex<UdpBackend>,
    ws_tx: parking_lot::Mutex<UnboundedSender<Message>>,
    speaking: AtomicBool,
}

impl VoiceLink {
    pub fn new(
        guild_id: GuildId,
        channel_id: ChannelId,
        udp: UdpBackend,
        ws_tx: UnboundedSender<Message>,
    ) -> Self {
        Self {
            guild_id,
            channel_id,
            ssrc: udp.ssrc(),
            udp: tokio::sync::Mutex::new(udp),
            ws_tx: parking_lot::Mutex::new(ws_tx),
            speaking: AtomicBool::new(false),
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    /// The channel this link was negotiated for.
    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::Relaxed)
    }

    /// Points signaling at a new gateway connection after a resume.
    pub fn rebind(&self, ws_tx: UnboundedSender<Message>) {
        *self.ws_tx.lock() = ws_tx;
        // the new connection has not seen a speaking update yet
        self.speaking.store(false, Ordering::Relaxed);
    }

    pub(crate) fn speaking_message(&self, speaking: bool) -> VoiceGatewayMessage {
        VoiceGatewayMessage::new(
            op::SPEAKING,
            serde_json::json!({
                "speaking": u8::from(speaking),
                "delay": 0,
                "ssrc": self.ssrc,
            }),
        )
    }
}

#[async_trait]
impl FrameSink for VoiceLink {
    async fn send_frame(&self, frame: &[u8]) -> AnyResult<()> {
        self.udp.lock().await.send_opus_packet(frame).await
    }

    async fn set_speaking(&self, speaking: bool) -> AnyResult<()> {
        if self.speaking.swap(speaking, Ordering::Relaxed) == speaking {
            return Ok(());
        }
        let sent = serde_json::to_string(&self.speaking_message(speaking))
            .map_err(map_boxed_err)
            .and_then(|json| {
                self.ws_tx
                    .lock()
                    .send(Message::Text(json.into()))
                    .map_err(|_| map_boxed_err("voice gateway connection closed"))
            });
        if sent.is_err() {
            // not announced, so a retry with the same value must go out
            self.speaking.store(!speaking, Ordering::Relaxed);
        }
        sent
    }
}
