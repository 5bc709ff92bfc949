use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicI64, AtomicU64, Ordering},
    },
};

use serde_json::Value;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, error, info, warn};

use super::{
    VoiceGateway,
    heartbeat::{now_ms, spawn_heartbeat},
    voice::discover_ip,
};
use crate::gateway::{
    UdpBackend, VoiceLink,
    constants::{DEFAULT_HEARTBEAT_INTERVAL_MS, DEFAULT_VOICE_MODE, PREFERRED_MODES, op},
    session::types::{SessionOutcome, VoiceGatewayMessage},
};

/// Picks the first mode we prefer that the server offers.
pub(crate) fn select_mode(offered: &[Value]) -> &'static str {
    PREFERRED_MODES
        .iter()
        .copied()
        .find(|p| offered.iter().any(|m| m.as_str() == Some(*p)))
        .unwrap_or(DEFAULT_VOICE_MODE)
}

pub(crate) fn parse_secret_key(d: &Value) -> Option<[u8; 32]> {
    let raw = d["secret_key"].as_array()?;
    if raw.len() != 32 {
        return None;
    }
    let mut key = [0u8; 32];
    for (slot, v) in key.iter_mut().zip(raw) {
        *slot = u8::try_from(v.as_u64()?).ok()?;
    }
    Some(key)
}

/// Per-connection protocol state. Dropped when the gateway socket closes.
pub struct SessionState<'a> {
    gateway: &'a VoiceGateway,
    tx: tokio::sync::mpsc::UnboundedSender<Message>,
    seq_ack: Arc<AtomicI64>,
    ssrc: u32,
    udp_addr: Option<SocketAddr>,
    selected_mode: &'static str,
    udp_socket: Option<Arc<tokio::net::UdpSocket>>,
    heartbeat_handle: Option<tokio::task::JoinHandle<()>>,
    last_heartbeat: Arc<AtomicU64>,
}

impl<'a> SessionState<'a> {
    pub fn new(
        gateway: &'a VoiceGateway,
        tx: tokio::sync::mpsc::UnboundedSender<Message>,
        seq_ack: Arc<AtomicI64>,
    ) -> Self {
        Self {
            gateway,
            tx,
            seq_ack,
            ssrc: 0,
            udp_addr: None,
            selected_mode: DEFAULT_VOICE_MODE,
            udp_socket: None,
            heartbeat_handle: None,
            last_heartbeat: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn handle_text(&mut self, text: &str) -> Option<SessionOutcome> {
        let msg: VoiceGatewayMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                warn!(
                    "[{}] Failed to parse voice gateway message: {} - Text: {}",
                    self.gateway.guild_id, e, text
                );
                return None;
            }
        };

        if let Some(seq) = msg.seq {
            self.seq_ack.store(seq, Ordering::Relaxed);
        }

        match msg.op {
            op::HELLO => self.handle_hello(msg.d),
            op::READY => self.handle_ready(msg.d).await,
            op::SESSION_DESCRIPTION => self.handle_session_description(msg.d),
            op::HEARTBEAT_ACK => self.handle_heartbeat_ack(),
            op::RESUMED => self.handle_resumed(),
            op::CLIENT_DISCONNECT => {
                debug!("[{}] User left voice: {}", self.gateway.guild_id, msg.d["user_id"]);
                None
            }
            _ => {
                debug!(
                    "[{}] Received voice op {}: {:?}",
                    self.gateway.guild_id, msg.op, msg.d
                );
                None
            }
        }
    }

    fn handle_hello(&mut self, d: Value) -> Option<SessionOutcome> {
        let interval = d["heartbeat_interval"]
            .as_f64()
            .map(|ms| ms as u64)
            .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_MS);
        if let Some(h) = self.heartbeat_handle.take() {
            h.abort();
        }

        debug!(
            "[{}] Heartbeat interval set to {}ms",
            self.gateway.guild_id, interval
        );
        self.heartbeat_handle = Some(spawn_heartbeat(
            self.tx.clone(),
            self.seq_ack.clone(),
            self.last_heartbeat.clone(),
            interval,
        ));
        None
    }

    async fn handle_ready(&mut self, d: Value) -> Option<SessionOutcome> {
        self.ssrc = d["ssrc"].as_u64().unwrap_or(0) as u32;
        let ip = d["ip"].as_str().unwrap_or("");
        let port = d["port"].as_u64().unwrap_or(0) as u16;
        let Ok(addr) = format!("{}:{}", ip, port).parse::<SocketAddr>() else {
            error!(
                "[{}] Ready carried an unusable address {}:{}",
                self.gateway.guild_id, ip, port
            );
            return Some(SessionOutcome::Reconnect);
        };
        self.udp_addr = Some(addr);

        if let Some(modes) = d["modes"].as_array() {
            self.selected_mode = select_mode(modes);
        }

        debug!(
            "[{}] Ready! IP: {}, Port: {}, SSRC: {}, Mode: {}",
            self.gateway.guild_id, ip, port, self.ssrc, self.selected_mode
        );

        let socket = match tokio::net::UdpSocket::bind("0.0.0.0:0").await {
            Ok(s) => Arc::new(s),
            Err(e) => {
                error!("[{}] Failed to bind UDP socket: {}", self.gateway.guild_id, e);
                return Some(SessionOutcome::Reconnect);
            }
        };

        match discover_ip(&socket, addr, self.ssrc).await {
            Ok((my_ip, my_port)) => {
                self.udp_socket = Some(socket);
                self.send_json(
                    op::SELECT_PROTOCOL,
                    serde_json::json!({
                        "protocol": "udp",
                        "data": { "address": my_ip, "port": my_port, "mode": self.selected_mode }
                    }),
                );
            }
            Err(e) => {
                error!("[{}] IP discovery failed: {}", self.gateway.guild_id, e);
                return Some(SessionOutcome::Reconnect);
            }
        }
        None
    }

    fn handle_session_description(&mut self, d: Value) -> Option<SessionOutcome> {
        if let Some(m) = d["mode"].as_str() {
            if let Some(&known) = PREFERRED_MODES.iter().find(|&&p| p == m) {
                self.selected_mode = known;
            } else {
                warn!("[{}] Server chose unknown mode {}", self.gateway.guild_id, m);
            }
        }

        let Some(key) = parse_secret_key(&d) else {
            error!(
                "[{}] Missing or invalid secret_key in session_description",
                self.gateway.guild_id
            );
            return Some(SessionOutcome::Reconnect);
        };

        let (Some(addr), Some(socket)) = (self.udp_addr, self.udp_socket.clone()) else {
            warn!(
                "[{}] Session description before UDP was ready; ignoring",
                self.gateway.guild_id
            );
            return None;
        };

        let udp = UdpBackend::new(socket, addr, self.ssrc, key, self.selected_mode);
        let link = Arc::new(VoiceLink::new(
            self.gateway.guild_id,
            self.gateway.info.channel_id,
            udp,
            self.tx.clone(),
        ));
        info!(
            "[{}] Voice connection ready (mode {})",
            self.gateway.guild_id, self.selected_mode
        );
        self.gateway.publish(Some(link));
        None
    }

    fn handle_heartbeat_ack(&self) -> Option<SessionOutcome> {
        let sent_ms = self.last_heartbeat.load(Ordering::Relaxed);
        if sent_ms > 0 {
            let latency = now_ms().saturating_sub(sent_ms);
            self.gateway.ping.store(latency as i64, Ordering::Relaxed);
        }
        None
    }

    fn handle_resumed(&self) -> Option<SessionOutcome> {
        info!(
            "[{}] Voice session resumed successfully",
            self.gateway.guild_id
        );
        if let Some(link) = self.gateway.current_link() {
            link.rebind(self.tx.clone());
        }
        None
    }

    fn send_json(&self, op: u8, d: Value) {
        let msg = VoiceGatewayMessage::new(op, d);
        if let Ok(json) = serde_json::to_string(&msg) {
            let _ = self.tx.send(Message::Text(json.into()));
        }
    }
}

impl<'a> Drop for SessionState<'a> {
    fn drop(&mut self) {
        if let Some(h) = self.heartbeat_handle.take() {
            h.abort();
        }
    }
}
