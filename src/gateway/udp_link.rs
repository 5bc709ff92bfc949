use std::{net::SocketAddr, sync::Arc};

use aes_gcm::{
    Aes256Gcm,
    aead::{AeadInPlace, KeyInit},
};
use xsalsa20poly1305::XSalsa20Poly1305;

use crate::{
    common::types::AnyResult,
    gateway::{
        constants::{
            MODE_AES256_GCM, RTP_OPUS_PAYLOAD_TYPE, RTP_TIMESTAMP_STEP, RTP_VERSION_BYTE,
            UDP_PACKET_BUF_CAPACITY,
        },
        session::types::map_boxed_err,
    },
};

const RTP_HEADER_LEN: usize = 12;

/// Encryption cipher; exactly one is active per link.
enum ActiveCipher {
    XSalsa20Poly1305(XSalsa20Poly1305),
    Aes256Gcm(Aes256Gcm),
}

/// RTP framing and transport encryption for one voice connection.
pub struct UdpBackend {
    socket: Arc<tokio::net::UdpSocket>,
    ssrc: u32,
    address: SocketAddr,
    cipher: ActiveCipher,
    sequence: u16,
    timestamp: u32,
    nonce: u32,
    /// Reusable packet buffer, cleared per frame.
    packet_buf: Vec<u8>,
}

impl UdpBackend {
    pub fn new(
        socket: Arc<tokio::net::UdpSocket>,
        address: SocketAddr,
        ssrc: u32,
        secret_key: [u8; 32],
        mode_name: &str,
    ) -> Self {
        let cipher = if mode_name == MODE_AES256_GCM {
            ActiveCipher::Aes256Gcm(Aes256Gcm::new(&secret_key.into()))
        } else {
            ActiveCipher::XSalsa20Poly1305(XSalsa20Poly1305::new(&secret_key.into()))
        };

        Self {
            socket,
            ssrc,
            address,
            cipher,
            sequence: 0,
            timestamp: 0,
            nonce: 0,
            packet_buf: Vec::with_capacity(UDP_PACKET_BUF_CAPACITY),
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    fn next_header(&mut self) -> [u8; RTP_HEADER_LEN] {
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);

        let timestamp = self.timestamp;
        self.timestamp = self.timestamp.wrapping_add(RTP_TIMESTAMP_STEP);

        let mut header = [0u8; RTP_HEADER_LEN];
        header[0] = RTP_VERSION_BYTE;
        header[1] = RTP_OPUS_PAYLOAD_TYPE;
        header[2..4].copy_from_slice(&sequence.to_be_bytes());
        header[4..8].copy_from_slice(&timestamp.to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        header
    }

    pub async fn send_opus_packet(&mut self, payload: &[u8]) -> AnyResult<()> {
        let header = self.next_header();

        self.packet_buf.clear();
        self.packet_buf.extend_from_slice(&header);
        self.packet_buf.extend_from_slice(payload);

        match &self.cipher {
            ActiveCipher::XSalsa20Poly1305(cipher) => {
                // nonce = RTP header padded to 24 bytes
                let mut nonce = [0u8; 24];
                nonce[0..RTP_HEADER_LEN].copy_from_slice(&header);

                // no associated data: the header is only bound through the nonce
                let tag = cipher
                    .encrypt_in_place_detached(
                        &nonce.into(),
                        &[],
                        &mut self.packet_buf[RTP_HEADER_LEN..],
                    )
                    .map_err(|e| map_boxed_err(format!("XSalsa20 encryption error: {e:?}")))?;

                // secretbox layout: tag, then ciphertext
                self.packet_buf.extend_from_slice(&tag);
                self.packet_buf[RTP_HEADER_LEN..].rotate_right(tag.len());
            }
            ActiveCipher::Aes256Gcm(cipher) => {
                self.nonce = self.nonce.wrapping_add(1);
                let counter = self.nonce.to_be_bytes();
                let mut nonce = [0u8; 12];
                nonce[0..4].copy_from_slice(&counter);

                let tag = cipher
                    .encrypt_in_place_detached(
                        &nonce.into(),
                        &header,
                        &mut self.packet_buf[RTP_HEADER_LEN..],
                    )
                    .map_err(|e| map_boxed_err(format!("AES-GCM encryption error: {e:?}")))?;

                self.packet_buf.extend_from_slice(&tag);
                self.packet_buf.extend_from_slice(&counter);
            }
        }

        self.socket
            .send_to(&self.packet_buf, self.address)
            .await
            .map_err(map_boxed_err)?;

        Ok(())
    }
}
