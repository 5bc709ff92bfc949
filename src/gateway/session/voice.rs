use std::net::SocketAddr;

use super::types::map_boxed_err;
use crate::{
    common::types::AnyResult,
    gateway::constants::{DISCOVERY_PACKET_SIZE, IP_DISCOVERY_TIMEOUT_SECS},
};

const DISCOVERY_REQUEST: u16 = 1;
const DISCOVERY_BODY_LEN: u16 = 70;

pub(crate) fn discovery_request(ssrc: u32) -> [u8; DISCOVERY_PACKET_SIZE] {
    let mut packet = [0u8; DISCOVERY_PACKET_SIZE];
    packet[0..2].copy_from_slice(&DISCOVERY_REQUEST.to_be_bytes());
    packet[2..4].copy_from_slice(&DISCOVERY_BODY_LEN.to_be_bytes());
    packet[4..8].copy_from_slice(&ssrc.to_be_bytes());
    packet
}

/// Extracts our external address from a discovery response.
pub(crate) fn parse_discovery_response(buf: &[u8]) -> AnyResult<(String, u16)> {
    if buf.len() < DISCOVERY_PACKET_SIZE {
        return Err(map_boxed_err("Malformed IP discovery response"));
    }
    let ip = std::str::from_utf8(&buf[8..72])
        .map_err(map_boxed_err)?
        .trim_matches('\0')
        .to_string();
    let port = u16::from_be_bytes([buf[72], buf[73]]);
    Ok((ip, port))
}

pub async fn discover_ip(
    socket: &tokio::net::UdpSocket,
    addr: SocketAddr,
    ssrc: u32,
) -> AnyResult<(String, u16)> {
    socket
        .send_to(&discovery_request(ssrc), addr)
        .await
        .map_err(map_boxed_err)?;

    let mut buf = [0u8; DISCOVERY_PACKET_SIZE];
    match tokio::time::timeout(
        tokio::time::Duration::from_secs(IP_DISCOVERY_TIMEOUT_SECS),
        socket.recv(&mut buf),
    )
    .await
    {
        Ok(Ok(n)) => parse_discovery_response(&buf[..n]),
        Ok(Err(e)) => Err(map_boxed_err(e)),
        Err(_) => Err(map_boxed_err("IP discovery timed out")),
    }
}
