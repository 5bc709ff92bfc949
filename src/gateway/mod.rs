//! Discord voice participant: voice gateway session, UDP media link, and the
//! per-guild transport that ties them to gateway events.

pub mod constants;
pub mod link;
pub mod session;
pub mod transport;
pub mod udp_link;

pub use link::VoiceLink;
pub use session::{VoiceGateway, VoiceSessionInfo};
pub use transport::GatewayTransport;
pub use udp_link::UdpBackend;
