//! MySQL wire-protocol front end: payload codec, handshake-phase packets,
//! and the connection-phase driver.

pub mod handshake;
pub mod packet;
pub mod payload;

pub use handshake::{read_packet, write_packet, Authenticator, ConnectionPhase, MAX_PACKET_SIZE};
pub use packet::{
    AuthPluginData, AuthSwitchRequestPacket, AuthSwitchResponsePacket, ErrPacket, HandshakePacket,
    HandshakeResponsePacket, OkPacket,
};
pub use payload::PacketPayload;
