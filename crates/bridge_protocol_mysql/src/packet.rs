//! Handshake-phase and generic response packets.
//!
//! Layouts follow the MySQL client/server protocol. Every packet encodes
//! into / decodes from a [`PacketPayload`]; framing (length + sequence id)
//! lives in `handshake.rs`.

use rand::Rng;

use bridge_common::error::ProtocolError;

use crate::payload::PacketPayload;

type Result<T> = std::result::Result<T, ProtocolError>;

// ── Protocol constants ───────────────────────────────────────────────────

/// Protocol version advertised in the initial handshake.
pub const PROTOCOL_VERSION: u8 = 0x0A;

/// Header of the OK packet.
pub const OK_HEADER: u8 = 0x00;
/// Header of the ERR packet.
pub const ERR_HEADER: u8 = 0xFF;
/// Header of the auth-switch request packet. 0xFE is reserved for this
/// (and the EOF packet) and must never be used as a generic response
/// header elsewhere in the stream.
pub const AUTH_SWITCH_HEADER: u8 = 0xFE;

/// Default character set: utf8mb4_general_ci.
pub const CHARSET_UTF8MB4: u8 = 45;

// ── Capability flags ─────────────────────────────────────────────────────

pub const CLIENT_LONG_PASSWORD: u32 = 1 << 0;
pub const CLIENT_FOUND_ROWS: u32 = 1 << 1;
pub const CLIENT_LONG_FLAG: u32 = 1 << 2;
pub const CLIENT_CONNECT_WITH_DB: u32 = 1 << 3;
pub const CLIENT_PROTOCOL_41: u32 = 1 << 9;
pub const CLIENT_SSL: u32 = 1 << 11;
pub const CLIENT_TRANSACTIONS: u32 = 1 << 13;
pub const CLIENT_SECURE_CONNECTION: u32 = 1 << 15;
pub const CLIENT_MULTI_STATEMENTS: u32 = 1 << 16;
pub const CLIENT_MULTI_RESULTS: u32 = 1 << 17;
pub const CLIENT_PLUGIN_AUTH: u32 = 1 << 19;
pub const CLIENT_CONNECT_ATTRS: u32 = 1 << 20;
pub const CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA: u32 = 1 << 21;

/// Capabilities this proxy offers to every client.
pub const SERVER_CAPABILITIES: u32 = CLIENT_LONG_PASSWORD
    | CLIENT_FOUND_ROWS
    | CLIENT_LONG_FLAG
    | CLIENT_CONNECT_WITH_DB
    | CLIENT_PROTOCOL_41
    | CLIENT_TRANSACTIONS
    | CLIENT_SECURE_CONNECTION
    | CLIENT_MULTI_STATEMENTS
    | CLIENT_MULTI_RESULTS
    | CLIENT_PLUGIN_AUTH;

/// SERVER_STATUS_AUTOCOMMIT.
pub const STATUS_AUTOCOMMIT: u16 = 1 << 1;

// ── Auth plugin data ─────────────────────────────────────────────────────

/// Per-connection authentication challenge: 20 random non-zero bytes,
/// split 8 + 12 across the handshake packet. Generated once at handshake
/// time and immutable afterwards; never reused across connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPluginData {
    part1: [u8; 8],
    part2: [u8; 12],
}

impl AuthPluginData {
    /// Generate a fresh random challenge. Bytes are non-zero so the
    /// challenge survives NUL-terminated transport unambiguously.
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        let mut part1 = [0u8; 8];
        let mut part2 = [0u8; 12];
        for b in part1.iter_mut().chain(part2.iter_mut()) {
            *b = rng.gen_range(1..=125);
        }
        Self { part1, part2 }
    }

    pub fn from_parts(part1: [u8; 8], part2: [u8; 12]) -> Self {
        Self { part1, part2 }
    }

    pub fn part1(&self) -> &[u8; 8] {
        &self.part1
    }

    pub fn part2(&self) -> &[u8; 12] {
        &self.part2
    }

    /// The full 20-byte challenge.
    pub fn bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(20);
        out.extend_from_slice(&self.part1);
        out.extend_from_slice(&self.part2);
        out
    }
}

// ── Handshake (server → client) ──────────────────────────────────────────

/// Initial handshake packet (protocol version 10).
#[derive(Debug, Clone)]
pub struct HandshakePacket {
    pub server_version: String,
    pub connection_id: u32,
    pub auth_plugin_data: AuthPluginData,
    pub capabilities: u32,
    pub charset: u8,
    pub status_flags: u16,
    pub auth_plugin_name: String,
}

impl HandshakePacket {
    pub fn new(
        server_version: impl Into<String>,
        connection_id: u32,
        auth_plugin_data: AuthPluginData,
        auth_plugin_name: impl Into<String>,
    ) -> Self {
        Self {
            server_version: server_version.into(),
            connection_id,
            auth_plugin_data,
            capabilities: SERVER_CAPABILITIES,
            charset: CHARSET_UTF8MB4,
            status_flags: STATUS_AUTOCOMMIT,
            auth_plugin_name: auth_plugin_name.into(),
        }
    }

    pub fn encode(&self, payload: &mut PacketPayload) -> Result<()> {
        payload.write_int1(PROTOCOL_VERSION);
        payload.write_string_nul(&self.server_version, "server_version")?;
        payload.write_int4(self.connection_id);
        payload.write_bytes(self.auth_plugin_data.part1());
        payload.write_int1(0); // filler
        payload.write_int2((self.capabilities & 0xFFFF) as u16);
        payload.write_int1(self.charset);
        payload.write_int2(self.status_flags);
        payload.write_int2((self.capabilities >> 16) as u16);
        // Length of the full challenge plus its trailing NUL.
        payload.write_int1(21);
        payload.write_bytes(&[0u8; 10]); // reserved
        payload.write_bytes(self.auth_plugin_data.part2());
        payload.write_int1(0);
        payload.write_string_nul(&self.auth_plugin_name, "auth_plugin_name")?;
        Ok(())
    }

    pub fn decode(payload: &mut PacketPayload) -> Result<Self> {
        let version = payload.read_int1()?;
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnexpectedHeader {
                expected: PROTOCOL_VERSION,
                actual: version,
            });
        }
        let server_version = payload.read_string_nul("server_version")?;
        let connection_id = payload.read_int4()?;
        let mut part1 = [0u8; 8];
        part1.copy_from_slice(&payload.read_bytes_fix(8)?);
        payload.read_int1()?; // filler
        let cap_lower = payload.read_int2()? as u32;
        let charset = payload.read_int1()?;
        let status_flags = payload.read_int2()?;
        let cap_upper = payload.read_int2()? as u32;
        payload.read_int1()?; // auth plugin data length
        payload.read_bytes_fix(10)?; // reserved
        let mut part2 = [0u8; 12];
        part2.copy_from_slice(&payload.read_bytes_fix(12)?);
        payload.read_int1()?; // challenge terminator
        let auth_plugin_name = payload.read_string_nul("auth_plugin_name")?;
        Ok(Self {
            server_version,
            connection_id,
            auth_plugin_data: AuthPluginData::from_parts(part1, part2),
            capabilities: cap_lower | (cap_upper << 16),
            charset,
            status_flags,
            auth_plugin_name,
        })
    }
}

// ── Handshake response (client → server) ─────────────────────────────────

/// Protocol-4.1 handshake response.
#[derive(Debug, Clone)]
pub struct HandshakeResponsePacket {
    pub capabilities: u32,
    pub max_packet_size: u32,
    pub charset: u8,
    pub username: String,
    pub auth_response: Vec<u8>,
    pub database: Option<String>,
    pub auth_plugin_name: Option<String>,
}

impl HandshakeResponsePacket {
    pub fn decode(payload: &mut PacketPayload) -> Result<Self> {
        let capabilities = payload.read_int4()?;
        if capabilities & CLIENT_PROTOCOL_41 == 0 {
            return Err(ProtocolError::Malformed(
                "pre-4.1 handshake responses are not supported".into(),
            ));
        }
        let max_packet_size = payload.read_int4()?;
        let charset = payload.read_int1()?;
        payload.read_bytes_fix(23)?; // reserved
        let username = payload.read_string_nul("username")?;
        let auth_response = if capabilities & CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
            let len = payload.read_int_lenenc()? as usize;
            payload.read_bytes_fix(len)?
        } else if capabilities & CLIENT_SECURE_CONNECTION != 0 {
            let len = payload.read_int1()? as usize;
            payload.read_bytes_fix(len)?
        } else {
            payload.read_bytes_nul()?
        };
        let database = if capabilities & CLIENT_CONNECT_WITH_DB != 0 {
            Some(payload.read_string_nul("database")?)
        } else {
            None
        };
        let auth_plugin_name = if capabilities & CLIENT_PLUGIN_AUTH != 0 {
            Some(payload.read_string_nul("auth_plugin_name")?)
        } else {
            None
        };
        Ok(Self {
            capabilities,
            max_packet_size,
            charset,
            username,
            auth_response,
            database,
            auth_plugin_name,
        })
    }

    pub fn encode(&self, payload: &mut PacketPayload) -> Result<()> {
        payload.write_int4(self.capabilities);
        payload.write_int4(self.max_packet_size);
        payload.write_int1(self.charset);
        payload.write_bytes(&[0u8; 23]);
        payload.write_string_nul(&self.username, "username")?;
        if self.capabilities & CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
            payload.write_int_lenenc(self.auth_response.len() as u64);
            payload.write_bytes(&self.auth_response);
        } else if self.capabilities & CLIENT_SECURE_CONNECTION != 0 {
            payload.write_int1(self.auth_response.len() as u8);
            payload.write_bytes(&self.auth_response);
        } else {
            payload.write_bytes_nul(&self.auth_response, "auth_response")?;
        }
        if let Some(db) = &self.database {
            payload.write_string_nul(db, "database")?;
        }
        if let Some(plugin) = &self.auth_plugin_name {
            payload.write_string_nul(plugin, "auth_plugin_name")?;
        }
        Ok(())
    }
}

// ── Auth switch ──────────────────────────────────────────────────────────

/// Mid-handshake request that the client switch authentication plugin.
///
/// Wire format is exactly `[0xFE][plugin name, NUL][challenge, NUL]`:
/// one marker byte, then two NUL-terminated string writes, in that order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSwitchRequestPacket {
    pub auth_plugin_name: String,
    pub auth_plugin_data: Vec<u8>,
}

impl AuthSwitchRequestPacket {
    pub fn new(auth_plugin_name: impl Into<String>, auth_plugin_data: Vec<u8>) -> Self {
        Self {
            auth_plugin_name: auth_plugin_name.into(),
            auth_plugin_data,
        }
    }

    pub fn encode(&self, payload: &mut PacketPayload) -> Result<()> {
        payload.write_int1(AUTH_SWITCH_HEADER);
        payload.write_string_nul(&self.auth_plugin_name, "auth_plugin_name")?;
        payload.write_bytes_nul(&self.auth_plugin_data, "auth_plugin_data")?;
        Ok(())
    }

    pub fn decode(payload: &mut PacketPayload) -> Result<Self> {
        let header = payload.read_int1()?;
        if header != AUTH_SWITCH_HEADER {
            return Err(ProtocolError::UnexpectedHeader {
                expected: AUTH_SWITCH_HEADER,
                actual: header,
            });
        }
        let auth_plugin_name = payload.read_string_nul("auth_plugin_name")?;
        let auth_plugin_data = payload.read_bytes_nul()?;
        Ok(Self {
            auth_plugin_name,
            auth_plugin_data,
        })
    }
}

/// Client reply to an auth-switch request: raw auth data, rest-of-packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSwitchResponsePacket {
    pub auth_response: Vec<u8>,
}

impl AuthSwitchResponsePacket {
    pub fn encode(&self, payload: &mut PacketPayload) {
        payload.write_bytes(&self.auth_response);
    }

    pub fn decode(payload: &mut PacketPayload) -> Self {
        Self {
            auth_response: payload.read_bytes_eof(),
        }
    }
}

// ── Generic response packets ─────────────────────────────────────────────

/// OK packet: generic acknowledgement.
#[derive(Debug, Clone, Default)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: u16,
    pub warnings: u16,
}

impl OkPacket {
    pub fn encode(&self, payload: &mut PacketPayload) {
        payload.write_int1(OK_HEADER);
        payload.write_int_lenenc(self.affected_rows);
        payload.write_int_lenenc(self.last_insert_id);
        payload.write_int2(self.status_flags);
        payload.write_int2(self.warnings);
    }

    pub fn decode(payload: &mut PacketPayload) -> Result<Self> {
        let header = payload.read_int1()?;
        if header != OK_HEADER {
            return Err(ProtocolError::UnexpectedHeader {
                expected: OK_HEADER,
                actual: header,
            });
        }
        Ok(Self {
            affected_rows: payload.read_int_lenenc()?,
            last_insert_id: payload.read_int_lenenc()?,
            status_flags: payload.read_int2()?,
            warnings: payload.read_int2()?,
        })
    }
}

/// ERR packet: error report.
#[derive(Debug, Clone)]
pub struct ErrPacket {
    pub error_code: u16,
    pub sql_state: [u8; 5],
    pub message: String,
}

impl ErrPacket {
    pub fn access_denied(user: &str, host: &str) -> Self {
        Self {
            error_code: 1045,
            sql_state: *b"28000",
            message: format!("Access denied for user '{user}'@'{host}'"),
        }
    }

    pub fn encode(&self, payload: &mut PacketPayload) {
        payload.write_int1(ERR_HEADER);
        payload.write_int2(self.error_code);
        payload.write_int1(b'#');
        payload.write_bytes(&self.sql_state);
        payload.write_bytes(self.message.as_bytes());
    }

    pub fn decode(payload: &mut PacketPayload) -> Result<Self> {
        let header = payload.read_int1()?;
        if header != ERR_HEADER {
            return Err(ProtocolError::UnexpectedHeader {
                expected: ERR_HEADER,
                actual: header,
            });
        }
        let error_code = payload.read_int2()?;
        let marker = payload.read_int1()?;
        if marker != b'#' {
            return Err(ProtocolError::Malformed(format!(
                "missing SQL state marker, got 0x{marker:02x}"
            )));
        }
        let mut sql_state = [0u8; 5];
        sql_state.copy_from_slice(&payload.read_bytes_fix(5)?);
        let message = String::from_utf8(payload.read_bytes_eof()).map_err(|source| {
            ProtocolError::InvalidUtf8 {
                field: "message",
                source,
            }
        })?;
        Ok(Self {
            error_code,
            sql_state,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_golden_auth_switch_bytes() {
        let packet = AuthSwitchRequestPacket::new("mysql_clear_password", vec![0x11, 0x22]);
        let mut payload = PacketPayload::new();
        packet.encode(&mut payload).unwrap();
        assert_eq!(
            payload.as_slice(),
            &[
                0xFE, 0x6D, 0x79, 0x73, 0x71, 0x6C, 0x5F, 0x63, 0x6C, 0x65, 0x61, 0x72, 0x5F,
                0x70, 0x61, 0x73, 0x73, 0x77, 0x6F, 0x72, 0x64, 0x00, 0x11, 0x22, 0x00
            ]
        );
    }

    #[test]
    fn test_auth_switch_shape() {
        // Exactly one marker byte, then two NUL-terminated strings.
        let packet = AuthSwitchRequestPacket::new("plugin", vec![0x01, 0x02, 0x03]);
        let mut payload = PacketPayload::new();
        packet.encode(&mut payload).unwrap();
        let bytes = payload.as_slice();
        assert_eq!(bytes[0], AUTH_SWITCH_HEADER);
        let nul_count = bytes[1..].iter().filter(|&&b| b == 0).count();
        assert_eq!(nul_count, 2);
        assert_eq!(*bytes.last().unwrap(), 0);
    }

    #[test]
    fn test_auth_switch_roundtrip() {
        let packet = AuthSwitchRequestPacket::new("caching_sha2_password", vec![0x7F; 20]);
        let mut payload = PacketPayload::new();
        packet.encode(&mut payload).unwrap();
        let mut payload = PacketPayload::from_bytes(payload.as_slice());
        let decoded = AuthSwitchRequestPacket::decode(&mut payload).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(payload.remaining(), 0);
    }

    #[test]
    fn test_auth_switch_bad_header() {
        let mut payload = PacketPayload::from_bytes(&[0x01, b'p', 0x00, 0x11, 0x00]);
        let err = AuthSwitchRequestPacket::decode(&mut payload).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::UnexpectedHeader {
                expected: 0xFE,
                actual: 0x01
            }
        ));
    }

    #[test]
    fn test_auth_switch_rejects_nul_in_plugin_name() {
        let packet = AuthSwitchRequestPacket::new("bad\0name", vec![0x11]);
        let mut payload = PacketPayload::new();
        assert!(matches!(
            packet.encode(&mut payload),
            Err(ProtocolError::EmbeddedNul { .. })
        ));
    }

    #[test]
    fn test_handshake_roundtrip() {
        let challenge = AuthPluginData::random();
        let packet = HandshakePacket::new("5.7.22-ShardBridge", 42, challenge.clone(), "mysql_native_password");
        let mut payload = PacketPayload::new();
        packet.encode(&mut payload).unwrap();
        let mut payload = PacketPayload::from_bytes(payload.as_slice());
        let decoded = HandshakePacket::decode(&mut payload).unwrap();
        assert_eq!(decoded.server_version, "5.7.22-ShardBridge");
        assert_eq!(decoded.connection_id, 42);
        assert_eq!(decoded.capabilities, SERVER_CAPABILITIES);
        assert_eq!(decoded.auth_plugin_data, challenge);
        assert_eq!(decoded.auth_plugin_name, "mysql_native_password");
    }

    #[test]
    fn test_challenge_bytes_are_nonzero() {
        for _ in 0..64 {
            let challenge = AuthPluginData::random();
            assert!(challenge.bytes().iter().all(|&b| b != 0));
            assert_eq!(challenge.bytes().len(), 20);
        }
    }

    #[test]
    fn test_handshake_response_roundtrip() {
        let packet = HandshakeResponsePacket {
            capabilities: CLIENT_PROTOCOL_41
                | CLIENT_SECURE_CONNECTION
                | CLIENT_PLUGIN_AUTH
                | CLIENT_CONNECT_WITH_DB,
            max_packet_size: 1 << 24,
            charset: CHARSET_UTF8MB4,
            username: "root".into(),
            auth_response: vec![0xAA; 20],
            database: Some("sharding_db".into()),
            auth_plugin_name: Some("mysql_native_password".into()),
        };
        let mut payload = PacketPayload::new();
        packet.encode(&mut payload).unwrap();
        let mut payload = PacketPayload::from_bytes(payload.as_slice());
        let decoded = HandshakeResponsePacket::decode(&mut payload).unwrap();
        assert_eq!(decoded.username, "root");
        assert_eq!(decoded.auth_response, vec![0xAA; 20]);
        assert_eq!(decoded.database.as_deref(), Some("sharding_db"));
        assert_eq!(decoded.auth_plugin_name.as_deref(), Some("mysql_native_password"));
    }

    #[test]
    fn test_ok_err_roundtrip() {
        let ok = OkPacket {
            affected_rows: 3,
            last_insert_id: 0,
            status_flags: STATUS_AUTOCOMMIT,
            warnings: 0,
        };
        let mut payload = PacketPayload::new();
        ok.encode(&mut payload);
        let mut payload = PacketPayload::from_bytes(payload.as_slice());
        let decoded = OkPacket::decode(&mut payload).unwrap();
        assert_eq!(decoded.affected_rows, 3);
        assert_eq!(decoded.status_flags, STATUS_AUTOCOMMIT);

        let err = ErrPacket::access_denied("root", "10.0.0.7");
        let mut payload = PacketPayload::new();
        err.encode(&mut payload);
        let mut payload = PacketPayload::from_bytes(payload.as_slice());
        let decoded = ErrPacket::decode(&mut payload).unwrap();
        assert_eq!(decoded.error_code, 1045);
        assert_eq!(&decoded.sql_state, b"28000");
        assert!(decoded.message.contains("root"));
    }

    #[test]
    fn test_truncated_handshake_response() {
        let mut payload = PacketPayload::from_bytes(&[0x0D, 0xA2]);
        assert!(matches!(
            HandshakeResponsePacket::decode(&mut payload),
            Err(ProtocolError::Truncated { .. })
        ));
    }
}
