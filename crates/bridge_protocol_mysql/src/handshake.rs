//! Connection-phase driver: framing, handshake, auth switch.
//!
//! Frames are `[length: u24 LE][sequence id: u8][payload]`. The driver owns
//! the sequence counter for the handshake exchange; a decode failure is
//! fatal to the connection because the channel is desynchronized.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use bridge_common::config::AuthConfig;
use bridge_common::error::ProtocolError;
use bridge_common::session::ConnectionSession;

use crate::packet::{
    AuthPluginData, AuthSwitchRequestPacket, AuthSwitchResponsePacket, ErrPacket,
    HandshakePacket, HandshakeResponsePacket, OkPacket, STATUS_AUTOCOMMIT,
};
use crate::payload::PacketPayload;

type Result<T> = std::result::Result<T, ProtocolError>;

/// Maximum payload bytes in a single frame.
pub const MAX_PACKET_SIZE: u32 = (1 << 24) - 1;

/// Read one frame, validating the sequence id.
pub async fn read_packet<S>(stream: &mut S, expected_seq: u8) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await.map_err(map_eof)?;
    let len = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
    let seq = header[3];
    if seq != expected_seq {
        return Err(ProtocolError::OutOfOrderPacket {
            expected: expected_seq,
            actual: seq,
        });
    }
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.map_err(map_eof)?;
    Ok(payload)
}

/// Write one frame.
pub async fn write_packet<S>(stream: &mut S, seq: u8, payload: &[u8]) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    if payload.len() > MAX_PACKET_SIZE as usize {
        return Err(ProtocolError::FrameTooLarge {
            size: payload.len() as u32,
            max: MAX_PACKET_SIZE,
        });
    }
    let len = (payload.len() as u32).to_le_bytes();
    stream.write_all(&[len[0], len[1], len[2], seq]).await?;
    stream.write_all(payload).await?;
    stream.flush().await?;
    Ok(())
}

fn map_eof(e: std::io::Error) -> ProtocolError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        ProtocolError::ConnectionClosed
    } else {
        ProtocolError::Io(e)
    }
}

/// Credential verification seam. The proxy never stores credentials
/// itself; the connection layer supplies an implementation.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Authentication plugin this verifier understands. A client that
    /// negotiated a different plugin is sent an auth-switch request.
    fn plugin_name(&self) -> &str;

    /// Verify the client's auth response against the per-connection
    /// challenge.
    async fn authenticate(&self, username: &str, auth_response: &[u8], challenge: &[u8]) -> bool;
}

/// Drives one connection through handshake and authentication.
///
/// The challenge is generated at construction, used for exactly one
/// exchange, and dropped with the phase; an aborted handshake can never
/// leak its challenge into another attempt.
pub struct ConnectionPhase {
    connection_id: u32,
    client_host: String,
    config: AuthConfig,
    challenge: AuthPluginData,
}

impl ConnectionPhase {
    pub fn new(connection_id: u32, client_host: impl Into<String>, config: AuthConfig) -> Self {
        Self {
            connection_id,
            client_host: client_host.into(),
            config,
            challenge: AuthPluginData::random(),
        }
    }

    /// Run the handshake to completion, producing an authenticated session.
    ///
    /// Any decode failure aborts the connection with a protocol error; the
    /// caller must close the stream, never retry on the same channel.
    pub async fn establish<S>(
        self,
        stream: &mut S,
        authenticator: &dyn Authenticator,
    ) -> Result<ConnectionSession>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let handshake = HandshakePacket::new(
            &self.config.server_version,
            self.connection_id,
            self.challenge.clone(),
            &self.config.default_plugin,
        );
        let mut payload = PacketPayload::new();
        handshake.encode(&mut payload)?;
        write_packet(stream, 0, payload.as_slice()).await?;

        let bytes = read_packet(stream, 1).await?;
        let mut payload = PacketPayload::from_bytes(&bytes);
        let response = HandshakeResponsePacket::decode(&mut payload)?;
        tracing::debug!(
            connection_id = self.connection_id,
            user = %response.username,
            plugin = response.auth_plugin_name.as_deref().unwrap_or("<none>"),
            "handshake response received"
        );

        // Auth switch when the client negotiated a plugin the verifier does
        // not speak: marker, plugin name, challenge; then one reply packet.
        let client_plugin = response
            .auth_plugin_name
            .as_deref()
            .unwrap_or(&self.config.default_plugin);
        let (auth_response, seq) = if client_plugin != authenticator.plugin_name() {
            let switch = AuthSwitchRequestPacket::new(
                authenticator.plugin_name(),
                self.challenge.bytes(),
            );
            let mut payload = PacketPayload::new();
            switch.encode(&mut payload)?;
            write_packet(stream, 2, payload.as_slice()).await?;

            let bytes = read_packet(stream, 3).await?;
            let mut payload = PacketPayload::from_bytes(&bytes);
            let reply = AuthSwitchResponsePacket::decode(&mut payload);
            (reply.auth_response, 4)
        } else {
            (response.auth_response.clone(), 2)
        };

        let verified = authenticator
            .authenticate(&response.username, &auth_response, &self.challenge.bytes())
            .await;
        if !verified {
            let err = ErrPacket::access_denied(&response.username, &self.client_host);
            let mut payload = PacketPayload::new();
            err.encode(&mut payload);
            write_packet(stream, seq, payload.as_slice()).await?;
            tracing::info!(
                connection_id = self.connection_id,
                user = %response.username,
                "authentication failed"
            );
            return Err(ProtocolError::AuthFailed {
                user: response.username,
            });
        }

        let ok = OkPacket {
            status_flags: STATUS_AUTOCOMMIT,
            ..OkPacket::default()
        };
        let mut payload = PacketPayload::new();
        ok.encode(&mut payload);
        write_packet(stream, seq, payload.as_slice()).await?;

        tracing::info!(
            connection_id = self.connection_id,
            user = %response.username,
            "connection authenticated"
        );
        let mut session =
            ConnectionSession::new(self.connection_id, response.username, self.client_host);
        session.schema = response.database;
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{
        CHARSET_UTF8MB4, CLIENT_PLUGIN_AUTH, CLIENT_PROTOCOL_41, CLIENT_SECURE_CONNECTION,
        ERR_HEADER, OK_HEADER,
    };

    struct StaticAuthenticator {
        plugin: &'static str,
        expected: Vec<u8>,
    }

    #[async_trait]
    impl Authenticator for StaticAuthenticator {
        fn plugin_name(&self) -> &str {
            self.plugin
        }

        async fn authenticate(&self, _user: &str, response: &[u8], challenge: &[u8]) -> bool {
            assert_eq!(challenge.len(), 20);
            response == self.expected
        }
    }

    fn client_response(plugin: &str, auth_response: Vec<u8>) -> Vec<u8> {
        let packet = HandshakeResponsePacket {
            capabilities: CLIENT_PROTOCOL_41 | CLIENT_SECURE_CONNECTION | CLIENT_PLUGIN_AUTH,
            max_packet_size: MAX_PACKET_SIZE,
            charset: CHARSET_UTF8MB4,
            username: "root".into(),
            auth_response,
            database: None,
            auth_plugin_name: Some(plugin.into()),
        };
        let mut payload = PacketPayload::new();
        packet.encode(&mut payload).unwrap();
        payload.into_vec()
    }

    #[tokio::test]
    async fn test_establish_without_switch() {
        let (mut server, mut client) = tokio::io::duplex(4096);
        let phase = ConnectionPhase::new(7, "10.0.0.1", AuthConfig::default());
        let authenticator = StaticAuthenticator {
            plugin: "mysql_native_password",
            expected: vec![0xAB; 20],
        };

        let client_task = tokio::spawn(async move {
            let bytes = read_packet(&mut client, 0).await.unwrap();
            let mut payload = PacketPayload::from_bytes(&bytes);
            let handshake = HandshakePacket::decode(&mut payload).unwrap();
            assert_eq!(handshake.auth_plugin_name, "mysql_native_password");

            let response = client_response("mysql_native_password", vec![0xAB; 20]);
            write_packet(&mut client, 1, &response).await.unwrap();

            let verdict = read_packet(&mut client, 2).await.unwrap();
            assert_eq!(verdict[0], OK_HEADER);
        });

        let session = phase.establish(&mut server, &authenticator).await.unwrap();
        assert_eq!(session.connection_id, 7);
        assert_eq!(session.user, "root");
        client_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_establish_with_auth_switch() {
        let (mut server, mut client) = tokio::io::duplex(4096);
        let phase = ConnectionPhase::new(8, "10.0.0.2", AuthConfig::default());
        let authenticator = StaticAuthenticator {
            plugin: "mysql_clear_password",
            expected: b"secret".to_vec(),
        };

        let client_task = tokio::spawn(async move {
            let bytes = read_packet(&mut client, 0).await.unwrap();
            let mut payload = PacketPayload::from_bytes(&bytes);
            let handshake = HandshakePacket::decode(&mut payload).unwrap();

            // Client negotiated the default plugin; verifier wants another.
            let response = client_response("mysql_native_password", vec![0x00; 20]);
            write_packet(&mut client, 1, &response).await.unwrap();

            let bytes = read_packet(&mut client, 2).await.unwrap();
            let mut payload = PacketPayload::from_bytes(&bytes);
            let switch = AuthSwitchRequestPacket::decode(&mut payload).unwrap();
            assert_eq!(switch.auth_plugin_name, "mysql_clear_password");
            assert_eq!(switch.auth_plugin_data, handshake.auth_plugin_data.bytes());

            write_packet(&mut client, 3, b"secret").await.unwrap();

            let verdict = read_packet(&mut client, 4).await.unwrap();
            assert_eq!(verdict[0], OK_HEADER);
        });

        let session = phase.establish(&mut server, &authenticator).await.unwrap();
        assert_eq!(session.user, "root");
        client_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_undecodable_response_is_fatal() {
        let (mut server, mut client) = tokio::io::duplex(4096);
        let phase = ConnectionPhase::new(9, "10.0.0.3", AuthConfig::default());
        let authenticator = StaticAuthenticator {
            plugin: "mysql_native_password",
            expected: vec![],
        };

        let client_task = tokio::spawn(async move {
            let _ = read_packet(&mut client, 0).await.unwrap();
            // Well-framed but undecodable payload.
            write_packet(&mut client, 1, &[0x0D, 0xA2]).await.unwrap();
        });

        let err = phase.establish(&mut server, &authenticator).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { .. }));
        client_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_credentials() {
        let (mut server, mut client) = tokio::io::duplex(4096);
        let phase = ConnectionPhase::new(10, "10.0.0.4", AuthConfig::default());
        let authenticator = StaticAuthenticator {
            plugin: "mysql_native_password",
            expected: vec![0x01; 20],
        };

        let client_task = tokio::spawn(async move {
            let _ = read_packet(&mut client, 0).await.unwrap();
            let response = client_response("mysql_native_password", vec![0xFF; 20]);
            write_packet(&mut client, 1, &response).await.unwrap();

            let verdict = read_packet(&mut client, 2).await.unwrap();
            assert_eq!(verdict[0], ERR_HEADER);
            let mut payload = PacketPayload::from_bytes(&verdict);
            let err = ErrPacket::decode(&mut payload).unwrap();
            assert_eq!(err.error_code, 1045);
        });

        let err = phase.establish(&mut server, &authenticator).await.unwrap_err();
        assert!(matches!(err, ProtocolError::AuthFailed { .. }));
        client_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_out_of_order_sequence() {
        let (mut server, mut client) = tokio::io::duplex(4096);
        let phase = ConnectionPhase::new(11, "10.0.0.5", AuthConfig::default());
        let authenticator = StaticAuthenticator {
            plugin: "mysql_native_password",
            expected: vec![],
        };

        let client_task = tokio::spawn(async move {
            let _ = read_packet(&mut client, 0).await.unwrap();
            // Wrong sequence id on the response frame.
            write_packet(&mut client, 5, &client_response("mysql_native_password", vec![]))
                .await
                .unwrap();
        });

        let err = phase.establish(&mut server, &authenticator).await.unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::OutOfOrderPacket {
                expected: 1,
                actual: 5
            }
        ));
        client_task.await.unwrap();
    }
}
