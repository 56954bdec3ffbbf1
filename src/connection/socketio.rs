//! Socket.IO over WebSocket connector.
//!
//! Performs the Engine.IO open + namespace connect handshake, then spawns a
//! pump task that answers heartbeats, decodes events into [`LinkEvent`]s
//! and encodes outbound [`OutboundFrame`]s.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::packet::{EnginePacket, OpenInfo, SocketPacket};
use super::{Connector, DisconnectReason, Link, LinkEvent, OutboundFrame};
use crate::config::Config;
use crate::constants;
use crate::error::ConnectionError;
use crate::ws::{self, WsFrame, WsReader, WsWriter};

/// Connector for the auction server's Socket.IO endpoint.
#[derive(Clone)]
pub struct SocketIoConnector {
    url: String,
    session_cookie: Option<String>,
}

impl std::fmt::Debug for SocketIoConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketIoConnector")
            .field("url", &self.url)
            .field("has_session", &self.session_cookie.is_some())
            .finish()
    }
}

impl SocketIoConnector {
    /// Connector for an explicit Engine.IO WebSocket URL.
    #[must_use]
    pub fn new(url: String, session_cookie: Option<String>) -> Self {
        Self {
            url,
            session_cookie,
        }
    }

    /// Connector for the configured server and session.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let cookie = config.has_session().then(|| config.session_cookie.clone());
        Self::new(ws::socket_url(&config.server_url, &config.socket_path), cookie)
    }

    /// Endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for SocketIoConnector {
    async fn connect(&self) -> Result<Link, ConnectionError> {
        let cookie_header = self
            .session_cookie
            .as_ref()
            .map(|c| format!("{}={}", constants::SESSION_COOKIE_NAME, c));

        log::debug!("[Socket] Opening {}", self.url);
        let (mut writer, mut reader) = ws::connect(&self.url, cookie_header.as_deref()).await?;

        let open = wait_for_open(&mut reader).await?;
        log::debug!(
            "[Socket] Engine.IO open sid={} pingInterval={}ms pingTimeout={}ms",
            open.sid,
            open.ping_interval,
            open.ping_timeout
        );

        writer
            .send_text(EnginePacket::Message(SocketPacket::connect()).encode())
            .await?;
        wait_for_namespace(&mut writer, &mut reader).await?;

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::channel(constants::LINK_BUFFER);
        let silence_limit = Duration::from_millis(open.ping_interval + open.ping_timeout);
        tokio::spawn(pump(writer, reader, out_rx, in_tx, silence_limit));

        Ok(Link {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

async fn next_packet(reader: &mut WsReader) -> Result<EnginePacket, ConnectionError> {
    loop {
        match reader.recv().await {
            Some(Ok(WsFrame::Text(text))) => return EnginePacket::decode(&text),
            Some(Ok(WsFrame::Binary(_))) => {
                log::debug!("[Socket] Skipping binary frame during handshake");
            }
            Some(Ok(WsFrame::Close { .. })) | None => return Err(ConnectionError::Closed),
            Some(Err(e)) => return Err(e),
        }
    }
}

async fn wait_for_open(reader: &mut WsReader) -> Result<OpenInfo, ConnectionError> {
    loop {
        match next_packet(reader).await? {
            EnginePacket::Open(info) => return Ok(info),
            EnginePacket::Noop => {}
            other => {
                return Err(ConnectionError::Protocol(format!(
                    "expected open packet, got {other:?}"
                )))
            }
        }
    }
}

async fn wait_for_namespace(
    writer: &mut WsWriter,
    reader: &mut WsReader,
) -> Result<(), ConnectionError> {
    loop {
        match next_packet(reader).await? {
            EnginePacket::Message(SocketPacket::Connect { .. }) => return Ok(()),
            EnginePacket::Message(SocketPacket::ConnectError { message, .. }) => {
                return Err(ConnectionError::Rejected(message))
            }
            EnginePacket::Ping => writer.send_text(EnginePacket::Pong.encode()).await?,
            EnginePacket::Close => return Err(ConnectionError::Closed),
            other => log::trace!("[Socket] Ignoring {:?} before namespace ack", other),
        }
    }
}

/// Bridge between the WebSocket and the transport's channels for one link.
async fn pump(
    mut writer: WsWriter,
    mut reader: WsReader,
    mut outbound: mpsc::UnboundedReceiver<OutboundFrame>,
    inbound: mpsc::Sender<LinkEvent>,
    silence_limit: Duration,
) {
    let reason = loop {
        tokio::select! {
            frame = tokio::time::timeout(silence_limit, reader.recv()) => {
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(_elapsed) => break DisconnectReason::PingTimeout,
                };
                match frame {
                    Some(Ok(WsFrame::Text(text))) => match EnginePacket::decode(&text) {
                        Ok(EnginePacket::Ping) => {
                            if let Err(e) = writer.send_text(EnginePacket::Pong.encode()).await {
                                break DisconnectReason::TransportError(e.to_string());
                            }
                        }
                        Ok(EnginePacket::Message(SocketPacket::Event { namespace, name, payload, .. })) => {
                            if namespace != "/" {
                                log::trace!("[Socket] Ignoring '{}' on namespace {}", name, namespace);
                                continue;
                            }
                            if inbound.send(LinkEvent::Event { name, payload }).await.is_err() {
                                // transport went away without a Close frame
                                let _ = writer.send_text(EnginePacket::Message(SocketPacket::disconnect()).encode()).await;
                                let _ = writer.close().await;
                                return;
                            }
                        }
                        Ok(EnginePacket::Message(SocketPacket::Disconnect { .. })) => {
                            break DisconnectReason::ServerDisconnect;
                        }
                        Ok(EnginePacket::Close) => break DisconnectReason::TransportClose,
                        Ok(other) => log::trace!("[Socket] Ignoring {:?}", other),
                        Err(e) => log::warn!("[Socket] Undecodable frame: {}", e),
                    },
                    Some(Ok(WsFrame::Binary(_))) => log::trace!("[Socket] Ignoring binary frame"),
                    Some(Ok(WsFrame::Close { code, reason })) => {
                        log::info!("[Socket] Server closed WebSocket ({}): {}", code, reason);
                        break DisconnectReason::TransportClose;
                    }
                    Some(Err(e)) => break DisconnectReason::TransportError(e.to_string()),
                    None => break DisconnectReason::TransportClose,
                }
            }

            frame = outbound.recv() => match frame {
                Some(OutboundFrame::Event { name, payload }) => {
                    let text = EnginePacket::Message(SocketPacket::event(&name, payload)).encode();
                    if let Err(e) = writer.send_text(text).await {
                        break DisconnectReason::TransportError(e.to_string());
                    }
                }
                Some(OutboundFrame::Close) | None => {
                    let _ = writer
                        .send_text(EnginePacket::Message(SocketPacket::disconnect()).encode())
                        .await;
                    let _ = writer.close().await;
                    return;
                }
            }
        }
    };

    let _ = writer.close().await;
    let _ = inbound.send(LinkEvent::Closed(reason)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_builds_socket_url_and_cookie() {
        let mut config = Config::default();
        config.server_url = "https://subastas.test".into();
        let connector = SocketIoConnector::from_config(&config);
        assert_eq!(
            connector.url(),
            "wss://subastas.test/socket.io/?EIO=4&transport=websocket"
        );
        assert!(connector.session_cookie.is_none());

        config.session_cookie = "abc".into();
        let connector = SocketIoConnector::from_config(&config);
        assert_eq!(connector.session_cookie.as_deref(), Some("abc"));
    }

    #[test]
    fn test_debug_hides_cookie() {
        let connector = SocketIoConnector::new("ws://x".into(), Some("topsecret".into()));
        assert!(!format!("{connector:?}").contains("topsecret"));
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails_with_transport_error() {
        let connector = SocketIoConnector::new(
            "ws://127.0.0.1:1/socket.io/?EIO=4&transport=websocket".into(),
            None,
        );
        assert!(matches!(
            connector.connect().await,
            Err(ConnectionError::Transport(_))
        ));
    }
}
