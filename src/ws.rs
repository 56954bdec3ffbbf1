//! WebSocket leg of the push channel.
//!
//! Engine.IO v4 runs as text frames over one WebSocket. This module owns the
//! upgrade (with the ambient session cookie) and hands back split halves
//! that speak [`WsFrame`]s instead of raw tungstenite messages.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::ConnectionError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code reported when the peer closed without one.
const NO_STATUS_CODE: u16 = 1005;

/// A frame the push channel cares about.
#[derive(Debug, PartialEq, Eq)]
pub enum WsFrame {
    /// Engine.IO packet.
    Text(String),
    /// Binary payload; Engine.IO v4 text transport never sends these.
    Binary(Vec<u8>),
    /// Peer closed the socket.
    Close {
        /// Close code, 1005 when absent.
        code: u16,
        /// Close reason, possibly empty.
        reason: String,
    },
}

impl WsFrame {
    /// Control frames (ping/pong/raw) are answered by tungstenite and map to
    /// `None`.
    fn from_message(message: Message) -> Option<Self> {
        match message {
            Message::Text(text) => Some(Self::Text(text)),
            Message::Binary(data) => Some(Self::Binary(data)),
            Message::Close(frame) => Some(close_frame(frame)),
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => None,
        }
    }
}

fn close_frame(frame: Option<CloseFrame<'_>>) -> WsFrame {
    match frame {
        Some(frame) => WsFrame::Close {
            code: frame.code.into(),
            reason: frame.reason.into_owned(),
        },
        None => WsFrame::Close {
            code: NO_STATUS_CODE,
            reason: String::new(),
        },
    }
}

fn transport(context: &str, e: impl std::fmt::Display) -> ConnectionError {
    ConnectionError::Transport(format!("{context}: {e}"))
}

/// Sending half.
#[derive(Debug)]
pub struct WsWriter {
    sink: SplitSink<Socket, Message>,
}

impl WsWriter {
    /// Send one Engine.IO packet.
    pub async fn send_text(&mut self, text: String) -> Result<(), ConnectionError> {
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| transport("send failed", e))
    }

    /// Send a close frame and flush.
    pub async fn close(&mut self) -> Result<(), ConnectionError> {
        self.sink
            .close()
            .await
            .map_err(|e| transport("close failed", e))
    }
}

/// Receiving half.
#[derive(Debug)]
pub struct WsReader {
    stream: SplitStream<Socket>,
}

impl WsReader {
    /// Next frame, or `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<Result<WsFrame, ConnectionError>> {
        while let Some(message) = self.stream.next().await {
            match message {
                Ok(message) => {
                    if let Some(frame) = WsFrame::from_message(message) {
                        return Some(Ok(frame));
                    }
                }
                Err(e) => return Some(Err(transport("read error", e))),
            }
        }
        None
    }
}

/// Upgrade to a WebSocket at `url`, sending `cookie` as the `Cookie` header.
pub async fn connect(
    url: &str,
    cookie: Option<&str>,
) -> Result<(WsWriter, WsReader), ConnectionError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| transport(&format!("invalid WebSocket URL {url}"), e))?;
    if let Some(cookie) = cookie {
        let value =
            HeaderValue::from_str(cookie).map_err(|e| transport("invalid cookie header", e))?;
        request.headers_mut().insert(header::COOKIE, value);
    }

    let (socket, response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| transport("WebSocket upgrade failed", e))?;
    log::trace!("[Socket] Upgrade answered {}", response.status());

    let (sink, stream) = socket.split();
    Ok((WsWriter { sink }, WsReader { stream }))
}

/// `http(s)://` becomes `ws(s)://`; anything else is returned as is.
#[must_use]
pub fn http_to_ws_scheme(url: &str) -> String {
    match url.split_once("://") {
        Some(("https", rest)) => format!("wss://{rest}"),
        Some(("http", rest)) => format!("ws://{rest}"),
        _ => url.to_string(),
    }
}

/// Engine.IO v4 WebSocket endpoint for `server_url` and `socket_path`.
#[must_use]
pub fn socket_url(server_url: &str, socket_path: &str) -> String {
    let base = http_to_ws_scheme(server_url.trim_end_matches('/'));
    let path = socket_path.trim_matches('/');
    format!("{base}/{path}/?EIO=4&transport=websocket")
}
