//! Minimal Socket.IO v4 server over a real WebSocket for integration tests.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

/// How the server answers the namespace connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Ack with `40{"sid":..}`.
    Accept,
    /// Refuse with `44{"message":"unauthorized"}`.
    Reject,
}

/// One accepted client.
#[derive(Debug)]
pub struct ServerConn {
    /// `Cookie` header of the upgrade request.
    pub cookie: Option<String>,
    /// Text frames to push to the client.
    pub tx: mpsc::UnboundedSender<String>,
    /// Text frames received after the handshake.
    pub rx: mpsc::UnboundedReceiver<String>,
}

impl ServerConn {
    /// Next frame from the client, with a timeout.
    pub async fn next_frame(&mut self) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Push a raw Engine.IO frame.
    pub fn push(&self, frame: &str) {
        self.tx.send(frame.to_string()).unwrap();
    }
}

/// A running fake server.
#[derive(Debug)]
pub struct FakeServer {
    /// Engine.IO WebSocket URL.
    pub url: String,
    /// Clients that completed (or attempted) the handshake.
    pub connections: mpsc::UnboundedReceiver<ServerConn>,
}

impl FakeServer {
    /// Bind on an ephemeral port and serve forever.
    pub async fn start(mode: Mode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (conn_tx, conn_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let conn_tx = conn_tx.clone();
                tokio::spawn(serve(stream, mode, conn_tx));
            }
        });

        Self {
            url: format!("ws://{addr}/socket.io/?EIO=4&transport=websocket"),
            connections: conn_rx,
        }
    }

    /// Next client, with a timeout.
    pub async fn next_conn(&mut self) -> ServerConn {
        tokio::time::timeout(Duration::from_secs(5), self.connections.recv())
            .await
            .expect("no client connected in time")
            .expect("server stopped")
    }
}

async fn serve(
    stream: tokio::net::TcpStream,
    mode: Mode,
    conn_tx: mpsc::UnboundedSender<ServerConn>,
) {
    let mut cookie = None;
    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        cookie = req
            .headers()
            .get("cookie")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        Ok(resp)
    };
    let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
        return;
    };

    let open = r#"0{"sid":"eio-sid","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;
    if ws.send(Message::Text(open.into())).await.is_err() {
        return;
    }

    // wait for the namespace connect
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) if text.starts_with("40") => break,
            Some(Ok(_)) => {}
            _ => return,
        }
    }

    let (tx, mut outgoing) = mpsc::unbounded_channel::<String>();
    let (incoming, rx) = mpsc::unbounded_channel::<String>();
    let _ = conn_tx.send(ServerConn { cookie, tx, rx });

    if mode == Mode::Reject {
        let _ = ws
            .send(Message::Text(r#"44{"message":"unauthorized"}"#.into()))
            .await;
        let _ = ws.close(None).await;
        return;
    }
    if ws
        .send(Message::Text(r#"40{"sid":"sio-sid"}"#.into()))
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            frame = ws.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let _ = incoming.send(text);
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => {}
            },
            out = outgoing.recv() => match out {
                Some(text) => {
                    if ws.send(Message::Text(text)).await.is_err() {
                        return;
                    }
                }
                None => {
                    let _ = ws.close(None).await;
                    return;
                }
            },
        }
    }
}

/// Poll `cond` for up to five seconds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
