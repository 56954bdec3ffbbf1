//! Engine.IO v4 / Socket.IO v5 text packet codec.
//!
//! ```text
//! 0{"sid":"..","pingInterval":25000,"pingTimeout":20000}   open
//! 2 / 3                                                     ping / pong
//! 40  40{"sid":".."}                                        namespace connect (+ ack)
//! 42["notification",{..}]                                   event
//! 42/admin,7["new_bid",{..}]                                event, namespace + ack id
//! 44{"message":"Unauthorized"}                              connect error
//! 41                                                        namespace disconnect
//! ```
//!
//! Binary events (types 5/6) are not used by the auction server and are
//! rejected as protocol errors.

use serde::Deserialize;
use serde_json::Value;

use crate::error::ConnectionError;

const DEFAULT_NAMESPACE: &str = "/";

/// Handshake parameters sent by the server in the Engine.IO open packet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    /// Engine.IO session id.
    pub sid: String,
    /// Server ping cadence in milliseconds.
    pub ping_interval: u64,
    /// Grace period after a missed ping in milliseconds.
    pub ping_timeout: u64,
}

/// Engine.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    /// `0` handshake.
    Open(OpenInfo),
    /// `1` transport close.
    Close,
    /// `2` heartbeat from the server.
    Ping,
    /// `3` heartbeat answer.
    Pong,
    /// `4` Socket.IO payload.
    Message(SocketPacket),
    /// `6` no-op.
    Noop,
}

/// Socket.IO packet carried inside an Engine.IO message.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    /// `0` namespace connect (client request or server ack).
    Connect {
        /// Namespace, `/` by default.
        namespace: String,
        /// Ack body (`{"sid":..}`) on the server side.
        data: Option<Value>,
    },
    /// `1` namespace disconnect.
    Disconnect {
        /// Namespace, `/` by default.
        namespace: String,
    },
    /// `2` named event.
    Event {
        /// Namespace, `/` by default.
        namespace: String,
        /// Acknowledgement id requested by the sender, if any.
        ack_id: Option<u64>,
        /// Event name.
        name: String,
        /// First argument after the name; `Null` when absent.
        payload: Value,
    },
    /// `3` acknowledgement.
    Ack {
        /// Namespace, `/` by default.
        namespace: String,
        /// Acknowledged id.
        ack_id: u64,
    },
    /// `4` namespace connect refused.
    ConnectError {
        /// Namespace, `/` by default.
        namespace: String,
        /// Server-provided reason.
        message: String,
    },
}

impl EnginePacket {
    /// Decode one text frame.
    pub fn decode(text: &str) -> Result<Self, ConnectionError> {
        let mut chars = text.chars();
        let kind = chars
            .next()
            .ok_or_else(|| ConnectionError::Protocol("empty frame".into()))?;
        let rest = chars.as_str();

        match kind {
            '0' => {
                let info: OpenInfo = serde_json::from_str(rest)
                    .map_err(|e| ConnectionError::Protocol(format!("bad open packet: {e}")))?;
                Ok(Self::Open(info))
            }
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping),
            '3' => Ok(Self::Pong),
            '4' => SocketPacket::decode(rest).map(Self::Message),
            '6' => Ok(Self::Noop),
            other => Err(ConnectionError::Protocol(format!(
                "unknown engine packet type {other:?}"
            ))),
        }
    }

    /// Encode for sending. Only client-originated packets are supported.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Open(_) | Self::Noop => "6".to_string(),
            Self::Close => "1".to_string(),
            Self::Ping => "2".to_string(),
            Self::Pong => "3".to_string(),
            Self::Message(packet) => format!("4{}", packet.encode()),
        }
    }
}

impl SocketPacket {
    /// Namespace connect request for the default namespace.
    #[must_use]
    pub fn connect() -> Self {
        Self::Connect {
            namespace: DEFAULT_NAMESPACE.to_string(),
            data: None,
        }
    }

    /// Namespace disconnect for the default namespace.
    #[must_use]
    pub fn disconnect() -> Self {
        Self::Disconnect {
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    /// Event on the default namespace without an ack.
    #[must_use]
    pub fn event(name: &str, payload: Value) -> Self {
        Self::Event {
            namespace: DEFAULT_NAMESPACE.to_string(),
            ack_id: None,
            name: name.to_string(),
            payload,
        }
    }

    fn decode(text: &str) -> Result<Self, ConnectionError> {
        let mut chars = text.chars();
        let kind = chars
            .next()
            .ok_or_else(|| ConnectionError::Protocol("empty socket packet".into()))?;
        let mut rest = chars.as_str();

        let mut namespace = DEFAULT_NAMESPACE.to_string();
        if rest.starts_with('/') {
            let end = rest.find(',').unwrap_or(rest.len());
            namespace = rest[..end].to_string();
            rest = rest.get(end + 1..).unwrap_or("");
        }

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let ack_id = if digits > 0 {
            Some(rest[..digits].parse::<u64>().map_err(|e| {
                ConnectionError::Protocol(format!("bad ack id: {e}"))
            })?)
        } else {
            None
        };
        rest = &rest[digits..];

        let body: Option<Value> = if rest.is_empty() {
            None
        } else {
            Some(
                serde_json::from_str(rest)
                    .map_err(|e| ConnectionError::Protocol(format!("bad packet body: {e}")))?,
            )
        };

        match kind {
            '0' => Ok(Self::Connect {
                namespace,
                data: body,
            }),
            '1' => Ok(Self::Disconnect { namespace }),
            '2' => {
                let Some(Value::Array(mut args)) = body else {
                    return Err(ConnectionError::Protocol(
                        "event body must be an array".into(),
                    ));
                };
                if args.is_empty() {
                    return Err(ConnectionError::Protocol("event without a name".into()));
                }
                let name = match args.remove(0) {
                    Value::String(name) => name,
                    other => {
                        return Err(ConnectionError::Protocol(format!(
                            "event name must be a string, got {other}"
                        )))
                    }
                };
                let payload = if args.is_empty() {
                    Value::Null
                } else {
                    args.swap_remove(0)
                };
                Ok(Self::Event {
                    namespace,
                    ack_id,
                    name,
                    payload,
                })
            }
            '3' => Ok(Self::Ack {
                namespace,
                ack_id: ack_id
                    .ok_or_else(|| ConnectionError::Protocol("ack without id".into()))?,
            }),
            '4' => {
                let message = body
                    .as_ref()
                    .and_then(|b| b.get("message"))
                    .and_then(Value::as_str)
                    .map_or_else(
                        || body.as_ref().map(ToString::to_string).unwrap_or_default(),
                        str::to_string,
                    );
                Ok(Self::ConnectError { namespace, message })
            }
            '5' | '6' => Err(ConnectionError::Protocol(
                "binary packets are not supported".into(),
            )),
            other => Err(ConnectionError::Protocol(format!(
                "unknown socket packet type {other:?}"
            ))),
        }
    }

    fn encode(&self) -> String {
        fn ns_prefix(namespace: &str) -> String {
            if namespace == DEFAULT_NAMESPACE {
                String::new()
            } else {
                format!("{namespace},")
            }
        }

        match self {
            Self::Connect { namespace, data } => {
                let body = data.as_ref().map(ToString::to_string).unwrap_or_default();
                format!("0{}{}", ns_prefix(namespace), body)
            }
            Self::Disconnect { namespace } => format!("1{}", ns_prefix(namespace)),
            Self::Event {
                namespace,
                ack_id,
                name,
                payload,
            } => {
                let args = if payload.is_null() {
                    Value::Array(vec![Value::String(name.clone())])
                } else {
                    Value::Array(vec![Value::String(name.clone()), payload.clone()])
                };
                let ack = ack_id.map(|id| id.to_string()).unwrap_or_default();
                format!("2{}{}{}", ns_prefix(namespace), ack, args)
            }
            Self::Ack { namespace, ack_id } => format!("3{}{}[]", ns_prefix(namespace), ack_id),
            Self::ConnectError { namespace, message } => format!(
                "4{}{}",
                ns_prefix(namespace),
                serde_json::json!({ "message": message })
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_open_packet() {
        let packet = EnginePacket::decode(
            r#"0{"sid":"lv_VI97HAXpY6yYWAAAC","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#,
        )
        .unwrap();
        assert_eq!(
            packet,
            EnginePacket::Open(OpenInfo {
                sid: "lv_VI97HAXpY6yYWAAAC".into(),
                ping_interval: 25000,
                ping_timeout: 20000,
            })
        );
    }

    #[test]
    fn test_decode_notification_event() {
        let packet = EnginePacket::decode(
            r#"42["notification",{"type":"OUTBID","title":"Superado","message":"m","data":{"auction_id":"a1"}}]"#,
        )
        .unwrap();
        let EnginePacket::Message(SocketPacket::Event { name, payload, ack_id, namespace }) = packet
        else {
            panic!("expected event");
        };
        assert_eq!(namespace, "/");
        assert_eq!(ack_id, None);
        assert_eq!(name, "notification");
        assert_eq!(payload["data"]["auction_id"], "a1");
    }

    #[test]
    fn test_decode_event_with_namespace_and_ack_id() {
        let packet = EnginePacket::decode(r#"42/auctions,17["auction:ended",{"auctionId":"a9"}]"#)
            .unwrap();
        assert_eq!(
            packet,
            EnginePacket::Message(SocketPacket::Event {
                namespace: "/auctions".into(),
                ack_id: Some(17),
                name: "auction:ended".into(),
                payload: json!({"auctionId": "a9"}),
            })
        );
    }

    #[test]
    fn test_decode_event_without_arguments_has_null_payload() {
        let packet = EnginePacket::decode(r#"42["refresh"]"#).unwrap();
        let EnginePacket::Message(SocketPacket::Event { payload, .. }) = packet else {
            panic!("expected event");
        };
        assert!(payload.is_null());
    }

    #[test]
    fn test_decode_connect_ack_and_error() {
        assert_eq!(
            EnginePacket::decode(r#"40{"sid":"abc"}"#).unwrap(),
            EnginePacket::Message(SocketPacket::Connect {
                namespace: "/".into(),
                data: Some(json!({"sid": "abc"})),
            })
        );
        assert_eq!(
            EnginePacket::decode(r#"44{"message":"Unauthorized"}"#).unwrap(),
            EnginePacket::Message(SocketPacket::ConnectError {
                namespace: "/".into(),
                message: "Unauthorized".into(),
            })
        );
    }

    #[test]
    fn test_decode_heartbeats_and_close() {
        assert_eq!(EnginePacket::decode("2").unwrap(), EnginePacket::Ping);
        assert_eq!(EnginePacket::decode("3").unwrap(), EnginePacket::Pong);
        assert_eq!(EnginePacket::decode("1").unwrap(), EnginePacket::Close);
        assert_eq!(
            EnginePacket::decode("41").unwrap(),
            EnginePacket::Message(SocketPacket::Disconnect { namespace: "/".into() })
        );
    }

    #[test]
    fn test_decode_rejects_malformed_frames() {
        assert!(EnginePacket::decode("").is_err());
        assert!(EnginePacket::decode("9").is_err());
        assert!(EnginePacket::decode("42{not json").is_err());
        assert!(EnginePacket::decode(r#"42{"not":"array"}"#).is_err());
        assert!(EnginePacket::decode("42[]").is_err());
        assert!(EnginePacket::decode("42[1,2]").is_err());
        assert!(EnginePacket::decode(r#"451-["bin",{"_placeholder":true,"num":0}]"#).is_err());
    }

    #[test]
    fn test_encode_client_packets() {
        assert_eq!(EnginePacket::Message(SocketPacket::connect()).encode(), "40");
        assert_eq!(EnginePacket::Message(SocketPacket::disconnect()).encode(), "41");
        assert_eq!(EnginePacket::Pong.encode(), "3");
        assert_eq!(
            EnginePacket::Message(SocketPacket::event("join_auction", json!({"auctionId": "a1"})))
                .encode(),
            r#"42["join_auction",{"auctionId":"a1"}]"#
        );
        assert_eq!(
            EnginePacket::Message(SocketPacket::event("ping_me", Value::Null)).encode(),
            r#"42["ping_me"]"#
        );
    }
}
