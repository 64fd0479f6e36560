use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::connection::ConnectionId;

/// Opaque producer-supplied description of a stream.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Handshake message kinds relayed between peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Offer,
    Answer,
    Candidate,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::Candidate => "candidate",
        }
    }
}

/// Client half of an offer/answer/candidate exchange.
///
/// Addressed either by `target` (a connection id) or by `stream_id` (the
/// stream's producer). A client-supplied `sender` is accepted on the wire and
/// then ignored; the relay stamps the real one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<serde_json::Value>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Relayed handshake message as delivered to its recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalNotice {
    pub sender: ConnectionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Messages sent from client to broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Register as the producer of a stream
    #[serde(rename_all = "camelCase")]
    ProducerRegister {
        #[serde(default)]
        stream_id: Option<String>,
        #[serde(default)]
        metadata: Metadata,
    },
    /// Join a stream as a consumer
    #[serde(rename_all = "camelCase")]
    ConsumerJoin { stream_id: String },
    /// Leave whichever stream this connection consumes
    ConsumerLeave,
    Offer(SignalRequest),
    Answer(SignalRequest),
    Candidate(SignalRequest),
    /// Fallback data from the producer, fanned out to consumers
    #[serde(rename_all = "camelCase")]
    Data {
        stream_id: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
    /// Heartbeat
    Ping,
}

/// Messages sent from broker to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// First message on every connection
    #[serde(rename_all = "camelCase")]
    Connected { connection_id: ConnectionId },
    #[serde(rename_all = "camelCase")]
    ProducerReady { stream_id: String },
    #[serde(rename_all = "camelCase")]
    ConsumerReady { stream_id: String },
    #[serde(rename_all = "camelCase")]
    StreamNotFound { stream_id: String },
    PeerJoined { id: ConnectionId },
    PeerLeft { id: ConnectionId },
    #[serde(rename_all = "camelCase")]
    SessionEnded { stream_id: String },
    Offer(SignalNotice),
    Answer(SignalNotice),
    Candidate(SignalNotice),
    #[serde(rename_all = "camelCase")]
    Data {
        stream_id: String,
        payload: serde_json::Value,
    },
    Pong,
    Error { code: String, message: String },
}

impl ServerMessage {
    pub fn signal(kind: SignalKind, notice: SignalNotice) -> Self {
        match kind {
            SignalKind::Offer => ServerMessage::Offer(notice),
            SignalKind::Answer => ServerMessage::Answer(notice),
            SignalKind::Candidate => ServerMessage::Candidate(notice),
        }
    }
}

/// Snapshot row returned by the query surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub producer_id: ConnectionId,
    pub consumer_count: usize,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    /// True when the producer lives on the other broker instance.
    pub bridged: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_register_without_stream_id() {
        let msg: ClientMessage =
            serde_json::from_value(json!({"type": "producer-register", "metadata": {"cam": "pi"}}))
                .unwrap();
        match msg {
            ClientMessage::ProducerRegister {
                stream_id,
                metadata,
            } => {
                assert!(stream_id.is_none());
                assert_eq!(metadata.get("cam"), Some(&json!("pi")));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn signal_request_keeps_forged_sender_separate() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "type": "answer",
            "target": "6f1d3f7e-8a51-4c1c-9c59-0c3f3e5e8b11",
            "sender": "someone-else",
            "payload": {"sdp": "v=0"}
        }))
        .unwrap();
        let ClientMessage::Answer(request) = msg else {
            panic!("expected answer");
        };
        assert_eq!(
            request.target.as_deref(),
            Some("6f1d3f7e-8a51-4c1c-9c59-0c3f3e5e8b11")
        );
        assert_eq!(request.sender, Some(json!("someone-else")));
        assert_eq!(request.payload, json!({"sdp": "v=0"}));
    }

    #[test]
    fn server_messages_use_kebab_case_tags() {
        let value = serde_json::to_value(ServerMessage::SessionEnded {
            stream_id: "s1".into(),
        })
        .unwrap();
        assert_eq!(value, json!({"type": "session-ended", "streamId": "s1"}));

        let value = serde_json::to_value(ServerMessage::Pong).unwrap();
        assert_eq!(value, json!({"type": "pong"}));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let result = serde_json::from_value::<ClientMessage>(json!({"type": "teleport"}));
        assert!(result.is_err());
    }
}
