use thiserror::Error;

use crate::protocol::ServerMessage;

/// Failures raised while processing one connection's request.
///
/// Every variant except [`BrokerError::TargetUnreachable`] is turned into a
/// notification on the originating connection; unreachable relay targets are
/// dropped without telling the sender.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    #[error("stream not found: {0}")]
    StreamNotFound(String),
    #[error("target unreachable: {0}")]
    TargetUnreachable(String),
    #[error("malformed request: {0}")]
    MalformedRequest(String),
    #[error("stream id already in use: {0}")]
    StreamIdConflict(String),
    #[error("internal failure: {0}")]
    InternalFailure(String),
}

impl BrokerError {
    pub fn malformed(message: impl Into<String>) -> Self {
        BrokerError::MalformedRequest(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            BrokerError::StreamNotFound(_) => "stream_not_found",
            BrokerError::TargetUnreachable(_) => "target_unreachable",
            BrokerError::MalformedRequest(_) => "malformed_request",
            BrokerError::StreamIdConflict(_) => "stream_id_conflict",
            BrokerError::InternalFailure(_) => "internal_failure",
        }
    }

    /// The same-channel notification for this error, if the sender is told at all.
    pub fn notification(&self) -> Option<ServerMessage> {
        match self {
            BrokerError::StreamNotFound(stream_id) => Some(ServerMessage::StreamNotFound {
                stream_id: stream_id.clone(),
            }),
            BrokerError::TargetUnreachable(_) => None,
            BrokerError::InternalFailure(_) => Some(ServerMessage::Error {
                code: self.code().to_string(),
                message: "internal failure while processing message".to_string(),
            }),
            other => Some(ServerMessage::Error {
                code: other.code().to_string(),
                message: other.to_string(),
            }),
        }
    }
}
