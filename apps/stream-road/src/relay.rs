//! Routing of handshake and data messages.
//!
//! The relay keeps no state of its own: it resolves recipients through the
//! instance's registries, stamps the sender, and hands anything addressed to
//! the other instance to the bridge.

use tracing::{debug, warn};

use crate::broker::BrokerInstance;
use crate::connection::{ConnectionId, ConnectionRegistry};
use crate::error::BrokerError;
use crate::protocol::{ServerMessage, SignalKind, SignalNotice, SignalRequest};

/// Outcome of a fan-out over several recipients.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanOut {
    pub delivered: usize,
    pub failed: usize,
}

pub fn deliver(
    connections: &ConnectionRegistry,
    target: ConnectionId,
    message: ServerMessage,
) -> Result<(), BrokerError> {
    connections.send(target, message)
}

/// Send the same message to every recipient; one failure never stops the rest.
pub fn fan_out(
    connections: &ConnectionRegistry,
    recipients: impl IntoIterator<Item = ConnectionId>,
    message: &ServerMessage,
) -> FanOut {
    let mut outcome = FanOut::default();
    for recipient in recipients {
        match connections.send(recipient, message.clone()) {
            Ok(()) => outcome.delivered += 1,
            Err(err) => {
                outcome.failed += 1;
                debug!(recipient = %recipient, error = %err, "fan-out delivery failed");
            }
        }
    }
    outcome
}

impl BrokerInstance {
    pub(crate) fn relay_signal(
        &self,
        sender: ConnectionId,
        kind: SignalKind,
        request: SignalRequest,
    ) -> Result<(), BrokerError> {
        let SignalRequest {
            target,
            stream_id,
            payload,
            ..
        } = request;

        match (target, stream_id) {
            (Some(target), stream_id) => {
                self.relay_to_target(sender, kind, &target, stream_id, payload);
                Ok(())
            }
            (None, Some(stream_id)) => {
                self.relay_to_producer(sender, kind, stream_id, payload);
                Ok(())
            }
            (None, None) => Err(BrokerError::malformed(format!(
                "{} requires a target or a streamId",
                kind.as_str()
            ))),
        }
    }

    fn relay_to_target(
        &self,
        sender: ConnectionId,
        kind: SignalKind,
        target: &str,
        stream_id: Option<String>,
        payload: serde_json::Value,
    ) {
        let Ok(target_id) = target.parse::<ConnectionId>() else {
            self.drop_signal(sender, kind, target, "invalid_target");
            return;
        };

        let notice = SignalNotice {
            sender,
            stream_id,
            payload,
        };

        if self.connections.is_live(target_id) {
            match deliver(
                &self.connections,
                target_id,
                ServerMessage::signal(kind, notice),
            ) {
                Ok(()) => self.stats.record_relayed(self.name(), kind.as_str()),
                Err(_) => self.drop_signal(sender, kind, target, "target_unreachable"),
            }
            return;
        }

        let delivered = self
            .with_bridge("signal_consumer", |link| {
                link.signal_consumer(sender, target_id, kind, notice)
            })
            .unwrap_or(false);
        if delivered {
            self.stats.record_relayed(self.name(), kind.as_str());
        } else {
            self.drop_signal(sender, kind, target, "target_unreachable");
        }
    }

    fn relay_to_producer(
        &self,
        sender: ConnectionId,
        kind: SignalKind,
        stream_id: String,
        payload: serde_json::Value,
    ) {
        let local_producer = self.sessions.lock().producer_of(&stream_id);
        if let Some(producer) = local_producer {
            let notice = SignalNotice {
                sender,
                stream_id: Some(stream_id.clone()),
                payload,
            };
            match deliver(
                &self.connections,
                producer,
                ServerMessage::signal(kind, notice),
            ) {
                Ok(()) => self.stats.record_relayed(self.name(), kind.as_str()),
                Err(_) => self.drop_signal(sender, kind, &stream_id, "target_unreachable"),
            }
            return;
        }

        if !self.mirror.lock().contains(&stream_id) {
            self.drop_signal(sender, kind, &stream_id, "unknown_stream");
            return;
        }

        let delivered = self
            .with_bridge("signal_producer", |link| {
                link.signal_producer(&stream_id, kind, sender, payload)
            })
            .unwrap_or(false);
        if delivered {
            self.stats.record_relayed(self.name(), kind.as_str());
        } else {
            self.drop_signal(sender, kind, &stream_id, "target_unreachable");
        }
    }

    pub(crate) fn relay_data(
        &self,
        sender: ConnectionId,
        stream_id: String,
        payload: serde_json::Value,
    ) -> Result<(), BrokerError> {
        let recipients: Vec<ConnectionId> = {
            let sessions = self.sessions.lock();
            match sessions.get_session(&stream_id) {
                Ok(session) if session.producer == sender => {
                    session.consumers.iter().copied().collect()
                }
                Ok(_) => {
                    return Err(BrokerError::malformed(
                        "only the producer of a stream may send data to it",
                    ));
                }
                Err(_) => {
                    self.stats
                        .record_dropped(self.name(), "data", "unknown_stream");
                    debug!(
                        instance = %self.name(),
                        sender = %sender,
                        stream_id = %stream_id,
                        "data for unknown stream ignored"
                    );
                    return Ok(());
                }
            }
        };

        let local = fan_out(
            &self.connections,
            recipients,
            &ServerMessage::Data {
                stream_id: stream_id.clone(),
                payload: payload.clone(),
            },
        );
        let remote = self
            .with_bridge("relay_data", |link| link.relay_data(&stream_id, &payload))
            .unwrap_or(0);

        self.stats
            .record_data_deliveries(self.name(), local.delivered + remote);
        Ok(())
    }

    fn drop_signal(
        &self,
        sender: ConnectionId,
        kind: SignalKind,
        address: &str,
        reason: &'static str,
    ) {
        self.stats.record_dropped(self.name(), kind.as_str(), reason);
        warn!(
            instance = %self.name(),
            sender = %sender,
            kind = kind.as_str(),
            address,
            reason,
            "signal dropped"
        );
    }
}
