//! One broker instance: its connections, its authoritative sessions, and its
//! mirror of the peer instance.
//!
//! Lock order is `sessions -> mirror` (own or peer); the mirror lock is never
//! held while calling out of the instance. Every registry operation runs to
//! completion under its lock and never awaits.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bridge::{BridgeLink, BridgeResult};
use crate::connection::{ConnectionId, ConnectionRegistry};
use crate::error::BrokerError;
use crate::metrics::{self, RelayStats, RelayStatsSnapshot};
use crate::mirror::{BridgeMirror, SessionAnnouncement};
use crate::protocol::{ClientMessage, Metadata, ServerMessage, SessionSummary, SignalKind};
use crate::relay;
use crate::session::{CollisionPolicy, SessionRegistry, StreamSession};

pub struct BrokerInstance {
    name: String,
    pub(crate) connections: ConnectionRegistry,
    pub(crate) sessions: Mutex<SessionRegistry>,
    pub(crate) mirror: Mutex<BridgeMirror>,
    bridge: RwLock<Option<Arc<dyn BridgeLink>>>,
    pub(crate) stats: RelayStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstanceStats {
    pub instance: String,
    pub active_connections: usize,
    pub sessions: usize,
    pub mirrored_sessions: usize,
    pub relay: RelayStatsSnapshot,
}

impl BrokerInstance {
    pub fn new(name: impl Into<String>, policy: CollisionPolicy) -> Self {
        Self {
            name: name.into(),
            connections: ConnectionRegistry::new(),
            sessions: Mutex::new(SessionRegistry::new(policy)),
            mirror: Mutex::new(BridgeMirror::new()),
            bridge: RwLock::new(None),
            stats: RelayStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attach_bridge(&self, link: Arc<dyn BridgeLink>) {
        *self.bridge.write() = Some(link);
    }

    pub fn detach_bridge(&self) {
        *self.bridge.write() = None;
    }

    /// Register a transport connection and greet it with its id.
    pub fn connect(&self) -> (ConnectionId, mpsc::UnboundedReceiver<ServerMessage>) {
        let (connection_id, rx) = self.connections.register();
        self.notify(connection_id, ServerMessage::Connected { connection_id });
        metrics::record_connection_opened(&self.name, self.connections.len());
        debug!(instance = %self.name, connection_id = %connection_id, "connection registered");
        (connection_id, rx)
    }

    /// Tear down everything tied to a connection. Returns `false` if it was
    /// already gone, in which case nothing else happens.
    pub fn disconnect(&self, connection_id: ConnectionId) -> bool {
        if !self.connections.unregister(connection_id) {
            return false;
        }
        metrics::record_connection_closed(&self.name, self.connections.len());

        self.end_produced_sessions(connection_id);
        self.leave_stream(connection_id);

        debug!(instance = %self.name, connection_id = %connection_id, "connection unregistered");
        true
    }

    /// Parse and handle one inbound text frame, reporting failures on the
    /// same connection.
    pub fn handle_frame(&self, sender: ConnectionId, text: &str) {
        let result = match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => catch_unwind(AssertUnwindSafe(|| self.handle_message(sender, message)))
                .unwrap_or_else(|_| {
                    Err(BrokerError::InternalFailure(
                        "panic while handling message".to_string(),
                    ))
                }),
            Err(err) => Err(BrokerError::malformed(format!(
                "invalid message format: {err}"
            ))),
        };

        if let Err(err) = result {
            self.report_error(sender, err);
        }
    }

    pub fn handle_message(
        &self,
        sender: ConnectionId,
        message: ClientMessage,
    ) -> Result<(), BrokerError> {
        match message {
            ClientMessage::ProducerRegister {
                stream_id,
                metadata,
            } => self
                .register_producer(sender, stream_id, metadata)
                .map(|_| ()),
            ClientMessage::ConsumerJoin { stream_id } => self.join_stream(sender, &stream_id),
            ClientMessage::ConsumerLeave => {
                self.leave_stream(sender);
                Ok(())
            }
            ClientMessage::Offer(request) => self.relay_signal(sender, SignalKind::Offer, request),
            ClientMessage::Answer(request) => {
                self.relay_signal(sender, SignalKind::Answer, request)
            }
            ClientMessage::Candidate(request) => {
                self.relay_signal(sender, SignalKind::Candidate, request)
            }
            ClientMessage::Data { stream_id, payload } => {
                self.relay_data(sender, stream_id, payload)
            }
            ClientMessage::Ping => {
                self.notify(sender, ServerMessage::Pong);
                Ok(())
            }
        }
    }

    pub fn register_producer(
        &self,
        producer: ConnectionId,
        stream_id: Option<String>,
        metadata: Metadata,
    ) -> Result<String, BrokerError> {
        if self.mirror.lock().is_member(producer) {
            return Err(BrokerError::malformed(
                "connection is already consuming a stream and cannot produce one",
            ));
        }

        let mut sessions = self.sessions.lock();
        let registration = sessions.create_session(stream_id, producer, metadata)?;

        if let Some(replaced) = &registration.replaced {
            self.with_bridge("retire_session", |link| {
                link.retire_session(&replaced.stream_id)
            });
        }
        let announcement = sessions
            .get_session(&registration.stream_id)
            .map(announcement_for)?;
        self.with_bridge("announce_session", |link| link.announce_session(announcement));
        let active = sessions.len();
        drop(sessions);

        if let Some(replaced) = registration.replaced {
            info!(
                instance = %self.name,
                stream_id = %replaced.stream_id,
                previous_producer = %replaced.producer,
                producer = %producer,
                "stream id reused; replacing active session"
            );
            if replaced.producer != producer {
                self.notify(
                    replaced.producer,
                    ServerMessage::SessionEnded {
                        stream_id: replaced.stream_id.clone(),
                    },
                );
            }
            self.announce_end(&replaced);
        }

        metrics::record_sessions_active(&self.name, active);
        self.notify(
            producer,
            ServerMessage::ProducerReady {
                stream_id: registration.stream_id.clone(),
            },
        );
        info!(
            instance = %self.name,
            stream_id = %registration.stream_id,
            producer = %producer,
            "producer registered stream"
        );
        Ok(registration.stream_id)
    }

    pub fn join_stream(&self, consumer: ConnectionId, stream_id: &str) -> Result<(), BrokerError> {
        let mut sessions = self.sessions.lock();

        if sessions.contains(stream_id) {
            let joined = sessions.join_session(stream_id, consumer)?;
            self.mirror.lock().leave(consumer);
            drop(sessions);

            if let Some(previous) = joined.previous {
                self.notify(previous.producer, ServerMessage::PeerLeft { id: consumer });
            }
            if joined.newly_joined {
                self.notify(joined.producer, ServerMessage::PeerJoined { id: consumer });
            }
        } else {
            if sessions.is_producer(consumer) {
                return Err(BrokerError::malformed(
                    "a producer connection cannot join a stream as a consumer",
                ));
            }
            self.mirror.lock().join(stream_id, consumer)?;
            let previous = sessions.leave_session(consumer);
            drop(sessions);

            if let Some(previous) = previous {
                self.notify(previous.producer, ServerMessage::PeerLeft { id: consumer });
            }
        }

        self.notify(
            consumer,
            ServerMessage::ConsumerReady {
                stream_id: stream_id.to_string(),
            },
        );
        info!(
            instance = %self.name,
            stream_id = %stream_id,
            consumer = %consumer,
            "consumer joined stream"
        );
        Ok(())
    }

    /// Remove a consumer from whatever it joined. No-op for non-members.
    pub fn leave_stream(&self, consumer: ConnectionId) {
        let departure = {
            let mut sessions = self.sessions.lock();
            let departure = sessions.leave_session(consumer);
            self.mirror.lock().leave(consumer);
            departure
        };

        if let Some(departure) = departure {
            self.notify(departure.producer, ServerMessage::PeerLeft { id: consumer });
            info!(
                instance = %self.name,
                stream_id = %departure.stream_id,
                consumer = %consumer,
                "consumer left stream"
            );
        }
    }

    /// End every session the connection produces; each consumer hears about
    /// it once, and the peer drops its mirror.
    pub fn end_produced_sessions(&self, producer: ConnectionId) -> Vec<String> {
        let (ended, active) = {
            let mut sessions = self.sessions.lock();
            let ended = sessions.end_sessions(producer);
            for session in &ended {
                self.with_bridge("retire_session", |link| {
                    link.retire_session(&session.stream_id)
                });
            }
            (ended, sessions.len())
        };

        if ended.is_empty() {
            return Vec::new();
        }
        metrics::record_sessions_active(&self.name, active);

        ended
            .into_iter()
            .map(|session| {
                self.announce_end(&session);
                info!(
                    instance = %self.name,
                    stream_id = %session.stream_id,
                    producer = %producer,
                    consumers = session.consumers.len(),
                    "stream ended; bridge mirror retired"
                );
                session.stream_id
            })
            .collect()
    }

    /// Local sessions first, then mirrored ones not shadowed by a local id.
    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        let sessions = self.sessions.lock();
        let mut listed = sessions.list_sessions();
        let mirror = self.mirror.lock();
        listed.extend(
            mirror
                .list()
                .into_iter()
                .filter(|summary| !sessions.contains(&summary.id)),
        );
        listed
    }

    pub fn get_session(&self, stream_id: &str) -> Result<SessionSummary, BrokerError> {
        let sessions = self.sessions.lock();
        if let Ok(session) = sessions.get_session(stream_id) {
            return Ok(session.summary());
        }
        self.mirror
            .lock()
            .get(stream_id)
            .ok_or_else(|| BrokerError::StreamNotFound(stream_id.to_string()))
    }

    pub fn stats(&self) -> InstanceStats {
        let sessions = self.sessions.lock().len();
        let mirrored_sessions = self.mirror.lock().len();
        InstanceStats {
            instance: self.name.clone(),
            active_connections: self.connections.len(),
            sessions,
            mirrored_sessions,
            relay: self.stats.snapshot(),
        }
    }

    pub fn relay_stats(&self) -> RelayStatsSnapshot {
        self.stats.snapshot()
    }

    pub(crate) fn notify(&self, connection_id: ConnectionId, message: ServerMessage) -> bool {
        relay::deliver(&self.connections, connection_id, message).is_ok()
    }

    /// Run a bridge operation if a peer is attached. Failures are logged and
    /// counted, never propagated into session state.
    pub(crate) fn with_bridge<T>(
        &self,
        operation: &'static str,
        call: impl FnOnce(&dyn BridgeLink) -> BridgeResult<T>,
    ) -> Option<T> {
        let link = self.bridge.read().clone()?;
        match call(link.as_ref()) {
            Ok(value) => Some(value),
            Err(err) => {
                self.stats.record_bridge_failure(&self.name, operation);
                warn!(
                    instance = %self.name,
                    operation,
                    error = %err,
                    "bridge operation failed"
                );
                None
            }
        }
    }

    fn announce_end(&self, session: &StreamSession) {
        let message = ServerMessage::SessionEnded {
            stream_id: session.stream_id.clone(),
        };
        relay::fan_out(&self.connections, session.consumers.iter().copied(), &message);
    }

    fn report_error(&self, connection_id: ConnectionId, err: BrokerError) {
        match &err {
            BrokerError::StreamNotFound(_) => {
                debug!(instance = %self.name, connection_id = %connection_id, error = %err, "request rejected");
            }
            BrokerError::InternalFailure(_) => {
                warn!(instance = %self.name, connection_id = %connection_id, error = %err, "failed to process message");
            }
            _ => {
                warn!(instance = %self.name, connection_id = %connection_id, error = %err, "request rejected");
            }
        }
        if let Some(notification) = err.notification() {
            self.notify(connection_id, notification);
        }
    }
}

fn announcement_for(session: &StreamSession) -> SessionAnnouncement {
    SessionAnnouncement {
        stream_id: session.stream_id.clone(),
        producer: session.producer,
        metadata: session.metadata.clone(),
        created_at: session.created_at,
    }
}
