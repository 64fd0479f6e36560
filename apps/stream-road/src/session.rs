use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::connection::ConnectionId;
use crate::error::BrokerError;
use crate::protocol::{Metadata, SessionSummary};

/// Generate a new stream ID
pub fn generate_stream_id() -> String {
    Uuid::new_v4().to_string()
}

/// What happens when a producer registers a stream id that is already active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum CollisionPolicy {
    /// Replace the active session; its consumers are told it ended.
    #[default]
    Overwrite,
    /// Keep the active session and refuse the new registration.
    Reject,
}

/// One producer and the consumers attached to its stream.
#[derive(Debug, Clone)]
pub struct StreamSession {
    pub stream_id: String,
    pub producer: ConnectionId,
    pub metadata: Metadata,
    pub consumers: HashSet<ConnectionId>,
    pub created_at: DateTime<Utc>,
}

impl StreamSession {
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.stream_id.clone(),
            producer_id: self.producer,
            consumer_count: self.consumers.len(),
            metadata: self.metadata.clone(),
            created_at: self.created_at,
            bridged: false,
        }
    }
}

#[derive(Debug)]
pub struct Registration {
    pub stream_id: String,
    /// The session displaced under [`CollisionPolicy::Overwrite`].
    pub replaced: Option<StreamSession>,
}

/// A consumer removed from a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub stream_id: String,
    pub producer: ConnectionId,
}

#[derive(Debug)]
pub struct Joined {
    pub producer: ConnectionId,
    /// Set when the consumer was moved out of a different session.
    pub previous: Option<Departure>,
    /// False when the consumer was already a member.
    pub newly_joined: bool,
}

/// Authoritative sessions for producers connected to one broker instance.
///
/// Not synchronized; the owning instance wraps it in a single lock.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, StreamSession>,
    memberships: HashMap<ConnectionId, String>,
    policy: CollisionPolicy,
}

impl SessionRegistry {
    pub fn new(policy: CollisionPolicy) -> Self {
        Self {
            sessions: HashMap::new(),
            memberships: HashMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> CollisionPolicy {
        self.policy
    }

    pub fn create_session(
        &mut self,
        stream_id: Option<String>,
        producer: ConnectionId,
        metadata: Metadata,
    ) -> Result<Registration, BrokerError> {
        if self.memberships.contains_key(&producer) {
            return Err(BrokerError::malformed(
                "connection is already consuming a stream and cannot produce one",
            ));
        }

        let stream_id = stream_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(generate_stream_id);

        let replaced = if self.sessions.contains_key(&stream_id) {
            if self.policy == CollisionPolicy::Reject {
                return Err(BrokerError::StreamIdConflict(stream_id));
            }
            self.remove_session(&stream_id)
        } else {
            None
        };

        self.sessions.insert(
            stream_id.clone(),
            StreamSession {
                stream_id: stream_id.clone(),
                producer,
                metadata,
                consumers: HashSet::new(),
                created_at: Utc::now(),
            },
        );

        Ok(Registration {
            stream_id,
            replaced,
        })
    }

    pub fn join_session(
        &mut self,
        stream_id: &str,
        consumer: ConnectionId,
    ) -> Result<Joined, BrokerError> {
        let producer = self
            .sessions
            .get(stream_id)
            .map(|session| session.producer)
            .ok_or_else(|| BrokerError::StreamNotFound(stream_id.to_string()))?;

        if self.is_producer(consumer) {
            return Err(BrokerError::malformed(
                "a producer connection cannot join a stream as a consumer",
            ));
        }

        if self.memberships.get(&consumer).map(String::as_str) == Some(stream_id) {
            return Ok(Joined {
                producer,
                previous: None,
                newly_joined: false,
            });
        }

        let previous = self.leave_session(consumer);
        if let Some(session) = self.sessions.get_mut(stream_id) {
            session.consumers.insert(consumer);
        }
        self.memberships.insert(consumer, stream_id.to_string());

        Ok(Joined {
            producer,
            previous,
            newly_joined: true,
        })
    }

    pub fn leave_session(&mut self, consumer: ConnectionId) -> Option<Departure> {
        let stream_id = self.memberships.remove(&consumer)?;
        let session = self.sessions.get_mut(&stream_id)?;
        session.consumers.remove(&consumer);
        Some(Departure {
            stream_id,
            producer: session.producer,
        })
    }

    /// Remove every session produced by `producer`.
    pub fn end_sessions(&mut self, producer: ConnectionId) -> Vec<StreamSession> {
        let owned: Vec<String> = self
            .sessions
            .values()
            .filter(|session| session.producer == producer)
            .map(|session| session.stream_id.clone())
            .collect();

        owned
            .iter()
            .filter_map(|stream_id| self.remove_session(stream_id))
            .collect()
    }

    pub fn get_session(&self, stream_id: &str) -> Result<&StreamSession, BrokerError> {
        self.sessions
            .get(stream_id)
            .ok_or_else(|| BrokerError::StreamNotFound(stream_id.to_string()))
    }

    pub fn contains(&self, stream_id: &str) -> bool {
        self.sessions.contains_key(stream_id)
    }

    pub fn producer_of(&self, stream_id: &str) -> Option<ConnectionId> {
        self.sessions.get(stream_id).map(|session| session.producer)
    }

    pub fn is_producer(&self, connection: ConnectionId) -> bool {
        self.sessions
            .values()
            .any(|session| session.producer == connection)
    }

    pub fn is_consumer(&self, connection: ConnectionId) -> bool {
        self.memberships.contains_key(&connection)
    }

    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        self.sessions.values().map(StreamSession::summary).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn remove_session(&mut self, stream_id: &str) -> Option<StreamSession> {
        let session = self.sessions.remove(stream_id)?;
        for consumer in &session.consumers {
            self.memberships.remove(consumer);
        }
        Some(session)
    }
}
