//! Shadow of the peer instance's sessions.
//!
//! Entries are created and removed by the bridge in lockstep with the
//! authoritative session on the other instance. The consumer sets hold
//! connections of *this* instance that joined the mirrored stream; the peer
//! asks for them lazily when it relays data.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::connection::ConnectionId;
use crate::error::BrokerError;
use crate::protocol::{Metadata, SessionSummary};

/// Session existence as announced by the authoritative instance.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionAnnouncement {
    pub stream_id: String,
    /// Producer connection id on the announcing instance.
    pub producer: ConnectionId,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MirrorEntry {
    pub announcement: SessionAnnouncement,
    pub consumers: HashSet<ConnectionId>,
}

impl MirrorEntry {
    fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.announcement.stream_id.clone(),
            producer_id: self.announcement.producer,
            consumer_count: self.consumers.len(),
            metadata: self.announcement.metadata.clone(),
            created_at: self.announcement.created_at,
            bridged: true,
        }
    }
}

#[derive(Debug, Default)]
pub struct BridgeMirror {
    entries: HashMap<String, MirrorEntry>,
    memberships: HashMap<ConnectionId, String>,
}

impl BridgeMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or reset an entry. A reset entry starts with no consumers; the
    /// displaced one is returned so its consumers can be told.
    pub fn upsert(&mut self, announcement: SessionAnnouncement) -> Option<MirrorEntry> {
        let replaced = self.remove(&announcement.stream_id);
        self.entries.insert(
            announcement.stream_id.clone(),
            MirrorEntry {
                announcement,
                consumers: HashSet::new(),
            },
        );
        replaced
    }

    pub fn remove(&mut self, stream_id: &str) -> Option<MirrorEntry> {
        let entry = self.entries.remove(stream_id)?;
        for consumer in &entry.consumers {
            self.memberships.remove(consumer);
        }
        Some(entry)
    }

    /// Add a consumer, moving it out of any other mirrored stream.
    pub fn join(&mut self, stream_id: &str, consumer: ConnectionId) -> Result<(), BrokerError> {
        if !self.entries.contains_key(stream_id) {
            return Err(BrokerError::StreamNotFound(stream_id.to_string()));
        }
        self.leave(consumer);
        if let Some(entry) = self.entries.get_mut(stream_id) {
            entry.consumers.insert(consumer);
        }
        self.memberships.insert(consumer, stream_id.to_string());
        Ok(())
    }

    pub fn leave(&mut self, consumer: ConnectionId) -> Option<String> {
        let stream_id = self.memberships.remove(&consumer)?;
        if let Some(entry) = self.entries.get_mut(&stream_id) {
            entry.consumers.remove(&consumer);
        }
        Some(stream_id)
    }

    pub fn contains(&self, stream_id: &str) -> bool {
        self.entries.contains_key(stream_id)
    }

    pub fn is_member(&self, connection: ConnectionId) -> bool {
        self.memberships.contains_key(&connection)
    }

    pub fn producer_of(&self, stream_id: &str) -> Option<ConnectionId> {
        self.entries
            .get(stream_id)
            .map(|entry| entry.announcement.producer)
    }

    pub fn consumers(&self, stream_id: &str) -> Vec<ConnectionId> {
        self.entries
            .get(stream_id)
            .map(|entry| entry.consumers.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn has_consumers(&self, stream_id: &str) -> bool {
        self.entries
            .get(stream_id)
            .is_some_and(|entry| !entry.consumers.is_empty())
    }

    /// The stream `consumer` joined, provided `producer` is its remote producer.
    pub fn stream_joined_from(
        &self,
        consumer: ConnectionId,
        producer: ConnectionId,
    ) -> Option<&str> {
        let stream_id = self.memberships.get(&consumer)?;
        let entry = self.entries.get(stream_id)?;
        (entry.announcement.producer == producer).then_some(stream_id.as_str())
    }

    pub fn get(&self, stream_id: &str) -> Option<SessionSummary> {
        self.entries.get(stream_id).map(MirrorEntry::summary)
    }

    pub fn list(&self) -> Vec<SessionSummary> {
        self.entries.values().map(MirrorEntry::summary).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
