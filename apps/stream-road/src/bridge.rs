//! Cross-instance bridge.
//!
//! Each [`BrokerInstance`] holds a [`BridgeLink`] pointing at its peer. The
//! authoritative instance announces and retires sessions through it, the
//! mirroring instance forwards consumer handshakes to the remote producer, and
//! replies and data travel back the same way.
//!
//! ```text
//!   producer-edge (A)                          consumer-edge (B)
//!   sessions ── announce/retire ─────────────▶ mirror
//!   producer ◀──────────── signal_producer ─── consumer (by streamId)
//!   producer ── signal_consumer ─────────────▶ consumer (by id, membership checked)
//!   producer ── relay_data ──────────────────▶ mirror consumers
//! ```
//!
//! [`LocalBridge`] links two instances living in the same process with plain
//! synchronous calls. Announce and retire are issued while the announcing
//! instance holds its session lock, so the mirror sees them in the same order
//! as the registry did.

use std::sync::{Arc, Weak};

use thiserror::Error;
use tracing::{debug, info};

use crate::broker::BrokerInstance;
use crate::connection::ConnectionId;
use crate::mirror::SessionAnnouncement;
use crate::protocol::{ServerMessage, SignalKind, SignalNotice};
use crate::relay;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("bridge peer is unavailable")]
    Unavailable,
    #[error("bridge transport error: {0}")]
    Transport(String),
}

pub type BridgeResult<T> = Result<T, BridgeError>;

/// Outbound half of the bridge as seen by one instance.
pub trait BridgeLink: Send + Sync {
    /// Mirror a session that was just created (or replaced) locally.
    fn announce_session(&self, announcement: SessionAnnouncement) -> BridgeResult<()>;

    /// Drop the peer's mirror of a session that ended locally.
    fn retire_session(&self, stream_id: &str) -> BridgeResult<()>;

    /// Deliver a handshake from a local consumer to the producer of a
    /// mirrored stream. Returns whether the peer delivered it.
    fn signal_producer(
        &self,
        stream_id: &str,
        kind: SignalKind,
        sender: ConnectionId,
        payload: serde_json::Value,
    ) -> BridgeResult<bool>;

    /// Deliver a local producer's reply to a consumer connected to the peer.
    fn signal_consumer(
        &self,
        producer: ConnectionId,
        target: ConnectionId,
        kind: SignalKind,
        notice: SignalNotice,
    ) -> BridgeResult<bool>;

    /// Fan stream data out to the peer's mirror consumers. Returns the number
    /// of deliveries made there.
    fn relay_data(&self, stream_id: &str, payload: &serde_json::Value) -> BridgeResult<usize>;
}

/// In-process bridge to a peer instance.
pub struct LocalBridge {
    peer: Weak<BrokerInstance>,
}

impl LocalBridge {
    pub fn new(peer: &Arc<BrokerInstance>) -> Self {
        Self {
            peer: Arc::downgrade(peer),
        }
    }

    /// Link two instances in both directions.
    pub fn link(a: &Arc<BrokerInstance>, b: &Arc<BrokerInstance>) {
        a.attach_bridge(Arc::new(LocalBridge::new(b)));
        b.attach_bridge(Arc::new(LocalBridge::new(a)));
        info!(a = a.name(), b = b.name(), "bridge linked");
    }

    fn peer(&self) -> BridgeResult<Arc<BrokerInstance>> {
        self.peer.upgrade().ok_or(BridgeError::Unavailable)
    }
}

impl BridgeLink for LocalBridge {
    fn announce_session(&self, announcement: SessionAnnouncement) -> BridgeResult<()> {
        self.peer()?.accept_announcement(announcement);
        Ok(())
    }

    fn retire_session(&self, stream_id: &str) -> BridgeResult<()> {
        self.peer()?.accept_retirement(stream_id);
        Ok(())
    }

    fn signal_producer(
        &self,
        stream_id: &str,
        kind: SignalKind,
        sender: ConnectionId,
        payload: serde_json::Value,
    ) -> BridgeResult<bool> {
        Ok(self
            .peer()?
            .accept_producer_signal(stream_id, kind, sender, payload))
    }

    fn signal_consumer(
        &self,
        producer: ConnectionId,
        target: ConnectionId,
        kind: SignalKind,
        notice: SignalNotice,
    ) -> BridgeResult<bool> {
        Ok(self
            .peer()?
            .accept_consumer_signal(producer, target, kind, notice))
    }

    fn relay_data(&self, stream_id: &str, payload: &serde_json::Value) -> BridgeResult<usize> {
        Ok(self.peer()?.accept_data(stream_id, payload))
    }
}

/// Inbound side: what an instance does when its peer calls across the bridge.
impl BrokerInstance {
    pub(crate) fn accept_announcement(&self, announcement: SessionAnnouncement) {
        let stream_id = announcement.stream_id.clone();
        let replaced = self.mirror.lock().upsert(announcement);
        if let Some(replaced) = replaced {
            relay::fan_out(
                &self.connections,
                replaced.consumers.iter().copied(),
                &ServerMessage::SessionEnded {
                    stream_id: stream_id.clone(),
                },
            );
        }
        debug!(instance = %self.name(), stream_id = %stream_id, "mirrored remote stream");
    }

    pub(crate) fn accept_retirement(&self, stream_id: &str) -> bool {
        let Some(entry) = self.mirror.lock().remove(stream_id) else {
            return false;
        };
        let outcome = relay::fan_out(
            &self.connections,
            entry.consumers.iter().copied(),
            &ServerMessage::SessionEnded {
                stream_id: stream_id.to_string(),
            },
        );
        info!(
            instance = %self.name(),
            stream_id = %stream_id,
            consumers = outcome.delivered,
            "remote stream ended; mirror removed"
        );
        true
    }

    pub(crate) fn accept_producer_signal(
        &self,
        stream_id: &str,
        kind: SignalKind,
        sender: ConnectionId,
        payload: serde_json::Value,
    ) -> bool {
        let Some(producer) = self.sessions.lock().producer_of(stream_id) else {
            return false;
        };
        let notice = SignalNotice {
            sender,
            stream_id: Some(stream_id.to_string()),
            payload,
        };
        relay::deliver(&self.connections, producer, ServerMessage::signal(kind, notice)).is_ok()
    }

    pub(crate) fn accept_consumer_signal(
        &self,
        producer: ConnectionId,
        target: ConnectionId,
        kind: SignalKind,
        mut notice: SignalNotice,
    ) -> bool {
        let stream_id = match self.mirror.lock().stream_joined_from(target, producer) {
            Some(stream_id) => stream_id.to_string(),
            None => return false,
        };
        notice.stream_id.get_or_insert(stream_id);
        relay::deliver(&self.connections, target, ServerMessage::signal(kind, notice)).is_ok()
    }

    pub(crate) fn accept_data(&self, stream_id: &str, payload: &serde_json::Value) -> usize {
        let recipients = {
            let mirror = self.mirror.lock();
            if !mirror.has_consumers(stream_id) {
                return 0;
            }
            mirror.consumers(stream_id)
        };
        // Counted by the sending instance.
        relay::fan_out(
            &self.connections,
            recipients,
            &ServerMessage::Data {
                stream_id: stream_id.to_string(),
                payload: payload.clone(),
            },
        )
        .delivered
    }
}
