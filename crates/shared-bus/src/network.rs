//! # Messaging Service
//!
//! The sending port used by the flow engine and the in-memory network that
//! implements it for single-process deployments and tests.

use crate::inbox::Inbox;
use crate::messages::{DeliveryId, Envelope, SessionMessage};
use async_trait::async_trait;
use parking_lot::Mutex;
use shared_types::Party;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Errors from the messaging layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// No endpoint was ever registered under this name.
    #[error("Unknown party: {0}")]
    UnknownParty(String),

    /// The sending endpoint has been disconnected or replaced.
    #[error("Endpoint {0} is disconnected")]
    Disconnected(String),
}

/// Trait for sending session messages to other parties.
///
/// Inbound traffic arrives on the [`Inbox`] paired with the service; every
/// envelope taken from it must eventually be acknowledged, otherwise it is
/// delivered again after the next reconnect.
#[async_trait]
pub trait MessagingService: Send + Sync {
    /// The party this endpoint speaks for.
    fn me(&self) -> &Party;

    /// Queue `message` for `to`. Returns once the network has accepted it.
    async fn send(
        &self,
        to: &Party,
        topic: &str,
        message: SessionMessage,
    ) -> Result<DeliveryId, BusError>;

    /// Confirm that an inbound delivery has been durably processed.
    fn acknowledge(&self, delivery_id: DeliveryId);
}

struct Node {
    generation: u64,
    sender: Option<mpsc::UnboundedSender<Envelope>>,
    /// Deliveries not yet acknowledged, in arrival order.
    pending: VecDeque<Envelope>,
}

/// In-process network connecting any number of parties.
///
/// Cloning yields another handle to the same network.
#[derive(Clone, Default)]
pub struct InMemoryNetwork {
    nodes: Arc<Mutex<HashMap<String, Node>>>,
}

impl InMemoryNetwork {
    /// Create an empty network.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or re-register after a crash) `party`.
    ///
    /// Any previous endpoint for the same name stops working. Deliveries that
    /// were never acknowledged are replayed into the new inbox in order.
    pub fn connect(&self, party: Party) -> (NetworkEndpoint, Inbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut nodes = self.nodes.lock();
        let node = nodes.entry(party.name.clone()).or_insert_with(|| Node {
            generation: 0,
            sender: None,
            pending: VecDeque::new(),
        });
        node.generation += 1;
        for envelope in &node.pending {
            let _ = tx.send(envelope.clone());
        }
        debug!(
            party = %party,
            generation = node.generation,
            redelivered = node.pending.len(),
            "Endpoint connected"
        );
        node.sender = Some(tx);

        let endpoint = NetworkEndpoint {
            network: self.clone(),
            me: party,
            generation: node.generation,
        };
        (endpoint, Inbox::new(rx))
    }

    /// Take `name` off the network. Messages sent to it are kept for later.
    pub fn disconnect(&self, name: &str) {
        if let Some(node) = self.nodes.lock().get_mut(name) {
            node.sender = None;
            debug!(party = name, "Endpoint disconnected");
        }
    }

    /// True if `name` currently has a live endpoint.
    #[must_use]
    pub fn is_connected(&self, name: &str) -> bool {
        self.nodes
            .lock()
            .get(name)
            .map_or(false, |node| node.sender.is_some())
    }

    /// Number of deliveries to `name` still awaiting acknowledgement.
    #[must_use]
    pub fn pending_count(&self, name: &str) -> usize {
        self.nodes.lock().get(name).map_or(0, |node| node.pending.len())
    }

    fn deliver(
        &self,
        from: &Party,
        generation: u64,
        to: &Party,
        topic: &str,
        message: SessionMessage,
    ) -> Result<DeliveryId, BusError> {
        let mut nodes = self.nodes.lock();

        let sender_live = nodes
            .get(&from.name)
            .map_or(false, |n| n.generation == generation && n.sender.is_some());
        if !sender_live {
            return Err(BusError::Disconnected(from.name.clone()));
        }

        let node = nodes
            .get_mut(&to.name)
            .ok_or_else(|| BusError::UnknownParty(to.name.clone()))?;

        let envelope = Envelope {
            delivery_id: DeliveryId::new(),
            from: from.clone(),
            to: to.clone(),
            topic: topic.to_string(),
            message,
        };
        let delivery_id = envelope.delivery_id;

        trace!(
            from = %from,
            to = %to,
            kind = envelope.message.kind(),
            session = %envelope.message.session(),
            "Message queued"
        );

        node.pending.push_back(envelope.clone());
        if let Some(tx) = &node.sender {
            if tx.send(envelope).is_err() {
                warn!(party = %to, "Inbox dropped, holding message until reconnect");
                node.sender = None;
            }
        }
        Ok(delivery_id)
    }

    fn acknowledge(&self, name: &str, generation: u64, delivery_id: DeliveryId) {
        let mut nodes = self.nodes.lock();
        let Some(node) = nodes.get_mut(name) else {
            return;
        };
        // A replaced endpoint belongs to a crashed process.
        if node.generation != generation {
            return;
        }
        node.pending.retain(|e| e.delivery_id != delivery_id);
    }
}

/// One party's connection to an [`InMemoryNetwork`].
#[derive(Clone)]
pub struct NetworkEndpoint {
    network: InMemoryNetwork,
    me: Party,
    generation: u64,
}

#[async_trait]
impl MessagingService for NetworkEndpoint {
    fn me(&self) -> &Party {
        &self.me
    }

    async fn send(
        &self,
        to: &Party,
        topic: &str,
        message: SessionMessage,
    ) -> Result<DeliveryId, BusError> {
        self.network
            .deliver(&self.me, self.generation, to, topic, message)
    }

    fn acknowledge(&self, delivery_id: DeliveryId) {
        self.network
            .acknowledge(&self.me.name, self.generation, delivery_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SESSION_TOPIC;
    use shared_types::SessionId;

    fn party(name: &str) -> Party {
        Party::new(name, [0u8; 32])
    }

    fn data(session: SessionId, seq: u64) -> SessionMessage {
        SessionMessage::Data {
            session,
            seq,
            payload: vec![seq as u8],
        }
    }

    #[tokio::test]
    async fn test_messages_arrive_in_send_order() {
        let network = InMemoryNetwork::new();
        let (alice, _alice_inbox) = network.connect(party("Alice"));
        let (_bob, mut bob_inbox) = network.connect(party("Bob"));
        let session = SessionId::new();

        for seq in 0..5 {
            alice
                .send(&party("Bob"), SESSION_TOPIC, data(session, seq))
                .await
                .unwrap();
        }

        for expected in 0..5 {
            let envelope = bob_inbox.recv().await.unwrap();
            assert_eq!(envelope.message, data(session, expected));
            assert_eq!(envelope.from.name, "Alice");
        }
    }

    #[tokio::test]
    async fn test_unacknowledged_messages_are_redelivered_on_reconnect() {
        let network = InMemoryNetwork::new();
        let (alice, _alice_inbox) = network.connect(party("Alice"));
        let (bob, mut bob_inbox) = network.connect(party("Bob"));
        let session = SessionId::new();

        alice
            .send(&party("Bob"), SESSION_TOPIC, data(session, 0))
            .await
            .unwrap();
        alice
            .send(&party("Bob"), SESSION_TOPIC, data(session, 1))
            .await
            .unwrap();

        let first = bob_inbox.recv().await.unwrap();
        bob.acknowledge(first.delivery_id);
        let _second = bob_inbox.recv().await.unwrap();
        assert_eq!(network.pending_count("Bob"), 1);

        // Bob crashes before acknowledging the second message.
        network.disconnect("Bob");
        drop(bob_inbox);
        let (_bob, mut bob_inbox) = network.connect(party("Bob"));

        let replayed = bob_inbox.recv().await.unwrap();
        assert_eq!(replayed.message, data(session, 1));
        assert!(bob_inbox.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_messages_to_offline_party_wait_for_reconnect() {
        let network = InMemoryNetwork::new();
        let (alice, _alice_inbox) = network.connect(party("Alice"));
        let (_bob, bob_inbox) = network.connect(party("Bob"));
        network.disconnect("Bob");
        drop(bob_inbox);

        let session = SessionId::new();
        alice
            .send(&party("Bob"), SESSION_TOPIC, data(session, 0))
            .await
            .unwrap();
        assert!(!network.is_connected("Bob"));

        let (_bob, mut bob_inbox) = network.connect(party("Bob"));
        assert_eq!(bob_inbox.recv().await.unwrap().message, data(session, 0));
    }

    #[tokio::test]
    async fn test_stale_endpoint_cannot_send() {
        let network = InMemoryNetwork::new();
        let (old_alice, _inbox) = network.connect(party("Alice"));
        let (_bob, _bob_inbox) = network.connect(party("Bob"));
        let (_new_alice, _new_inbox) = network.connect(party("Alice"));

        let result = old_alice
            .send(&party("Bob"), SESSION_TOPIC, data(SessionId::new(), 0))
            .await;
        assert_eq!(result, Err(BusError::Disconnected("Alice".into())));
    }

    #[tokio::test]
    async fn test_unknown_recipient() {
        let network = InMemoryNetwork::new();
        let (alice, _inbox) = network.connect(party("Alice"));

        let result = alice
            .send(&party("Nobody"), SESSION_TOPIC, data(SessionId::new(), 0))
            .await;
        assert_eq!(result, Err(BusError::UnknownParty("Nobody".into())));
    }
}
