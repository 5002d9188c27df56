//! # Inbox
//!
//! Receiving side of a network endpoint.

use crate::messages::Envelope;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::Stream;

/// Inbound envelopes for one endpoint, in arrival order.
///
/// Ends (yields `None`) when the endpoint is replaced or the network is
/// dropped.
pub struct Inbox {
    receiver: mpsc::UnboundedReceiver<Envelope>,
}

impl Inbox {
    pub(crate) fn new(receiver: mpsc::UnboundedReceiver<Envelope>) -> Self {
        Self { receiver }
    }

    /// Wait for the next envelope.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.receiver.recv().await
    }

    /// Take the next envelope if one is already queued.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.receiver.try_recv().ok()
    }
}

impl Stream for Inbox {
    type Item = Envelope;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{InMemoryNetwork, MessagingService};
    use crate::messages::SessionMessage;
    use shared_types::{Party, SessionId};
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn test_inbox_is_a_stream() {
        let network = InMemoryNetwork::new();
        let alice = Party::new("Alice", [1u8; 32]);
        let bob = Party::new("Bob", [2u8; 32]);
        let (alice_endpoint, _alice_inbox) = network.connect(alice);
        let (_bob_endpoint, bob_inbox) = network.connect(bob.clone());

        let session = SessionId::new();
        alice_endpoint
            .send(&bob, "t", SessionMessage::Confirm { session })
            .await
            .unwrap();

        let mut stream = bob_inbox;
        let envelope = stream.next().await.unwrap();
        assert_eq!(envelope.topic, "t");
        assert_eq!(envelope.message.session(), session);
    }
}
