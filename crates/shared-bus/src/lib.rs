//! # Shared Bus - Message Session Layer
//!
//! Point-to-point transport between parties. Flow sessions are multiplexed
//! over it; the flow engine never talks to a peer any other way.
//!
//! ## Delivery Contract
//!
//! - **Ordered:** messages from one sender to one recipient arrive in send order
//! - **At-least-once:** a delivery stays pending until the recipient
//!   acknowledges it and is re-delivered, in order, when the recipient
//!   reconnects after a crash
//! - **No deduplication:** receivers must tolerate duplicates (sessions carry
//!   sequence numbers for this)
//!
//! ```text
//! ┌──────────────┐  send(to, topic, msg)  ┌────────────────┐  Envelope  ┌──────────────┐
//! │   Party A    │ ─────────────────────→ │ InMemoryNetwork │ ─────────→ │   Party B    │
//! │  (endpoint)  │                        │  (pending/ack)  │ ←───────── │   (inbox)    │
//! └──────────────┘                        └────────────────┘ acknowledge └──────────────┘
//! ```

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod inbox;
pub mod messages;
pub mod network;

// Re-export main types
pub use inbox::Inbox;
pub use messages::{DeliveryId, Envelope, SessionError, SessionMessage};
pub use network::{BusError, InMemoryNetwork, MessagingService, NetworkEndpoint};

/// Current protocol version for session messages.
pub const PROTOCOL_VERSION: u16 = 1;

/// Topic carrying flow session traffic.
pub const SESSION_TOPIC: &str = "platform.session";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_version() {
        assert_eq!(PROTOCOL_VERSION, 1);
    }
}
