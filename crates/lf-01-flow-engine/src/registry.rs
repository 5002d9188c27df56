//! # Flow Registry
//!
//! Lookup table from `(protocol, version)` to
//! - a decoder that rebuilds a flow from a checkpoint frame, and
//! - for initiating protocols, the factory of the responder a counterparty
//!   runs when our `Init` arrives.
//!
//! Every flow that can appear in a checkpoint must be registered, including
//! sub-flows and responders, or recovery will quarantine it.

use crate::domain::{FlowError, FlowLogic, FlowType};
use shared_types::{decode, CodecError, Party, SessionId};
use std::collections::HashMap;
use std::sync::Arc;

type Decoder = fn(&[u8]) -> Result<Box<dyn FlowLogic>, CodecError>;

/// Builds the responder flow for an accepted session.
pub type ResponderFactory = Arc<dyn Fn(SessionId, Party) -> Box<dyn FlowLogic> + Send + Sync>;

fn decode_flow<F: FlowType>(bytes: &[u8]) -> Result<Box<dyn FlowLogic>, CodecError> {
    Ok(Box::new(decode::<F>(bytes)?))
}

#[derive(Default, Clone)]
pub struct FlowRegistry {
    decoders: HashMap<(String, u32), Decoder>,
    responders: HashMap<(String, u32), ResponderFactory>,
}

impl FlowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `F` restorable from checkpoints.
    pub fn register<F: FlowType>(&mut self) -> &mut Self {
        self.decoders
            .insert((F::PROTOCOL.to_string(), F::VERSION), decode_flow::<F>);
        self
    }

    /// Run `R` whenever a counterparty initiates a session from flow `I`.
    pub fn register_responder<I, R>(
        &mut self,
        factory: impl Fn(SessionId, Party) -> R + Send + Sync + 'static,
    ) -> &mut Self
    where
        I: FlowType,
        R: FlowType,
    {
        self.register::<R>();
        let build: ResponderFactory =
            Arc::new(move |session, counterparty| -> Box<dyn FlowLogic> {
                Box::new(factory(session, counterparty))
            });
        self.responders
            .insert((I::PROTOCOL.to_string(), I::VERSION), build);
        self
    }

    /// Rebuild a flow from its checkpoint frame.
    pub fn restore(
        &self,
        protocol: &str,
        version: u32,
        state: &[u8],
    ) -> Result<Box<dyn FlowLogic>, FlowError> {
        let decoder = self
            .decoders
            .get(&(protocol.to_string(), version))
            .ok_or_else(|| FlowError::UnknownProtocol {
                name: protocol.to_string(),
                version,
            })?;
        Ok(decoder(state)?)
    }

    /// Responder for an inbound `Init`, or the reason for rejecting it.
    pub fn responder(&self, protocol: &str, version: u32) -> Result<ResponderFactory, String> {
        if let Some(factory) = self.responders.get(&(protocol.to_string(), version)) {
            return Ok(factory.clone());
        }
        if self.responders.keys().any(|(name, _)| name == protocol) {
            Err(format!("{protocol} v{version} is not supported"))
        } else {
            Err(format!("{protocol} is not registered"))
        }
    }

    pub fn is_registered(&self, protocol: &str, version: u32) -> bool {
        self.decoders
            .contains_key(&(protocol.to_string(), version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FlowContext, Resume, Suspend};
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Ping {
        count: u32,
    }

    impl FlowLogic for Ping {
        fn protocol(&self) -> &'static str {
            Self::PROTOCOL
        }

        fn resume(&mut self, _ctx: &mut FlowContext<'_>, _input: Resume) -> Result<Suspend, FlowError> {
            Suspend::complete(&self.count)
        }
    }

    impl FlowType for Ping {
        const PROTOCOL: &'static str = "test.ping";
        type Output = u32;
    }

    #[derive(Serialize, Deserialize)]
    struct Pong {
        session: SessionId,
    }

    impl FlowLogic for Pong {
        fn protocol(&self) -> &'static str {
            Self::PROTOCOL
        }

        fn resume(&mut self, _ctx: &mut FlowContext<'_>, _input: Resume) -> Result<Suspend, FlowError> {
            Suspend::complete(&())
        }
    }

    impl FlowType for Pong {
        const PROTOCOL: &'static str = "test.pong";
        type Output = ();
    }

    #[test]
    fn test_restore_registered_flow() {
        let mut registry = FlowRegistry::new();
        registry.register::<Ping>();

        let state = shared_types::encode(&Ping { count: 3 }).unwrap();
        let flow = registry.restore("test.ping", 1, &state).unwrap();
        assert_eq!(flow.protocol(), "test.ping");
    }

    #[test]
    fn test_restore_unknown_protocol() {
        let registry = FlowRegistry::new();
        let err = registry.restore("test.ping", 1, &[]).err().unwrap();
        assert_eq!(
            err,
            FlowError::UnknownProtocol {
                name: "test.ping".into(),
                version: 1
            }
        );
    }

    #[test]
    fn test_responder_lookup() {
        let mut registry = FlowRegistry::new();
        registry.register_responder::<Ping, Pong>(|session, _| Pong { session });

        assert!(registry.responder("test.ping", 1).is_ok());
        assert!(registry.is_registered("test.pong", 1));
        assert_eq!(
            registry.responder("test.ping", 2).err().unwrap(),
            "test.ping v2 is not supported"
        );
        assert_eq!(
            registry.responder("other", 1).err().unwrap(),
            "other is not registered"
        );
    }
}
