//! # Session Scenarios
//!
//! Message ordering within a session, and crash/restart equivalence: a
//! conversation interrupted by a restart of either side ends exactly as an
//! uninterrupted one would, with no duplicate and no lost message.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use lf_01_flow_engine::{
    ExternalService, FlowContext, FlowEngineConfig, FlowEngineDependencies, FlowError,
    FlowLogic, FlowRegistry, FlowStatus, FlowType, KvCheckpointStore, Resume,
    StateMachineManager, Suspend,
};
use serde::{Deserialize, Serialize};
use shared_bus::InMemoryNetwork;
use shared_types::{InMemoryKVStore, Party, SessionId, SystemTimeSource};

use super::support::{identity, wait_until};

#[derive(Debug, Serialize, Deserialize)]
enum Chunk {
    Item(u32),
    Done,
}

/// Sends `count` items one step at a time, then waits for what arrived.
#[derive(Serialize, Deserialize)]
struct Streamer {
    target: Party,
    count: u32,
    sent: u32,
    session: Option<SessionId>,
}

impl Streamer {
    fn new(target: Party, count: u32) -> Self {
        Self {
            target,
            count,
            sent: 0,
            session: None,
        }
    }

    fn next(&mut self, ctx: &mut FlowContext<'_>, session: SessionId) -> Result<Suspend, FlowError> {
        if self.sent == self.count {
            return ctx.send_and_receive(session, &Chunk::Done);
        }
        ctx.send(session, &Chunk::Item(self.sent))?;
        self.sent += 1;
        Ok(Suspend::Continue)
    }
}

impl FlowLogic for Streamer {
    fn protocol(&self) -> &'static str {
        Self::PROTOCOL
    }

    fn resume(&mut self, ctx: &mut FlowContext<'_>, input: Resume) -> Result<Suspend, FlowError> {
        match (input, self.session) {
            (Resume::Start, None) => {
                let session = ctx.initiate_flow(&self.target);
                self.session = Some(session);
                self.next(ctx, session)
            }
            (Resume::Continue, Some(session)) => self.next(ctx, session),
            (Resume::Received(message), Some(_)) => {
                let seen = message.decode::<Vec<u32>>()?.unwrap_with(Ok)?;
                Suspend::complete(&seen)
            }
            (other, _) => Err(FlowError::Defect(format!("streamer resumed with {other:?}"))),
        }
    }
}

impl FlowType for Streamer {
    const PROTOCOL: &'static str = "it.stream";
    type Output = Vec<u32>;
}

/// Records every item in arrival order and echoes the record on `Done`.
#[derive(Serialize, Deserialize)]
struct Collector {
    session: SessionId,
    seen: Vec<u32>,
}

impl FlowLogic for Collector {
    fn protocol(&self) -> &'static str {
        Self::PROTOCOL
    }

    fn resume(&mut self, ctx: &mut FlowContext<'_>, input: Resume) -> Result<Suspend, FlowError> {
        match input {
            Resume::Start => Ok(ctx.receive(self.session)),
            Resume::Received(message) => match message.decode::<Chunk>()?.unwrap_with(Ok)? {
                Chunk::Item(value) => {
                    self.seen.push(value);
                    Ok(ctx.receive(self.session))
                }
                Chunk::Done => {
                    ctx.send(self.session, &self.seen)?;
                    Suspend::complete(&self.seen.len())
                }
            },
            other => Err(FlowError::Defect(format!("collector resumed with {other:?}"))),
        }
    }
}

impl FlowType for Collector {
    const PROTOCOL: &'static str = "it.collect";
    type Output = usize;
}

fn registry() -> FlowRegistry {
    let mut registry = FlowRegistry::new();
    registry
        .register::<Streamer>()
        .register_responder::<Streamer, Collector>(|session, _| Collector {
            session,
            seen: Vec::new(),
        });
    registry
}

fn node(network: &InMemoryNetwork, name: &str, kv: &InMemoryKVStore) -> StateMachineManager {
    let (endpoint, inbox) = network.connect(identity(name).0);
    StateMachineManager::new(FlowEngineDependencies {
        config: FlowEngineConfig::default(),
        registry: registry(),
        store: Arc::new(KvCheckpointStore::new(kv.clone())),
        messaging: Arc::new(endpoint),
        inbox,
        services: HashMap::<String, Arc<dyn ExternalService>>::new(),
        time_source: Arc::new(SystemTimeSource),
    })
}

fn expected(count: u32) -> Vec<u32> {
    (0..count).collect()
}

#[tokio::test]
async fn test_session_preserves_send_order() {
    let network = InMemoryNetwork::new();
    let alice = node(&network, "Alice", &InMemoryKVStore::new());
    let bob = node(&network, "Bob", &InMemoryKVStore::new());
    alice.start().await.unwrap();
    bob.start().await.unwrap();

    // Several conversations at once; no ordering is promised across them.
    let mut handles = Vec::new();
    for _ in 0..4 {
        handles.push(
            alice
                .start_flow(Streamer::new(identity("Bob").0, 25))
                .await
                .unwrap(),
        );
    }
    for handle in handles {
        assert_eq!(handle.result().await.unwrap(), expected(25));
    }
}

#[tokio::test]
async fn test_responder_restart_mid_conversation_is_invisible() {
    let network = InMemoryNetwork::new();
    let alice = node(&network, "Alice", &InMemoryKVStore::new());
    let bob_kv = InMemoryKVStore::new();
    let bob = node(&network, "Bob", &bob_kv);
    alice.start().await.unwrap();
    bob.start().await.unwrap();

    let handle = alice
        .start_flow(Streamer::new(identity("Bob").0, 40))
        .await
        .unwrap();
    wait_until("the responder to start", || bob.live_flows().len() == 1).await;
    bob.shutdown();

    let restarted = node(&network, "Bob", &bob_kv);
    let report = restarted.start().await.unwrap();
    assert!(report.recovered <= 1);

    assert_eq!(handle.result().await.unwrap(), expected(40));
}

#[tokio::test]
async fn test_initiator_restart_mid_conversation_is_invisible() {
    let network = InMemoryNetwork::new();
    let alice_kv = InMemoryKVStore::new();
    let alice = node(&network, "Alice", &alice_kv);
    let bob = node(&network, "Bob", &InMemoryKVStore::new());
    alice.start().await.unwrap();
    bob.start().await.unwrap();

    let handle = alice
        .start_flow(Streamer::new(identity("Bob").0, 40))
        .await
        .unwrap();
    let flow_id = handle.id();
    wait_until("the responder to start", || bob.live_flows().len() == 1).await;
    alice.shutdown();
    // The old handle resolves with `EngineStopped` or the result; either way
    // the restarted node owns the flow from here.
    let _ = tokio::time::timeout(Duration::from_secs(1), handle.result()).await;

    let restarted = node(&network, "Alice", &alice_kv);
    restarted.start().await.unwrap();
    let handle = restarted.handle_for::<Vec<u32>>(flow_id).unwrap();
    assert_eq!(handle.result().await.unwrap(), expected(40));
    wait_until("the flow to be recorded as completed", || {
        restarted.flow_status(flow_id) == Some(FlowStatus::Completed)
    })
    .await;

    // The echoed record is Bob's own; no item reached him twice.
    wait_until("the responder to finish", || bob.live_flows().is_empty()).await;
}
