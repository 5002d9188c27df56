//! # LF-01 Flow Engine
//!
//! Durable, checkpointed state machines that run multi-party protocols to
//! completion across node restarts.
//!
//! ## Architecture
//!
//! This crate follows Hexagonal Architecture (Ports & Adapters):
//!
//! - **Domain Layer** (`domain/`): Flow contract and checkpoint model
//!   - `FlowLogic` / `FlowType`: a resumable protocol step function
//!   - `FlowContext`: sessions, ledger and progress during one step
//!   - `Checkpoint`, `SessionRecord`, `TerminalRecord`: persisted state
//!
//! - **Ports Layer** (`ports/`): Trait definitions
//!   - `CheckpointStore`: durable checkpoints, outboxes and ledger values
//!   - `MessagingService`: outbound session traffic (from `shared-bus`)
//!   - `ExternalService`: node services flows suspend on
//!
//! - **Service Layer** (`service/`): Orchestration
//!   - `StateMachineManager`: starts, routes, recovers and kills flows
//!
//! - **Adapters Layer** (`adapters/`)
//!   - `KvCheckpointStore`: checkpoint store over any `KeyValueStore`
//!
//! ## Invariants
//!
//! - A flow's messages and ledger writes leave the step only together with
//!   the checkpoint that produced them.
//! - Messages on a session are delivered to the flow exactly once, in send
//!   order, even across crashes on either side.
//! - A finished flow never runs again; its outcome stays queryable.
//!
//! ## Usage Example
//!
//! ```ignore
//! use lf_01_flow_engine::{FlowEngineDependencies, FlowRegistry, StateMachineManager};
//!
//! let mut registry = FlowRegistry::new();
//! registry
//!     .register::<PayFlow>()
//!     .register_responder::<PayFlow, PayResponder>(|session, _| PayResponder::new(session));
//!
//! let manager = StateMachineManager::new(FlowEngineDependencies { registry, .. });
//! manager.start().await?;
//! let paid = manager.start_flow(PayFlow::new(bob, 100)).await?.result().await?;
//! ```

pub mod adapters;
pub mod domain;
pub mod handle;
pub mod metrics;
pub mod ports;
pub mod registry;
pub mod service;

// Re-exports for convenience
pub use adapters::KvCheckpointStore;
pub use domain::{
    Checkpoint, CheckpointError, ExternalRequest, FlowConfigError, FlowContext,
    FlowEngineConfig, FlowError, FlowException, FlowLogic, FlowOutcome, FlowStatus, FlowType,
    ProgressEvent, ProgressTracker, ReceivedMessage, Resume, Suspend, UntrustworthyData,
};
pub use handle::{FlowHandle, ProgressFeed};
pub use ports::{CheckpointStore, ExternalService, MessagingService};
pub use registry::{FlowRegistry, ResponderFactory};
pub use service::{FlowEngineDependencies, RecoveryReport, ShutdownHandle, StateMachineManager};
