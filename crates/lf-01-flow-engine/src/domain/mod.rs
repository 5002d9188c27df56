//! Domain layer for the flow engine
//!
//! Flow logic contract, checkpoint model, sessions and progress tracking.

pub mod checkpoint;
pub mod config;
pub mod context;
pub mod errors;
pub mod logic;
pub mod progress;

pub use checkpoint::{
    Checkpoint, FlowOutcome, FlowStatus, Frame, OutboundMessage, OutboxRecord, SessionRecord,
    SessionState, StepCommit, TerminalRecord, Wait,
};
pub use config::{FlowConfigError, FlowEngineConfig};
pub use context::FlowContext;
pub use errors::{CheckpointError, FlowError, FlowException};
pub use logic::{
    ExternalRequest, FlowLogic, FlowType, ReceivedMessage, Resume, Snapshot, Suspend,
    UntrustworthyData,
};
pub use progress::{ProgressEvent, ProgressStep, ProgressTracker};
