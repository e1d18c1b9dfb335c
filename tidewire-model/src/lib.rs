//! Channel taxonomy and message shapes shared across Tidewire crates.
#![allow(missing_docs)]

pub mod channel;
pub mod error;
pub mod ids;
pub mod outcome;
pub mod protocol;
pub mod task;

pub use channel::{Channel, OutcomeKind, WorkflowKind};
pub use error::{ModelError, ValidationError};
pub use ids::{ConnectionId, TaskId, UserId};
pub use outcome::{OutcomeBody, OutcomeEvent, OutcomeParseError};
pub use protocol::{ClientCommand, Frame, ProtocolError, ServerEvent};
pub use task::{
    BacktestParams, MarketScope, OptimizationParams, ParameterRange,
    StrategyConfig, StrategyRanges, TargetMetric, TaskEnvelope, TaskParams,
    UpstreamTask, WalkforwardParams,
};
