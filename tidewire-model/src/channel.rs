//! Fixed channel taxonomy forming the wire contract with the compute tier.
//!
//! Every channel carries exactly one message schema: the `*:task` channels carry
//! task envelopes and every other channel carries an outcome event of the kind
//! named by its suffix. The set is closed; nothing in the relay creates channels
//! at runtime.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Workflow family a task or outcome belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowKind {
    Backtest,
    Optimization,
    Walkforward,
}

impl WorkflowKind {
    pub const ALL: [WorkflowKind; 3] = [
        WorkflowKind::Backtest,
        WorkflowKind::Optimization,
        WorkflowKind::Walkforward,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowKind::Backtest => "backtest",
            WorkflowKind::Optimization => "optimization",
            WorkflowKind::Walkforward => "walkforward",
        }
    }

    /// Name of the top-level JSON field carrying the originating id for this
    /// workflow, both in envelopes and in outcome events.
    pub fn id_field(&self) -> &'static str {
        match self {
            WorkflowKind::Backtest => "taskId",
            WorkflowKind::Optimization => "optimizationId",
            WorkflowKind::Walkforward => "analysisId",
        }
    }

    /// Channel the compute tier consumes submissions of this kind from.
    pub fn task_channel(&self) -> Channel {
        match self {
            WorkflowKind::Backtest => Channel::BacktestTask,
            WorkflowKind::Optimization => Channel::OptimizationTask,
            WorkflowKind::Walkforward => Channel::WalkforwardTask,
        }
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome suffix of a non-task channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    Progress,
    Complete,
    Error,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Progress => "progress",
            OutcomeKind::Complete => "complete",
            OutcomeKind::Error => "error",
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the ten named pub/sub channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    BacktestTask,
    BacktestProgress,
    BacktestComplete,
    BacktestError,
    OptimizationTask,
    OptimizationProgress,
    OptimizationComplete,
    WalkforwardTask,
    WalkforwardProgress,
    WalkforwardComplete,
}

impl Channel {
    pub const ALL: [Channel; 10] = [
        Channel::BacktestTask,
        Channel::BacktestProgress,
        Channel::BacktestComplete,
        Channel::BacktestError,
        Channel::OptimizationTask,
        Channel::OptimizationProgress,
        Channel::OptimizationComplete,
        Channel::WalkforwardTask,
        Channel::WalkforwardProgress,
        Channel::WalkforwardComplete,
    ];

    /// Channels the event router subscribes to.
    pub const OUTCOMES: [Channel; 7] = [
        Channel::BacktestProgress,
        Channel::BacktestComplete,
        Channel::BacktestError,
        Channel::OptimizationProgress,
        Channel::OptimizationComplete,
        Channel::WalkforwardProgress,
        Channel::WalkforwardComplete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::BacktestTask => "backtest:task",
            Channel::BacktestProgress => "backtest:progress",
            Channel::BacktestComplete => "backtest:complete",
            Channel::BacktestError => "backtest:error",
            Channel::OptimizationTask => "optimization:task",
            Channel::OptimizationProgress => "optimization:progress",
            Channel::OptimizationComplete => "optimization:complete",
            Channel::WalkforwardTask => "walkforward:task",
            Channel::WalkforwardProgress => "walkforward:progress",
            Channel::WalkforwardComplete => "walkforward:complete",
        }
    }

    pub fn workflow(&self) -> WorkflowKind {
        match self {
            Channel::BacktestTask
            | Channel::BacktestProgress
            | Channel::BacktestComplete
            | Channel::BacktestError => WorkflowKind::Backtest,
            Channel::OptimizationTask
            | Channel::OptimizationProgress
            | Channel::OptimizationComplete => WorkflowKind::Optimization,
            Channel::WalkforwardTask
            | Channel::WalkforwardProgress
            | Channel::WalkforwardComplete => WorkflowKind::Walkforward,
        }
    }

    /// `None` for task-submission channels.
    pub fn outcome(&self) -> Option<OutcomeKind> {
        match self {
            Channel::BacktestTask
            | Channel::OptimizationTask
            | Channel::WalkforwardTask => None,
            Channel::BacktestProgress
            | Channel::OptimizationProgress
            | Channel::WalkforwardProgress => Some(OutcomeKind::Progress),
            Channel::BacktestComplete
            | Channel::OptimizationComplete
            | Channel::WalkforwardComplete => Some(OutcomeKind::Complete),
            Channel::BacktestError => Some(OutcomeKind::Error),
        }
    }

    pub fn is_task(&self) -> bool {
        self.outcome().is_none()
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .iter()
            .copied()
            .find(|channel| channel.as_str() == s)
            .ok_or_else(|| ModelError::UnknownChannel(s.to_string()))
    }
}

impl Serialize for Channel {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Channel {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
