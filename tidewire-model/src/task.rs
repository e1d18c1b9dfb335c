//! Task envelopes handed to the compute tier.
//!
//! An envelope is built once at submission, stamped with a publish timestamp and
//! never touched again by the relay. The compute tier owns its lifecycle after
//! it lands on the workflow's task channel.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    channel::{Channel, WorkflowKind},
    error::ValidationError,
    ids::{TaskId, UserId},
};

/// Highest leverage accepted by the compute tier.
pub const MAX_LEVERAGE: f64 = 125.0;

/// Market, date range and account settings shared by every workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketScope {
    pub symbol: String,
    pub interval: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub leverage: f64,
    pub commission: f64,
    pub principal: f64,
}

impl MarketScope {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.symbol.trim().is_empty() {
            return Err(ValidationError::new("symbol", "must not be empty"));
        }
        if self.interval.trim().is_empty() {
            return Err(ValidationError::new("interval", "must not be empty"));
        }
        if self.start_date >= self.end_date {
            return Err(ValidationError::new(
                "startDate",
                "must be earlier than endDate",
            ));
        }
        if self.leverage.is_nan() || self.leverage <= 0.0 || self.leverage > MAX_LEVERAGE {
            return Err(ValidationError::new(
                "leverage",
                format!("must be within (0, {MAX_LEVERAGE}]"),
            ));
        }
        if !(0.0..1.0).contains(&self.commission) {
            return Err(ValidationError::new("commission", "must be within [0, 1)"));
        }
        if !self.principal.is_finite() || self.principal <= 0.0 {
            return Err(ValidationError::new("principal", "must be positive"));
        }
        Ok(())
    }
}

/// A named strategy with its free-form parameter object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub name: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestParams {
    #[serde(flatten)]
    pub scope: MarketScope,
    pub strategies: Vec<StrategyConfig>,
}

/// Search range for one strategy parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterRange {
    pub parameter: String,
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRanges {
    pub name: String,
    pub ranges: Vec<ParameterRange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TargetMetric {
    TotalReturn,
    SharpeRatio,
    MaxDrawdown,
    WinRate,
    ProfitFactor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationParams {
    #[serde(flatten)]
    pub scope: MarketScope,
    pub strategies: Vec<StrategyRanges>,
    pub target_metric: TargetMetric,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalkforwardParams {
    #[serde(flatten)]
    pub scope: MarketScope,
    pub strategy: StrategyConfig,
    pub training_window_days: u32,
    pub testing_window_days: u32,
    pub step_days: u32,
}

/// Workflow-specific payload of an envelope. Serialized without a tag: the
/// channel already names the workflow.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TaskParams {
    Backtest(BacktestParams),
    Optimization(OptimizationParams),
    Walkforward(WalkforwardParams),
}

impl TaskParams {
    pub fn kind(&self) -> WorkflowKind {
        match self {
            TaskParams::Backtest(_) => WorkflowKind::Backtest,
            TaskParams::Optimization(_) => WorkflowKind::Optimization,
            TaskParams::Walkforward(_) => WorkflowKind::Walkforward,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            TaskParams::Backtest(params) => {
                params.scope.validate()?;
                if params.strategies.is_empty() {
                    return Err(ValidationError::new(
                        "strategies",
                        "at least one strategy is required",
                    ));
                }
                params
                    .strategies
                    .iter()
                    .try_for_each(|s| validate_strategy_name(&s.name))
            }
            TaskParams::Optimization(params) => {
                params.scope.validate()?;
                if params.strategies.is_empty() {
                    return Err(ValidationError::new(
                        "strategies",
                        "at least one strategy is required",
                    ));
                }
                for strategy in &params.strategies {
                    validate_strategy_name(&strategy.name)?;
                    if strategy.ranges.is_empty() {
                        return Err(ValidationError::new(
                            "ranges",
                            format!("strategy `{}` has no parameter ranges", strategy.name),
                        ));
                    }
                    strategy.ranges.iter().try_for_each(validate_range)?;
                }
                Ok(())
            }
            TaskParams::Walkforward(params) => {
                params.scope.validate()?;
                validate_strategy_name(&params.strategy.name)?;
                if params.training_window_days == 0 {
                    return Err(ValidationError::new(
                        "trainingWindowDays",
                        "must be positive",
                    ));
                }
                if params.testing_window_days == 0 {
                    return Err(ValidationError::new(
                        "testingWindowDays",
                        "must be positive",
                    ));
                }
                if params.step_days == 0 {
                    return Err(ValidationError::new("stepDays", "must be positive"));
                }
                let span = (params.scope.end_date - params.scope.start_date).num_days();
                let window =
                    i64::from(params.training_window_days) + i64::from(params.testing_window_days);
                if window > span {
                    return Err(ValidationError::new(
                        "trainingWindowDays",
                        format!(
                            "training + testing windows ({window} days) exceed the date range ({span} days)"
                        ),
                    ));
                }
                Ok(())
            }
        }
    }
}

fn validate_strategy_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::new("strategies", "strategy name must not be empty"));
    }
    Ok(())
}

fn validate_range(range: &ParameterRange) -> Result<(), ValidationError> {
    if range.parameter.trim().is_empty() {
        return Err(ValidationError::new("ranges", "parameter name must not be empty"));
    }
    if range.min > range.max {
        return Err(ValidationError::new(
            "ranges",
            format!("`{}`: min exceeds max", range.parameter),
        ));
    }
    if range.step.is_nan() || range.step <= 0.0 {
        return Err(ValidationError::new(
            "ranges",
            format!("`{}`: step must be positive", range.parameter),
        ));
    }
    Ok(())
}

/// Submission handed to the compute tier.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskEnvelope {
    pub id: TaskId,
    pub user_id: UserId,
    pub params: TaskParams,
}

impl TaskEnvelope {
    pub fn new(id: TaskId, user_id: UserId, params: TaskParams) -> Self {
        Self {
            id,
            user_id,
            params,
        }
    }

    pub fn kind(&self) -> WorkflowKind {
        self.params.kind()
    }

    pub fn channel(&self) -> Channel {
        self.kind().task_channel()
    }

    /// Wire object for the task channel. `timestamp` is always written last so
    /// it overwrites anything the params might carry at the top level.
    pub fn to_wire(&self, timestamp: DateTime<Utc>) -> Result<Value, serde_json::Error> {
        let mut object = Map::new();
        object.insert(
            self.kind().id_field().to_string(),
            Value::String(self.id.as_str().to_string()),
        );
        object.insert(
            "userId".to_string(),
            Value::String(self.user_id.as_str().to_string()),
        );
        object.insert("params".to_string(), serde_json::to_value(&self.params)?);
        object.insert(
            "timestamp".to_string(),
            Value::String(timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        Ok(Value::Object(object))
    }
}

/// Task message received from an upstream endpoint, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum UpstreamTask {
    Backtest {
        #[serde(rename = "taskId")]
        id: TaskId,
        #[serde(rename = "userId")]
        user_id: UserId,
        params: BacktestParams,
    },
    Optimization {
        #[serde(rename = "optimizationId")]
        id: TaskId,
        #[serde(rename = "userId")]
        user_id: UserId,
        params: OptimizationParams,
    },
    Walkforward {
        #[serde(rename = "analysisId")]
        id: TaskId,
        #[serde(rename = "userId")]
        user_id: UserId,
        params: WalkforwardParams,
    },
}

impl UpstreamTask {
    pub fn kind(&self) -> WorkflowKind {
        match self {
            UpstreamTask::Backtest { .. } => WorkflowKind::Backtest,
            UpstreamTask::Optimization { .. } => WorkflowKind::Optimization,
            UpstreamTask::Walkforward { .. } => WorkflowKind::Walkforward,
        }
    }

    pub fn into_envelope(self) -> TaskEnvelope {
        match self {
            UpstreamTask::Backtest {
                id,
                user_id,
                params,
            } => TaskEnvelope::new(id, user_id, TaskParams::Backtest(params)),
            UpstreamTask::Optimization {
                id,
                user_id,
                params,
            } => TaskEnvelope::new(id, user_id, TaskParams::Optimization(params)),
            UpstreamTask::Walkforward {
                id,
                user_id,
                params,
            } => TaskEnvelope::new(id, user_id, TaskParams::Walkforward(params)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope() -> MarketScope {
        MarketScope {
            symbol: "BTCUSDT".into(),
            interval: "1h".into(),
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            leverage: 3.0,
            commission: 0.0004,
            principal: 10_000.0,
        }
    }

    fn backtest() -> TaskEnvelope {
        TaskEnvelope::new(
            TaskId::new("t1").unwrap(),
            UserId::new("u1").unwrap(),
            TaskParams::Backtest(BacktestParams {
                scope: scope(),
                strategies: vec![StrategyConfig {
                    name: "ema_cross".into(),
                    params: json!({"fast": 12, "slow": 26}).as_object().unwrap().clone(),
                }],
            }),
        )
    }

    #[test]
    fn wire_object_carries_id_user_params_and_timestamp() {
        let ts = DateTime::parse_from_rfc3339("2024-07-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let wire = backtest().to_wire(ts).unwrap();

        assert_eq!(wire["taskId"], "t1");
        assert_eq!(wire["userId"], "u1");
        assert_eq!(wire["timestamp"], "2024-07-01T12:00:00.000Z");
        assert_eq!(wire["params"]["symbol"], "BTCUSDT");
        assert_eq!(wire["params"]["startDate"], "2024-01-01");
        assert_eq!(wire["params"]["strategies"][0]["params"]["fast"], 12);
    }

    #[test]
    fn envelope_routes_to_its_workflow_task_channel() {
        assert_eq!(backtest().channel(), Channel::BacktestTask);
    }

    #[test]
    fn inverted_date_range_fails_validation() {
        let mut bad = scope();
        bad.end_date = bad.start_date;
        let err = TaskParams::Backtest(BacktestParams {
            scope: bad,
            strategies: vec![StrategyConfig {
                name: "x".into(),
                params: Map::new(),
            }],
        })
        .validate()
        .unwrap_err();
        assert_eq!(err.field, "startDate");
    }

    #[test]
    fn optimization_range_needs_positive_step() {
        let params = TaskParams::Optimization(OptimizationParams {
            scope: scope(),
            strategies: vec![StrategyRanges {
                name: "rsi".into(),
                ranges: vec![ParameterRange {
                    parameter: "period".into(),
                    min: 5.0,
                    max: 30.0,
                    step: 0.0,
                }],
            }],
            target_metric: TargetMetric::SharpeRatio,
        });
        assert_eq!(params.validate().unwrap_err().field, "ranges");
    }

    #[test]
    fn walkforward_windows_must_fit_the_range() {
        let params = TaskParams::Walkforward(WalkforwardParams {
            scope: scope(),
            strategy: StrategyConfig {
                name: "breakout".into(),
                params: Map::new(),
            },
            training_window_days: 120,
            testing_window_days: 60,
            step_days: 30,
        });
        assert!(params.validate().is_err());
    }

    #[test]
    fn upstream_message_decodes_by_type_discriminator() {
        let raw = json!({
            "type": "walkforward",
            "analysisId": "a9",
            "userId": "u3",
            "params": {
                "symbol": "ETHUSDT",
                "interval": "4h",
                "startDate": "2023-01-01",
                "endDate": "2024-01-01",
                "leverage": 2.0,
                "commission": 0.001,
                "principal": 5000.0,
                "strategy": {"name": "breakout"},
                "trainingWindowDays": 90,
                "testingWindowDays": 30,
                "stepDays": 30
            }
        });
        let task: UpstreamTask = serde_json::from_value(raw).unwrap();
        assert_eq!(task.kind(), WorkflowKind::Walkforward);

        let envelope = task.into_envelope();
        assert_eq!(envelope.id.as_str(), "a9");
        assert_eq!(envelope.channel(), Channel::WalkforwardTask);
        assert!(envelope.params.validate().is_ok());
    }

    #[test]
    fn upstream_message_with_blank_ids_fails_to_decode() {
        let params = json!({
            "symbol": "BTCUSDT",
            "interval": "1h",
            "startDate": "2024-01-01",
            "endDate": "2024-03-01",
            "leverage": 1.0,
            "commission": 0.0004,
            "principal": 1000.0,
            "strategy": {"name": "ema"},
            "trainingWindowDays": 30,
            "testingWindowDays": 10,
            "stepDays": 10
        });
        let blank_task = json!({
            "type": "walkforward", "analysisId": "", "userId": "u1", "params": params.clone()
        });
        let blank_user = json!({
            "type": "walkforward", "analysisId": "a1", "userId": "   ", "params": params
        });

        assert!(serde_json::from_value::<UpstreamTask>(blank_task).is_err());
        assert!(serde_json::from_value::<UpstreamTask>(blank_user).is_err());
    }
}
