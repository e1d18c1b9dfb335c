//! Outcome events emitted by the compute tier.
//!
//! The relay only forwards these: it extracts the routing keys (originating id
//! and user) plus the kind-specific body it needs for logging, and keeps the
//! original JSON object so clients receive exactly what the compute tier sent.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{
    channel::{Channel, OutcomeKind, WorkflowKind},
    ids::UserId,
};

/// Why an inbound outcome message was dropped.
#[derive(Debug, Error)]
pub enum OutcomeParseError {
    #[error("`{0}` is a task channel, not an outcome channel")]
    NotAnOutcomeChannel(Channel),
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("missing or empty `{0}` field")]
    MissingField(&'static str),
    #[error("field `{field}` has the wrong type (expected {expected})")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
}

/// Kind-specific fields of an outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum OutcomeBody {
    Progress {
        percent: f64,
        status: Option<String>,
    },
    Complete {
        result_id: Option<String>,
        summary: Option<Value>,
    },
    Error {
        message: String,
    },
}

impl OutcomeBody {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            OutcomeBody::Progress { .. } => OutcomeKind::Progress,
            OutcomeBody::Complete { .. } => OutcomeKind::Complete,
            OutcomeBody::Error { .. } => OutcomeKind::Error,
        }
    }
}

/// A parsed progress/complete/error message tagged with its routing keys.
#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeEvent {
    pub channel: Channel,
    pub id: String,
    pub user_id: UserId,
    pub body: OutcomeBody,
    fields: Map<String, Value>,
}

impl OutcomeEvent {
    /// Parses a raw payload that arrived on `channel`.
    ///
    /// The id is read from the workflow's id field (`taskId`, `optimizationId`
    /// or `analysisId`), falling back to `taskId` which every workflow accepts.
    pub fn parse(channel: Channel, raw: &str) -> Result<Self, OutcomeParseError> {
        let kind = channel
            .outcome()
            .ok_or(OutcomeParseError::NotAnOutcomeChannel(channel))?;
        let value: Value = serde_json::from_str(raw)?;
        let Value::Object(fields) = value else {
            return Err(OutcomeParseError::NotAnObject);
        };

        let workflow = channel.workflow();
        let id = read_id(&fields, workflow)?;
        let user_id = required_str(&fields, "userId")?;
        let user_id =
            UserId::new(user_id).map_err(|_| OutcomeParseError::MissingField("userId"))?;

        let body = match kind {
            OutcomeKind::Progress => OutcomeBody::Progress {
                percent: fields
                    .get("progress")
                    .ok_or(OutcomeParseError::MissingField("progress"))?
                    .as_f64()
                    .ok_or(OutcomeParseError::WrongType {
                        field: "progress",
                        expected: "number",
                    })?,
                status: optional_str(&fields, "status")
                    .or_else(|| optional_str(&fields, "message")),
            },
            OutcomeKind::Complete => OutcomeBody::Complete {
                result_id: optional_str(&fields, "resultId"),
                summary: fields.get("summary").cloned(),
            },
            OutcomeKind::Error => OutcomeBody::Error {
                message: optional_str(&fields, "error")
                    .or_else(|| optional_str(&fields, "message"))
                    .ok_or(OutcomeParseError::MissingField("error"))?,
            },
        };

        Ok(Self {
            channel,
            id,
            user_id,
            body,
            fields,
        })
    }

    pub fn workflow(&self) -> WorkflowKind {
        self.channel.workflow()
    }

    pub fn kind(&self) -> OutcomeKind {
        self.body.kind()
    }

    /// The message exactly as the compute tier sent it.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Object forwarded to clients: the original fields with a server-stamped
    /// `timestamp`.
    pub fn client_payload(&self, now: DateTime<Utc>) -> Value {
        let mut fields = self.fields.clone();
        fields.insert(
            "timestamp".to_string(),
            Value::String(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        Value::Object(fields)
    }
}

fn read_id(
    fields: &Map<String, Value>,
    workflow: WorkflowKind,
) -> Result<String, OutcomeParseError> {
    let field = workflow.id_field();
    optional_str(fields, field)
        .or_else(|| optional_str(fields, "taskId"))
        .ok_or(OutcomeParseError::MissingField(field))
}

fn required_str(
    fields: &Map<String, Value>,
    field: &'static str,
) -> Result<String, OutcomeParseError> {
    match fields.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        Some(Value::String(_)) | None => Err(OutcomeParseError::MissingField(field)),
        Some(_) => Err(OutcomeParseError::WrongType {
            field,
            expected: "string",
        }),
    }
}

fn optional_str(fields: &Map<String, Value>, field: &str) -> Option<String> {
    fields
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}
