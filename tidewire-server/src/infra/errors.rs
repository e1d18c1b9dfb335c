use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

use tidewire_model::{ModelError, ValidationError};

use crate::infra::pubsub::PublishError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "status": self.status.as_u16(),
            }
        }));

        (self.status, body).into_response()
    }
}

impl From<PublishError> for AppError {
    fn from(err: PublishError) -> Self {
        match err {
            PublishError::Exhausted { .. } => {
                tracing::error!(error = %err, "task publish exhausted its retry budget");
                Self::unavailable("Task queue is unavailable, try again later")
            }
            PublishError::Serialization { .. } => {
                tracing::error!(error = ?err, "task could not be serialized");
                Self::internal("Task could not be encoded")
            }
            PublishError::Rejected { .. } => {
                tracing::error!(error = ?err, "broker rejected task publish");
                Self::bad_gateway("Task queue rejected the submission")
            }
        }
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        Self::bad_request(err.to_string())
    }
}

impl From<ModelError> for AppError {
    fn from(err: ModelError) -> Self {
        Self::bad_request(err.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(rejection.status(), rejection.body_text())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::pubsub::BrokerError;
    use tidewire_model::Channel;

    #[test]
    fn publish_failures_map_to_gateway_statuses() {
        let exhausted = AppError::from(PublishError::Exhausted {
            channel: Channel::BacktestTask,
            attempts: 4,
            last: BrokerError::Connection("refused".into()),
        });
        let rejected = AppError::from(PublishError::Rejected {
            channel: Channel::BacktestTask,
            source: BrokerError::Rejected("NOPERM".into()),
        });

        assert_eq!(exhausted.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(rejected.status, StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn validation_errors_are_client_errors() {
        let err = AppError::from(ValidationError::new("symbol", "must not be empty"));
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "symbol: must not be empty");
    }
}
