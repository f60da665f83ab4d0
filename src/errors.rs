use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use thiserror::Error;

use crate::proxy::response::{FailureKind, UpstreamFailure};

#[derive(Debug, Error)]
pub enum AppError {
    /// Missing, malformed, expired or revoked credential.
    #[error("{0}")]
    Unauthenticated(String),

    /// Authenticated, but not allowed to touch this branch or resource.
    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Validation(String),

    /// Business-rule violation: vehicle in use, session closed, odometer
    /// ordering, geofence. `context` is relayed to the client as `data`.
    #[error("{message}")]
    Conflict {
        message: String,
        context: Option<Value>,
    },

    #[error("{0}")]
    NotFound(String),

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("{message}")]
    Upstream {
        message: String,
        context: Option<Value>,
    },

    #[error("upstream did not respond in time")]
    UpstreamTimeout,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn conflict(message: impl Into<String>, context: Option<Value>) -> Self {
        AppError::Conflict {
            message: message.into(),
            context,
        }
    }

    /// The one place error kinds turn into HTTP status codes.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict { .. } => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            AppError::Upstream { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn context(&self) -> Option<&Value> {
        match self {
            AppError::Conflict { context, .. } | AppError::Upstream { context, .. } => {
                context.as_ref()
            }
            _ => None,
        }
    }

    /// Render the `{success:false, error, data?}` envelope. Internal error
    /// detail is only exposed when `expose_details` is set (development).
    pub fn to_response(&self, expose_details: bool) -> Response {
        let message = match self {
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:#}", e);
                if expose_details {
                    format!("{:#}", e)
                } else {
                    "internal server error".to_string()
                }
            }
            other => other.to_string(),
        };

        let mut body = json!({
            "success": false,
            "error": message,
        });
        if let Some(ctx) = self.context() {
            body["data"] = ctx.clone();
        }

        (self.status(), Json(body)).into_response()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.to_response(false)
    }
}

impl From<UpstreamFailure> for AppError {
    fn from(failure: UpstreamFailure) -> Self {
        let UpstreamFailure {
            kind,
            message,
            context,
        } = failure;
        match kind {
            FailureKind::NotFound => AppError::NotFound(message),
            FailureKind::Validation => AppError::Validation(message),
            FailureKind::Conflict => AppError::Conflict { message, context },
            FailureKind::Authentication => AppError::Unauthenticated(message),
            FailureKind::Timeout => AppError::UpstreamTimeout,
            FailureKind::Upstream => AppError::Upstream { message, context },
        }
    }
}
